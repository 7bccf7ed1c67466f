//! Orchestrator: top-level lifecycle.
//!
//! ```text
//! START → INIT → LOCKING → LOADING → BOOTSTRAPPING → MIGRATING → RELEASING → EXIT(code)
//! ```

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::Config;
use crate::discovery::discover;
use crate::lock::Lock;
use crate::scheduler::{run_bootstraps, run_migrations, RoundScheduler};
use crate::store::{SessionRegistry, StateStore};

/// The orchestrator's outcome: an exit code, or the "release failed"
/// surface where the process deliberately does not exit.
pub enum Outcome {
    Exit(i32),
    ReleaseFailedNoExit,
}

pub async fn run(config: Config) -> Outcome {
    let registry = SessionRegistry::new(&config);
    let store = match StateStore::connect(&config, &registry).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to connect to the cluster");
            return Outcome::Exit(1);
        }
    };

    // INIT: run before lock acquisition. Any failure exits without ever
    // having held the lock, so there is nothing to release.
    let init_script = config.root.join(&config.init_filename);
    if init_script.exists() {
        match crate::script::Init::load(init_script) {
            Ok(init) => {
                let admin = store.admin_client();
                if let Err(e) = init.apply(&admin, config.timeout()).await {
                    error!(error = %e, "init script failed");
                    return Outcome::Exit(1);
                }
            }
            Err(e) => {
                error!(error = %e, "failed to load init script");
                return Outcome::Exit(1);
            }
        }
    } else {
        warn!(path = %config.root.display(), "no init script found at migration root");
    }

    // LOCKING
    let lock = Lock::new(store.clone());
    if !lock.acquire().await {
        error!("failed to acquire lock");
        return Outcome::Exit(1);
    }

    let code = run_locked(&config, &registry, &store).await;

    // RELEASING
    if !lock.release().await {
        warn!("failed to release lock; manual recovery may be required");
        return Outcome::ReleaseFailedNoExit;
    }

    Outcome::Exit(code)
}

/// LOADING, BOOTSTRAPPING, MIGRATING — run only while the lock is held.
/// Returns the exit code for the RELEASING transition.
async fn run_locked(config: &Config, registry: &SessionRegistry, store: &Arc<StateStore>) -> i32 {
    // LOADING
    let discovered = match discover(config, store.clone()).await {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "discovery failed");
            return 1;
        }
    };

    // BOOTSTRAPPING
    if let Err(e) = run_bootstraps(
        discovered.bootstraps,
        registry,
        store,
        config.timeout(),
        config.agreement_poll_interval(),
    )
    .await
    {
        error!(error = %e, "bootstrap phase failed");
        return 1;
    }

    // MIGRATING
    let scheduler = RoundScheduler::new(discovered.migrations);
    if let Err(e) = run_migrations(
        scheduler,
        registry,
        store,
        config.timeout(),
        config.agreement_poll_interval(),
    )
    .await
    {
        error!(error = %e, "migration phase failed");
        return 1;
    }

    info!("all migrations applied successfully");
    0
}
