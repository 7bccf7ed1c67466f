//! Round Scheduler.
//!
//! Drives per-(keyspace, service) migration streams in synchronized
//! rounds. Modeled as a dedicated structure rather than a destructive walk
//! of discovery's output map: a queue per stream, and a round-runner that
//! pulls one head from each non-empty queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::info;

use crate::discovery::ServiceKey;
use crate::error::{Error, Result};
use crate::script::{Bootstrap, Migration};
use crate::store::{SessionRegistry, StateStore};

pub struct RoundScheduler {
    queues: HashMap<ServiceKey, VecDeque<Migration>>,
}

impl RoundScheduler {
    pub fn new(queues: HashMap<ServiceKey, VecDeque<Migration>>) -> Self {
        RoundScheduler { queues }
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Removes the head migration of each stream; a stream whose queue
    /// becomes empty is dropped. Order across streams in the returned
    /// round is unspecified.
    fn next_round(&mut self) -> Vec<Migration> {
        let mut round = Vec::with_capacity(self.queues.len());
        self.queues.retain(|_, queue| {
            if let Some(migration) = queue.pop_front() {
                round.push(migration);
            }
            !queue.is_empty()
        });
        round
    }
}

/// Drains `scheduler` to completion: fires every round concurrently,
/// lets every apply (success, skip, or failure) run to completion before
/// judging the round, and blocks on schema agreement between fully
/// successful rounds.
pub async fn run_migrations(
    mut scheduler: RoundScheduler,
    registry: &SessionRegistry,
    store: &StateStore,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let mut round_number = 0usize;
    while !scheduler.is_empty() {
        round_number += 1;
        let round = scheduler.next_round();
        info!(round = round_number, migrations = round.len(), "starting migration round");

        let outcomes = join_all(round.iter().map(|migration| async {
            let client = registry.keyspace(&migration.keyspace).await?;
            migration.apply(&client, store, timeout).await
        }))
        .await;

        let failures: Vec<&Error> = outcomes
            .iter()
            .filter_map(|o| o.as_ref().err())
            .collect();

        if !failures.is_empty() {
            for (migration, outcome) in round.iter().zip(outcomes.iter()) {
                if let Err(e) = outcome {
                    tracing::error!(
                        keyspace = %migration.keyspace,
                        service = %migration.service,
                        file = %migration.file,
                        error = %e,
                        "migration failed"
                    );
                }
            }
            return Err(Error::RoundFailed(failures.len()));
        }

        store.await_schema_agreement(poll_interval).await?;
    }

    Ok(())
}

/// Fires every bootstrap concurrently; any failure is fatal for the
/// whole phase. A single convergence barrier follows the entire phase.
pub async fn run_bootstraps(
    bootstraps: Vec<Bootstrap>,
    registry: &SessionRegistry,
    store: &StateStore,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    if bootstraps.is_empty() {
        return Ok(());
    }

    let outcomes = join_all(bootstraps.iter().map(|bootstrap| async {
        let client = registry.keyspace(&bootstrap.keyspace).await?;
        bootstrap.apply(&client, store, timeout).await
    }))
    .await;

    for (bootstrap, outcome) in bootstraps.iter().zip(outcomes.into_iter()) {
        if let Err(e) = outcome {
            return Err(Error::BootstrapFailed {
                keyspace: bootstrap.keyspace.clone(),
                source: anyhow::anyhow!(e),
            });
        }
    }

    store.await_schema_agreement(poll_interval).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Migration;

    fn migration(keyspace: &str, service: &str, file: &str) -> Migration {
        Migration::load(
            keyspace.to_string(),
            service.to_string(),
            file.to_string(),
            std::path::Path::new("/dev/null"),
            None,
        )
        .unwrap_or_else(|_| panic!("test fixture"))
    }

    #[test]
    fn round_pulls_one_head_per_stream_and_drops_empties() {
        let mut queues: HashMap<ServiceKey, VecDeque<Migration>> = HashMap::new();
        queues.insert(
            ServiceKey { keyspace: "ks".into(), service: "a".into() },
            VecDeque::from(vec![migration("ks", "a", "001.cql"), migration("ks", "a", "002.cql")]),
        );
        queues.insert(
            ServiceKey { keyspace: "ks".into(), service: "b".into() },
            VecDeque::from(vec![migration("ks", "b", "001.cql")]),
        );

        let mut scheduler = RoundScheduler::new(queues);
        let round1 = scheduler.next_round();
        assert_eq!(round1.len(), 2);
        assert!(!scheduler.is_empty());

        let round2 = scheduler.next_round();
        assert_eq!(round2.len(), 1);
        assert_eq!(round2[0].service, "a");
        assert!(scheduler.is_empty());
    }
}
