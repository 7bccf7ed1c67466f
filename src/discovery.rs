//! Discovery.
//!
//! Walks the migration root, classifies each `.cql` file solely by path
//! depth — a `bootstrap.cql` two levels deep is a Migration, and a
//! depth-0 file is always `Ignored` here regardless of name — and
//! hydrates Migration state from the store.
//!
//! The depth-0 init script is the orchestrator's concern, not Discovery's:
//! the orchestrator loads and applies it itself, strictly before the lock
//! is acquired and before `discover` ever runs (spec.md §2: "H calls the
//! init script through C+D" ahead of F).

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::script::{Bootstrap, Migration};
use crate::store::StateStore;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub keyspace: String,
    pub service: String,
}

pub struct Discovered {
    pub bootstraps: Vec<Bootstrap>,
    pub migrations: HashMap<ServiceKey, VecDeque<Migration>>,
}

enum Classification {
    Bootstrap { keyspace: String },
    Migration { keyspace: String, service: String },
    Ignored,
}

fn classify(root: &Path, path: &Path, config: &Config) -> Classification {
    let relative = match path.strip_prefix(root) {
        Ok(r) => r,
        Err(_) => return Classification::Ignored,
    };
    let parts: Vec<&std::ffi::OsStr> = relative.components().map(|c| c.as_os_str()).collect();
    let basename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return Classification::Ignored,
    };

    match parts.len() {
        2 if basename == config.bootstrap_filename => Classification::Bootstrap {
            keyspace: parts[0].to_string_lossy().into_owned(),
        },
        3 => Classification::Migration {
            keyspace: parts[0].to_string_lossy().into_owned(),
            service: parts[1].to_string_lossy().into_owned(),
        },
        _ => Classification::Ignored,
    }
}

/// Walks `config.root`, classifies and loads every `.cql` file, hydrates
/// migration state from `store`, and returns the discovered scripts. If
/// any migration has an unresolved prior failure, aborts the whole run
/// before returning.
pub async fn discover(config: &Config, store: Arc<StateStore>) -> Result<Discovered> {
    let root = config.root.as_path();
    let mut bootstraps = Vec::new();
    let mut raw_migrations: Vec<Migration> = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("cql") {
            continue;
        }

        match classify(root, path, config) {
            Classification::Bootstrap { keyspace } => {
                let file = path.file_name().unwrap().to_string_lossy().into_owned();
                bootstraps.push(Bootstrap::load(keyspace, file, path)?);
            }
            Classification::Migration { keyspace, service } => {
                let file = path.file_name().unwrap().to_string_lossy().into_owned();
                let prior = store.select_migration_row(&keyspace, &service, &file).await?;
                let migration = Migration::load(keyspace.clone(), service.clone(), file.clone(), path, prior)?;
                if migration.is_unresolved_failure() {
                    return Err(Error::FailedMigrationExists { keyspace, service, file });
                }
                raw_migrations.push(migration);
            }
            Classification::Ignored => {}
        }
    }

    raw_migrations.sort_by(|a, b| (a.keyspace.as_str(), a.service.as_str(), a.file.as_str())
        .cmp(&(b.keyspace.as_str(), b.service.as_str(), b.file.as_str())));

    let mut migrations: HashMap<ServiceKey, VecDeque<Migration>> = HashMap::new();
    for migration in raw_migrations {
        let key = ServiceKey {
            keyspace: migration.keyspace.clone(),
            service: migration.service.clone(),
        };
        migrations.entry(key).or_default().push_back(migration);
    }

    Ok(Discovered { bootstraps, migrations })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config::default()
    }

    /// The depth-0 init script is the orchestrator's concern, not
    /// Discovery's — it is ignored here regardless of name.
    #[test]
    fn depth_zero_init_name_is_ignored() {
        let root = Path::new("/schema");
        let path = Path::new("/schema/cqlmigrate.cql");
        assert!(matches!(classify(root, path, &config()), Classification::Ignored));
    }

    #[test]
    fn depth_one_bootstrap_name_is_bootstrap() {
        let root = Path::new("/schema");
        let path = Path::new("/schema/billing/bootstrap.cql");
        match classify(root, path, &config()) {
            Classification::Bootstrap { keyspace } => assert_eq!(keyspace, "billing"),
            _ => panic!("expected Bootstrap"),
        }
    }

    /// A `bootstrap.cql` two levels deep is still a Migration —
    /// classification is by depth alone, never by basename at depth 3.
    #[test]
    fn depth_two_bootstrap_name_is_still_a_migration() {
        let root = Path::new("/schema");
        let path = Path::new("/schema/billing/accounts/bootstrap.cql");
        match classify(root, path, &config()) {
            Classification::Migration { keyspace, service } => {
                assert_eq!(keyspace, "billing");
                assert_eq!(service, "accounts");
            }
            _ => panic!("expected Migration"),
        }
    }

    /// An init-named file below depth 0 is silently ignored, not treated
    /// as a migration or bootstrap.
    #[test]
    fn init_name_below_depth_zero_is_ignored() {
        let root = Path::new("/schema");
        let path = Path::new("/schema/billing/cqlmigrate.cql");
        assert!(matches!(classify(root, path, &config()), Classification::Ignored));
    }

    #[test]
    fn depth_three_and_beyond_is_ignored() {
        let root = Path::new("/schema");
        let path = Path::new("/schema/billing/accounts/extra/001.cql");
        assert!(matches!(classify(root, path, &config()), Classification::Ignored));
    }
}
