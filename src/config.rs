//! Configuration loading: defaults, layered with an optional TOML file and
//! `CQLMIGRATE_`-prefixed environment variables.

use std::path::PathBuf;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Migration root directory (`R` in the design).
    pub root: PathBuf,
    /// Basename of the depth-0 init script.
    pub init_filename: String,
    /// Basename of the depth-1 bootstrap script.
    pub bootstrap_filename: String,
    /// Space-separated list of contact points.
    pub contact_points: String,
    /// Per-statement driver timeout, in milliseconds.
    pub timeout_ms: u64,
    /// Verbose logging.
    pub debug: bool,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name of the keyspace the tool uses for its own metadata tables.
    pub metadata_keyspace: String,
    /// Replication factor for the tool's own keyspace.
    pub metadata_replication_factor: u32,
    /// Poll interval for `awaitSchemaAgreement`, in milliseconds.
    pub agreement_poll_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            root: PathBuf::from("/schema"),
            init_filename: "cqlmigrate.cql".to_string(),
            bootstrap_filename: "bootstrap.cql".to_string(),
            contact_points: "localhost".to_string(),
            timeout_ms: 30_000,
            debug: false,
            username: None,
            password: None,
            metadata_keyspace: "cqlmigrate".to_string(),
            metadata_replication_factor: 1,
            agreement_poll_ms: 1000,
        }
    }
}

impl Config {
    /// Loads configuration from defaults, an optional TOML file at
    /// `config_path`, and `CQLMIGRATE_`-prefixed environment variables, in
    /// ascending precedence order.
    pub fn load(config_path: Option<&std::path::Path>) -> anyhow::Result<Self> {
        let defaults = Config::default();

        let mut builder = config::Config::builder()
            .set_default("root", defaults.root.to_string_lossy().to_string())?
            .set_default("init_filename", defaults.init_filename)?
            .set_default("bootstrap_filename", defaults.bootstrap_filename)?
            .set_default("contact_points", defaults.contact_points)?
            .set_default("timeout_ms", defaults.timeout_ms)?
            .set_default("debug", defaults.debug)?
            .set_default("metadata_keyspace", defaults.metadata_keyspace)?
            .set_default("metadata_replication_factor", defaults.metadata_replication_factor)?
            .set_default("agreement_poll_ms", defaults.agreement_poll_ms)?;

        if let Some(path) = config_path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        // A double-underscore separator keeps single-underscore field
        // names (e.g. `contact_points`) from being mistaken for nested
        // keys by the environment source.
        builder = builder.add_source(
            config::Environment::with_prefix("CQLMIGRATE")
                .try_parsing(true)
                .separator("__"),
        );

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn contact_point_list(&self) -> Vec<String> {
        self.contact_points
            .split_whitespace()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    pub fn agreement_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.agreement_poll_ms)
    }
}
