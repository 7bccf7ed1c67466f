//! cqlmigrate — a schema-migration orchestrator for ScyllaDB/Cassandra.
//!
//! Discovers a hierarchy of CQL scripts under a migration root, applies
//! them in a disciplined, idempotent, cluster-wide-coordinated order, and
//! tracks each script's state in the database itself.
//!
//! # Example
//! ```no_run
//! use cqlmigrate::{config::Config, orchestrator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load(None).expect("config");
//!     match orchestrator::run(config).await {
//!         orchestrator::Outcome::Exit(code) => std::process::exit(code),
//!         orchestrator::Outcome::ReleaseFailedNoExit => {}
//!     }
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod discovery;
pub mod error;
pub mod lexer;
pub mod lock;
pub mod orchestrator;
pub mod scheduler;
pub mod script;
pub mod store;
