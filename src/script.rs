//! Script Model.
//!
//! Three variants share the same execution protocol but differ in
//! persistence: [`Init`] never saves, [`Bootstrap`] appends one row per
//! attempt, [`Migration`] is checksum-locked after its first success.

use std::path::{Path, PathBuf};
use std::time::Duration;

use time::OffsetDateTime;

use crate::checksum::checksum;
use crate::error::{Error, Result};
use crate::lexer::canonicalize;
use crate::store::{Client, MigrationRow, StateStore};

/// Splits a canonical body on `;`, skipping empty/whitespace-only
/// segments, and executes the remainder sequentially and in order against
/// `client`. Failure of any segment aborts the script (shared by Init,
/// Bootstrap, and Migration).
pub async fn execute_statements(client: &Client, canonical_body: &str, timeout: Duration) -> Result<()> {
    for segment in canonical_body.split(';') {
        let stmt = segment.trim();
        if stmt.is_empty() {
            continue;
        }
        client.execute_statement(stmt, timeout).await?;
    }
    Ok(())
}

fn read_and_canonicalize(path: &Path) -> Result<String> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::ScriptRead {
        path: path.to_path_buf(),
        source: e,
    })?;
    canonicalize(&raw).map_err(|offset| {
        Error::Other(format!("failed to lex {} at byte offset {offset}", path.display()))
    })
}

/// The depth-0 script. Its `apply()` runs against the admin (no-keyspace)
/// client; `save()` is a no-op — the init script is never recorded.
pub struct Init {
    pub path: PathBuf,
    pub body: String,
}

impl Init {
    pub fn load(path: PathBuf) -> Result<Self> {
        let body = read_and_canonicalize(&path)?;
        Ok(Init { path, body })
    }

    pub async fn apply(&self, client: &Client, timeout: Duration) -> Result<()> {
        execute_statements(client, &self.body, timeout).await
    }
}

/// A depth-1 script, re-applied every run and never checksummed.
pub struct Bootstrap {
    pub keyspace: String,
    pub file: String,
    pub body: String,
}

impl Bootstrap {
    pub fn load(keyspace: String, file: String, path: &Path) -> Result<Self> {
        let body = read_and_canonicalize(path)?;
        Ok(Bootstrap { keyspace, file, body })
    }

    /// Executes the script then appends one `bootstraps` row with
    /// `success = true`. Each call is an independent append; there is no
    /// skip logic and no checksum.
    pub async fn apply(&self, client: &Client, store: &StateStore, timeout: Duration) -> Result<()> {
        execute_statements(client, &self.body, timeout).await?;
        let applied_on = now();
        store
            .insert_bootstrap_row(&self.keyspace, applied_on, &self.file, true, &self.body)
            .await
    }
}

/// A depth-2 script: applied at most once successfully, then
/// checksum-locked.
pub struct Migration {
    pub keyspace: String,
    pub service: String,
    pub file: String,
    pub body: String,
    prior: Option<MigrationRow>,
}

impl Migration {
    pub fn load(
        keyspace: String,
        service: String,
        file: String,
        path: &Path,
        prior: Option<MigrationRow>,
    ) -> Result<Self> {
        let body = read_and_canonicalize(path)?;
        Ok(Migration { keyspace, service, file, body, prior })
    }

    /// True if Discovery must abort the whole run before any apply: a
    /// prior row exists with `success = false` and a non-null
    /// `applied_on`.
    pub fn is_unresolved_failure(&self) -> bool {
        matches!(&self.prior, Some(row) if !row.success && row.applied_on.is_some())
    }

    /// Skips on a matching checksum, fails on a mismatch, otherwise writes
    /// a pre-execute row, runs the statements, then writes the
    /// post-execute row — the two-phase write around execution.
    pub async fn apply(&self, client: &Client, store: &StateStore, timeout: Duration) -> Result<()> {
        if let Some(prior) = &self.prior {
            if prior.success {
                let current = checksum(&self.body);
                if current != prior.checksum {
                    return Err(Error::ChecksumMismatch {
                        keyspace: self.keyspace.clone(),
                        service: self.service.clone(),
                        file: self.file.clone(),
                        stored: prior.checksum.clone(),
                        current,
                    });
                }
                // Canonical body unchanged since the last successful
                // apply: skip, no database mutation besides the read
                // Discovery already performed.
                return Ok(());
            }
        }

        let sum = checksum(&self.body);
        let first_write_at = now();
        store
            .insert_migration_row(
                &self.keyspace,
                &self.service,
                &self.file,
                first_write_at,
                &sum,
                false,
                &self.body,
            )
            .await?;

        execute_statements(client, &self.body, timeout).await?;

        let second_write_at = now();
        store
            .insert_migration_row(
                &self.keyspace,
                &self.service,
                &self.file,
                second_write_at,
                &sum,
                true,
                &self.body,
            )
            .await?;

        Ok(())
    }
}

fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unresolved_failure_detected() {
        let m = Migration {
            keyspace: "ks".into(),
            service: "svc".into(),
            file: "001.cql".into(),
            body: "SELECT 1;".into(),
            prior: Some(MigrationRow {
                applied_on: Some(now()),
                checksum: "deadbeef".into(),
                success: false,
                body: "SELECT 1;".into(),
            }),
        };
        assert!(m.is_unresolved_failure());
    }

    #[test]
    fn no_prior_row_is_not_an_unresolved_failure() {
        let m = Migration {
            keyspace: "ks".into(),
            service: "svc".into(),
            file: "001.cql".into(),
            body: "SELECT 1;".into(),
            prior: None,
        };
        assert!(!m.is_unresolved_failure());
    }

    #[test]
    fn successful_prior_row_is_not_an_unresolved_failure() {
        let m = Migration {
            keyspace: "ks".into(),
            service: "svc".into(),
            file: "001.cql".into(),
            body: "SELECT 1;".into(),
            prior: Some(MigrationRow {
                applied_on: Some(now()),
                checksum: checksum("SELECT 1;"),
                success: true,
                body: "SELECT 1;".into(),
            }),
        };
        assert!(!m.is_unresolved_failure());
    }
}
