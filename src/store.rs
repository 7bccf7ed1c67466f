//! State Store Gateway.
//!
//! Exposes typed DAO routines over the tool's own metadata tables plus a
//! schema-agreement probe, all running through a [`CachingSession`] so
//! prepared statements are cached by default. Generic record-to-columns
//! reflection is deliberately not implemented: each table gets its own
//! routine that knows its column set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use scylla::statement::query::Query;
use scylla::statement::Consistency;
use scylla::{CachingSession, Session, SessionBuilder};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};

const PREPARED_CACHE_SIZE: usize = 512;

/// A connection bound either to a specific keyspace or to none (admin).
pub struct Client {
    caching: CachingSession,
}

impl Client {
    async fn connect(
        contact_points: &[String],
        username: Option<&str>,
        password: Option<&str>,
        keyspace: Option<&str>,
    ) -> Result<Self> {
        let mut builder = SessionBuilder::new();
        for point in contact_points {
            builder = builder.known_node(point);
        }
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.user(user, pass);
        }
        if let Some(ks) = keyspace {
            builder = builder.use_keyspace(ks, false);
        }
        let session = builder
            .build()
            .await
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        Ok(Client {
            caching: CachingSession::from(session, PREPARED_CACHE_SIZE),
        })
    }

    fn session(&self) -> &Session {
        self.caching.get_session()
    }

    /// Executes one CQL statement at consistency ALL within `timeout`.
    pub async fn execute_statement(&self, stmt: &str, timeout: Duration) -> Result<()> {
        let mut query = Query::new(stmt.to_string());
        query.set_consistency(Consistency::All);
        tokio::time::timeout(timeout, self.caching.execute_unpaged(query, &[]))
            .await
            .map_err(|_| Error::Other(format!("statement timed out after {timeout:?}: {stmt}")))?
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn run(&self, query: Query, values: impl scylla::SerializeRow) -> Result<scylla::QueryResult> {
        self.caching
            .execute_unpaged(query, values)
            .await
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))
    }
}

fn all_consistency(stmt: &str) -> Query {
    let mut q = Query::new(stmt.to_string());
    q.set_consistency(Consistency::All);
    q
}

/// `system.local`/`system.peers` are node-local, unreplicated tables —
/// each node only ever holds its own row plus what it has gossiped about
/// its peers. Consistency `ALL` is meaningless against them (there is
/// nothing to reconcile across replicas) and spec.md §4.E reserves `ALL`
/// for the lock's conditional writes, not for reading these tables.
fn local_consistency(stmt: &str) -> Query {
    let mut q = Query::new(stmt.to_string());
    q.set_consistency(Consistency::One);
    q
}

/// A row hydrated from the `migrations` table.
#[derive(Debug, Clone)]
pub struct MigrationRow {
    pub applied_on: Option<OffsetDateTime>,
    pub checksum: String,
    pub success: bool,
    pub body: String,
}

/// State Store Gateway: the tool's own metadata keyspace, plus an admin
/// (no-keyspace) client for lock and cluster-wide queries.
pub struct StateStore {
    admin: Arc<Client>,
    metadata_keyspace: String,
}

impl StateStore {
    /// Binds the state store to the registry's admin (no-keyspace)
    /// client, so the lock table, metadata tables, and cluster-wide
    /// schema-agreement queries all share the one admin connection pool.
    pub async fn connect(config: &Config, registry: &SessionRegistry) -> Result<Self> {
        Ok(StateStore {
            admin: registry.admin().await?,
            metadata_keyspace: config.metadata_keyspace.clone(),
        })
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.metadata_keyspace, name)
    }

    pub fn admin_client(&self) -> Arc<Client> {
        self.admin.clone()
    }

    // -- locks ---------------------------------------------------------

    /// `INSERT ... IF NOT EXISTS`. Returns whether the insert was applied
    /// (i.e. the caller now owns the lock). Driver exceptions are treated
    /// as acquire failure, never propagated.
    pub async fn try_insert_lock(&self, name: &str, client: Uuid) -> bool {
        let query = all_consistency(&format!(
            "INSERT INTO {} (name, client) VALUES (?, ?) IF NOT EXISTS",
            self.table("locks")
        ));
        match self.admin.run(query, (name, client)).await {
            Ok(result) => was_applied(result),
            Err(e) => {
                warn!(error = %e, "lock acquire raised a driver error, treating as failure");
                false
            }
        }
    }

    /// `DELETE ... IF client = ?`. Returns whether the delete was applied
    /// (i.e. the caller still owned the lock at delete time).
    pub async fn try_delete_lock(&self, name: &str, client: Uuid) -> bool {
        let query = all_consistency(&format!(
            "DELETE FROM {} WHERE name = ? IF client = ?",
            self.table("locks")
        ));
        match self.admin.run(query, (name, client)).await {
            Ok(result) => was_applied(result),
            Err(e) => {
                warn!(error = %e, "lock release raised a driver error, treating as failure");
                false
            }
        }
    }

    // -- bootstraps ------------------------------------------------------

    pub async fn insert_bootstrap_row(
        &self,
        keyspace: &str,
        applied_on: OffsetDateTime,
        file: &str,
        success: bool,
        body: &str,
    ) -> Result<()> {
        let query = all_consistency(&format!(
            "INSERT INTO {} (keyspace_name, applied_on, file, success, body) VALUES (?, ?, ?, ?, ?)",
            self.table("bootstraps")
        ));
        self.admin
            .run(query, (keyspace, applied_on, file, success, body))
            .await?;
        Ok(())
    }

    /// Counts every `bootstraps` row for `keyspace`, including repeat
    /// attempts (each apply is an independent append).
    pub async fn count_bootstraps(&self, keyspace: &str) -> Result<i64> {
        self.count(&self.table("bootstraps"), keyspace).await
    }

    // -- migrations -------------------------------------------------------

    pub async fn select_migration_row(
        &self,
        keyspace: &str,
        service: &str,
        file: &str,
    ) -> Result<Option<MigrationRow>> {
        let query = all_consistency(&format!(
            "SELECT applied_on, checksum, success, body FROM {} WHERE keyspace_name = ? AND service = ? AND file = ?",
            self.table("migrations")
        ));
        let result = self.admin.run(query, (keyspace, service, file)).await?;
        let rows = result
            .into_rows_result()
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        let mut typed = rows
            .rows::<(Option<OffsetDateTime>, String, bool, String)>()
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        match typed.next() {
            Some(row) => {
                let (applied_on, checksum, success, body) =
                    row.map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
                Ok(Some(MigrationRow { applied_on, checksum, success, body }))
            }
            None => Ok(None),
        }
    }

    pub async fn insert_migration_row(
        &self,
        keyspace: &str,
        service: &str,
        file: &str,
        applied_on: OffsetDateTime,
        checksum: &str,
        success: bool,
        body: &str,
    ) -> Result<()> {
        let query = all_consistency(&format!(
            "INSERT INTO {} (keyspace_name, service, file, applied_on, checksum, success, body) VALUES (?, ?, ?, ?, ?, ?, ?)",
            self.table("migrations")
        ));
        self.admin
            .run(query, (keyspace, service, file, applied_on, checksum, success, body))
            .await?;
        Ok(())
    }

    /// Counts every `migrations` row for `keyspace`, across all services.
    pub async fn count_migrations(&self, keyspace: &str) -> Result<i64> {
        self.count(&self.table("migrations"), keyspace).await
    }

    async fn count(&self, table: &str, keyspace: &str) -> Result<i64> {
        let query = all_consistency(&format!(
            "SELECT COUNT(*) FROM {table} WHERE keyspace_name = ?"
        ));
        let result = self.admin.run(query, (keyspace,)).await?;
        let rows = result
            .into_rows_result()
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        let mut typed = rows
            .rows::<(i64,)>()
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        match typed.next() {
            Some(row) => Ok(row.map_err(|e| Error::Driver(anyhow::anyhow!(e)))?.0),
            None => Ok(0),
        }
    }

    // -- schema agreement --------------------------------------------------

    /// Collects `schema_version` from `system.local` and every row of
    /// `system.peers`; returns true iff the resulting set has at most one
    /// element. A peer known to the driver's cluster metadata but
    /// currently down still contributes its last-reported version, with a
    /// warning naming its address, DC, and rack.
    pub async fn check_schema_agreement(&self) -> Result<bool> {
        let mut versions: std::collections::HashSet<Uuid> = std::collections::HashSet::new();

        let local = self
            .admin
            .run(local_consistency("SELECT schema_version FROM system.local"), &[])
            .await?;
        let local_rows = local
            .into_rows_result()
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        let mut local_typed = local_rows
            .rows::<(Option<Uuid>,)>()
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        match local_typed.next() {
            Some(row) => {
                let (version,) = row.map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
                match version {
                    Some(v) => {
                        versions.insert(v);
                    }
                    None => return Ok(false),
                }
            }
            None => return Ok(false),
        }

        let peers = self
            .admin
            .run(
                local_consistency("SELECT peer, data_center, rack, schema_version FROM system.peers"),
                &[],
            )
            .await?;
        let peer_rows = peers
            .into_rows_result()
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
        let typed = peer_rows
            .rows::<(std::net::IpAddr, Option<String>, Option<String>, Option<Uuid>)>()
            .map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;

        let known_down = self.down_peers().await;

        for row in typed {
            let (peer, dc, rack, version) = row.map_err(|e| Error::Driver(anyhow::anyhow!(e)))?;
            if let Some(v) = version {
                versions.insert(v);
            }
            if known_down.contains(&peer) {
                warn!(
                    peer = %peer,
                    data_center = dc.as_deref().unwrap_or("unknown"),
                    rack = rack.as_deref().unwrap_or("unknown"),
                    "peer known to driver is not up; its reported schema version still counts toward agreement"
                );
            }
        }

        Ok(versions.len() <= 1)
    }

    /// Addresses of nodes the driver's cluster metadata knows about but
    /// does not currently consider connected/up.
    async fn down_peers(&self) -> std::collections::HashSet<std::net::IpAddr> {
        let cluster = self.admin.session().get_cluster_data();
        cluster
            .get_nodes_info()
            .iter()
            .filter(|node| !node.is_connected())
            .map(|node| node.address.ip())
            .collect()
    }

    /// Polls [`check_schema_agreement`] every `retry_interval` until it
    /// returns true. There is no timeout: a hanging cluster is safer than
    /// advancing under disagreement.
    pub async fn await_schema_agreement(&self, retry_interval: Duration) -> Result<()> {
        loop {
            match self.check_schema_agreement().await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "schema agreement probe failed, retrying"),
            }
            tokio::time::sleep(retry_interval).await;
        }
    }
}

fn was_applied(result: scylla::QueryResult) -> bool {
    result
        .into_rows_result()
        .ok()
        .and_then(|rows| {
            let mut typed = rows.rows::<(bool,)>().ok()?;
            typed.next().and_then(|r| r.ok()).map(|(applied,)| applied)
        })
        .unwrap_or(false)
}

/// Renders the DDL the init script is responsible for running: creating
/// the tool's own metadata keyspace and tables idempotently. The tool
/// itself never executes this — `cqlmigrate init-template` prints it so a
/// fresh migration root can start from a working init script.
pub fn metadata_schema_ddl(metadata_keyspace: &str, replication_factor: u32) -> Vec<String> {
    let table = |name: &str| format!("{metadata_keyspace}.{name}");
    vec![
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {metadata_keyspace} WITH REPLICATION = {{'class': 'SimpleStrategy', 'replication_factor': {replication_factor}}}"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (name text PRIMARY KEY, client uuid)",
            table("locks")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                keyspace_name text, \
                service text, \
                file text, \
                applied_on timestamp, \
                checksum text, \
                success boolean, \
                body text, \
                PRIMARY KEY ((keyspace_name), service, file))",
            table("migrations")
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
                keyspace_name text, \
                applied_on timestamp, \
                file text, \
                success boolean, \
                body text, \
                PRIMARY KEY ((keyspace_name), applied_on))",
            table("bootstraps")
        ),
    ]
}

/// A registry of connections keyed by keyspace, lazily populated.
pub struct SessionRegistry {
    contact_points: Vec<String>,
    username: Option<String>,
    password: Option<String>,
    admin: Mutex<Option<Arc<Client>>>,
    keyspaces: Mutex<HashMap<String, Arc<Client>>>,
}

impl SessionRegistry {
    pub fn new(config: &Config) -> Self {
        SessionRegistry {
            contact_points: config.contact_point_list(),
            username: config.username.clone(),
            password: config.password.clone(),
            admin: Mutex::new(None),
            keyspaces: Mutex::new(HashMap::new()),
        }
    }

    /// The no-keyspace client used for cluster-wide queries.
    pub async fn admin(&self) -> Result<Arc<Client>> {
        let mut guard = self.admin.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = Arc::new(
            Client::connect(
                &self.contact_points,
                self.username.as_deref(),
                self.password.as_deref(),
                None,
            )
            .await?,
        );
        *guard = Some(client.clone());
        Ok(client)
    }

    /// The per-keyspace client, created and cached on first use.
    pub async fn keyspace(&self, name: &str) -> Result<Arc<Client>> {
        let mut guard = self.keyspaces.lock().await;
        if let Some(client) = guard.get(name) {
            return Ok(client.clone());
        }
        let client = Arc::new(
            Client::connect(
                &self.contact_points,
                self.username.as_deref(),
                self.password.as_deref(),
                Some(name),
            )
            .await?,
        );
        guard.insert(name.to_string(), client.clone());
        Ok(client)
    }
}
