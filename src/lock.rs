//! Distributed Lock.
//!
//! A single conditional row in the tool's metadata table grants one
//! process exclusive right to run. The process-global client identifier
//! is a random UUID drawn once at startup; tying release to `client = C`
//! prevents a stale run from clearing a newer owner's lock.

use std::sync::Arc;

use uuid::Uuid;

use crate::store::StateStore;

const LOCK_NAME: &str = "MIGRATION_LOCK";

/// Process-scoped: acquired at most once, released on every termination
/// path.
pub struct Lock {
    store: Arc<StateStore>,
    client: Uuid,
}

impl Lock {
    pub fn new(store: Arc<StateStore>) -> Self {
        Lock {
            store,
            client: Uuid::new_v4(),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client
    }

    /// `INSERT ... IF NOT EXISTS` at consistency ALL. Any driver-level
    /// exception is already folded into `false` by the state store.
    pub async fn acquire(&self) -> bool {
        self.store.try_insert_lock(LOCK_NAME, self.client).await
    }

    /// `DELETE ... IF client = C` at consistency ALL. Succeeds only if we
    /// still owned the lock.
    pub async fn release(&self) -> bool {
        self.store.try_delete_lock(LOCK_NAME, self.client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_lock_draws_a_fresh_client_id() {
        // A process-global identifier should differ across processes;
        // within this test it just needs to be distinguishable.
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(a, b);
    }
}
