//! Named pools of shared backend clients.
//!
//! Backends that support pooling hand out one client per
//! `(pool name, server, credentials)` key to every output that asks for
//! it. Borrowers receive [`Handle::Pooled`](crate::guard::Handle::Pooled)
//! and never close the client; it lives until the pool is cleared.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// Pool entry key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub pool: String,
    pub server: String,
    credentials: String,
}

impl PoolKey {
    pub fn new(
        pool: impl Into<String>,
        server: impl Into<String>,
        credentials: impl Into<String>,
    ) -> Self {
        Self {
            pool: pool.into(),
            server: server.into(),
            credentials: credentials.into(),
        }
    }
}

// credentials stay out of logs
impl fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolKey")
            .field("pool", &self.pool)
            .field("server", &self.server)
            .field("credentials", &"<redacted>")
            .finish()
    }
}

/// Process-wide table of shared clients.
pub struct SharedPool<C> {
    entries: Mutex<HashMap<PoolKey, Arc<C>>>,
}

impl<C> SharedPool<C> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the client for `key`, creating it with `create` on first use.
    ///
    /// Creation runs under the pool lock, so concurrent callers for the
    /// same key share a single client.
    pub fn get_or_try_insert_with<E>(
        &self,
        key: PoolKey,
        create: impl FnOnce() -> Result<C, E>,
    ) -> Result<Arc<C>, E> {
        let mut entries = self.entries.lock();
        if let Some(client) = entries.get(&key) {
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(create()?);
        tracing::debug!(pool = %key.pool, server = %key.server, "created pooled client");
        entries.insert(key, Arc::clone(&client));
        Ok(client)
    }

    pub fn get(&self, key: &PoolKey) -> Option<Arc<C>> {
        self.entries.lock().get(key).cloned()
    }

    /// Removes one entry. Borrowers keep their reference until they drop it.
    pub fn evict(&self, key: &PoolKey) -> Option<Arc<C>> {
        self.entries.lock().remove(key)
    }

    /// Pool teardown.
    pub fn clear(&self) {
        let drained = {
            let mut entries = self.entries.lock();
            let count = entries.len();
            entries.clear();
            count
        };
        if drained > 0 {
            tracing::debug!(entries = drained, "cleared shared client pool");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl<C> Default for SharedPool<C> {
    fn default() -> Self {
        Self::new()
    }
}
