//! Connection Pool
//!
//! Supervises a set of [`Connection`]s and picks one per checkout. The pool
//! does not lease connections exclusively - the tracker is concurrent-safe,
//! so any number of callers may share one connection - which makes `checkin`
//! a no-op and checkout a pure function of the live set, the strategy, and
//! the round-robin counter.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use rand::Rng;
use tracing::{debug, info};

use crate::client::{Connection, ConnectionStatus};
use crate::config::ConnectionConfig;
use crate::protocol::error::{McpError, McpResult};

/// How `checkout` picks among live connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Cycle through live connections with a shared counter
    #[default]
    RoundRobin,
    /// Uniform over live connections
    Random,
    /// Fewest pending requests wins (ties broken arbitrarily)
    LeastBusy,
}

/// A set of connections plus a selection strategy.
pub struct Pool {
    connections: RwLock<Vec<Connection>>,
    counter: AtomicUsize,
    strategy: Strategy,
}

impl Pool {
    /// Create an empty pool.
    pub fn new(strategy: Strategy) -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            counter: AtomicUsize::new(0),
            strategy,
        }
    }

    /// Connect `size` homogeneous connections from one template config.
    ///
    /// Fails if any connection fails to come up; connections already
    /// established are disconnected again.
    pub async fn connect(size: usize, config: ConnectionConfig, strategy: Strategy) -> McpResult<Self> {
        let mut configs = Vec::with_capacity(size);
        configs.resize(size, config);
        Self::connect_each(configs, strategy).await
    }

    /// Connect one connection per config (heterogeneous pool).
    pub async fn connect_each(
        configs: Vec<ConnectionConfig>,
        strategy: Strategy,
    ) -> McpResult<Self> {
        let pool = Self::new(strategy);
        for config in configs {
            match Connection::connect(config).await {
                Ok(connection) => pool.add_connection(connection),
                Err(e) => {
                    pool.disconnect_all().await;
                    return Err(e);
                }
            }
        }
        info!(size = pool.len(), strategy = ?strategy, "connection pool ready");
        Ok(pool)
    }

    /// Add a connection at runtime.
    pub fn add_connection(&self, connection: Connection) {
        write_lock(&self.connections).push(connection);
        debug!(size = self.len(), "connection added to pool");
    }

    /// Remove a connection at runtime (matched by identity).
    ///
    /// The connection is only removed from the set; the caller decides
    /// whether to disconnect it.
    pub fn remove_connection(&self, connection: &Connection) -> bool {
        let mut connections = write_lock(&self.connections);
        let before = connections.len();
        connections.retain(|c| !c.same_connection(connection));
        let removed = connections.len() < before;
        if removed {
            debug!(size = connections.len(), "connection removed from pool");
        }
        removed
    }

    /// Number of connections in the pool (live or not).
    pub fn len(&self) -> usize {
        read_lock(&self.connections).len()
    }

    /// Whether the pool holds no connections at all.
    pub fn is_empty(&self) -> bool {
        read_lock(&self.connections).is_empty()
    }

    /// Number of connections currently in the `ready` state.
    pub fn live_count(&self) -> usize {
        read_lock(&self.connections)
            .iter()
            .filter(|c| c.status() == ConnectionStatus::Ready)
            .count()
    }

    /// Pick a connection according to the pool's strategy.
    ///
    /// Only currently-live (`ready`) connections are observed. Fails with
    /// [`McpError::NoConnections`] when none qualify.
    pub fn checkout(&self) -> McpResult<Connection> {
        let connections = read_lock(&self.connections);
        let live: Vec<&Connection> = connections
            .iter()
            .filter(|c| c.status() == ConnectionStatus::Ready)
            .collect();

        if live.is_empty() {
            return Err(McpError::NoConnections);
        }

        let picked = match self.strategy {
            Strategy::RoundRobin => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                live[n % live.len()]
            }
            Strategy::Random => {
                let index = rand::rng().random_range(0..live.len());
                live[index]
            }
            Strategy::LeastBusy => live
                .iter()
                .min_by_key(|c| c.pending_count())
                .copied()
                .expect("live set is non-empty"),
        };

        Ok((*picked).clone())
    }

    /// Return a connection to the pool. A no-op: connections are shared,
    /// never leased.
    pub fn checkin(&self, _connection: Connection) {}

    /// Check out a connection, run `f` with it, and check it back in on all
    /// exit paths.
    pub async fn transaction<F, Fut, T>(&self, f: F) -> McpResult<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = McpResult<T>>,
    {
        let connection = self.checkout()?;
        let result = f(connection.clone()).await;
        self.checkin(connection);
        result
    }

    /// Disconnect every connection and clear the set.
    pub async fn disconnect_all(&self) {
        let connections: Vec<Connection> = write_lock(&self.connections).drain(..).collect();
        for connection in connections {
            connection.disconnect().await;
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("strategy", &self.strategy)
            .field("size", &self.len())
            .field("live", &self.live_count())
            .finish()
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
