//! Bounded pool for heavyweight client handles
//!
//! At most `pool_size` connections exist at once. Acquire reuses a fresh
//! idle connection, closes stale ones, creates new ones under the cap, and
//! otherwise waits until `timeout` for a release. Idle connections older
//! than `max_idle_time` are closed on the next acquire.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{Error, Result};

/// Creates and tears down the pooled connections
#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Send;

    /// Open a new connection
    async fn connect(&self) -> Result<Self::Conn>;

    /// Close a connection; default is drop
    async fn disconnect(&self, conn: Self::Conn) {
        drop(conn);
    }
}

/// Pool statistics counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub acquired: u64,
    pub released: u64,
    pub created: u64,
    pub closed: u64,
    pub reused: u64,
    pub waited: u64,
    /// Connections currently handed out
    pub in_use: usize,
    /// Connections currently idle in the pool
    pub pooled: usize,
}

/// A connection handed out by the pool; return it with
/// [`ConnectionPool::release`].
#[derive(Debug)]
pub struct Pooled<T> {
    pub conn: T,
    id: u64,
    created_at: Instant,
}

struct IdleEntry<T> {
    conn: T,
    created_at: Instant,
    last_used: Instant,
}

struct PoolState<T> {
    idle: VecDeque<(u64, IdleEntry<T>)>,
    in_use: HashMap<u64, Instant>,
    /// Live connections: idle + in-use + reserved slots mid-connect
    created: usize,
    next_id: u64,
    stats: PoolStats,
}

enum Acquired<T> {
    Reuse(Pooled<T>),
    Create(u64),
    Wait,
}

/// Bounded connection pool with idle expiry and blocking acquire
pub struct ConnectionPool<C: Connector> {
    connector: C,
    config: PoolConfig,
    state: Mutex<PoolState<C::Conn>>,
    notify: Notify,
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        ConnectionPool {
            connector,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                in_use: HashMap::new(),
                created: 0,
                next_id: 0,
                stats: PoolStats::default(),
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState<C::Conn>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquire a connection within the pool's default timeout
    pub async fn acquire(&self) -> Result<Pooled<C::Conn>> {
        self.acquire_timeout(self.config.timeout).await
    }

    /// Acquire a connection, waiting at most `timeout`
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<Pooled<C::Conn>> {
        let deadline = Instant::now() + timeout;
        self.lock().stats.acquired += 1;

        loop {
            let mut stale: Vec<C::Conn> = Vec::new();
            let decision = {
                let mut state = self.lock();

                let mut reused = None;
                while let Some((id, entry)) = state.idle.pop_front() {
                    if entry.last_used.elapsed() < self.config.max_idle_time {
                        state.in_use.insert(id, Instant::now());
                        state.stats.reused += 1;
                        debug!("Reusing pooled connection {} ({} idle)", id, state.idle.len());
                        reused = Some(Pooled {
                            conn: entry.conn,
                            id,
                            created_at: entry.created_at,
                        });
                        break;
                    }
                    state.created -= 1;
                    state.stats.closed += 1;
                    stale.push(entry.conn);
                }

                match reused {
                    Some(pooled) => Acquired::Reuse(pooled),
                    None if state.created < self.config.pool_size => {
                        state.created += 1;
                        let id = state.next_id;
                        state.next_id += 1;
                        Acquired::Create(id)
                    }
                    None => {
                        state.stats.waited += 1;
                        Acquired::Wait
                    }
                }
            };

            for conn in stale {
                self.connector.disconnect(conn).await;
            }

            match decision {
                Acquired::Reuse(pooled) => return Ok(pooled),
                Acquired::Create(id) => {
                    info!("Creating new pooled connection {}", id);
                    match self.connector.connect().await {
                        Ok(conn) => {
                            let mut state = self.lock();
                            state.in_use.insert(id, Instant::now());
                            state.stats.created += 1;
                            return Ok(Pooled {
                                conn,
                                id,
                                created_at: Instant::now(),
                            });
                        }
                        Err(e) => {
                            self.lock().created -= 1;
                            self.notify.notify_one();
                            return Err(e);
                        }
                    }
                }
                Acquired::Wait => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(Error::PoolExhausted {
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                    debug!("Waiting for an available connection");
                    if tokio::time::timeout(deadline - now, self.notify.notified())
                        .await
                        .is_err()
                    {
                        return Err(Error::PoolExhausted {
                            timeout_secs: timeout.as_secs(),
                        });
                    }
                }
            }
        }
    }

    /// Return a connection to the pool. Releasing a handle the pool does
    /// not know is a logged warning, not an error.
    pub async fn release(&self, pooled: Pooled<C::Conn>) {
        let Pooled {
            conn,
            id,
            created_at,
        } = pooled;

        let overflow = {
            let mut state = self.lock();
            state.stats.released += 1;

            if state.in_use.remove(&id).is_none() {
                warn!("Attempting to release unknown connection: {}", id);
                None
            } else if state.idle.len() < self.config.pool_size {
                state.idle.push_back((
                    id,
                    IdleEntry {
                        conn,
                        created_at,
                        last_used: Instant::now(),
                    },
                ));
                debug!("Released connection {} back to pool", id);
                self.notify.notify_one();
                return;
            } else {
                state.created -= 1;
                state.stats.closed += 1;
                Some(conn)
            }
        };

        if let Some(conn) = overflow {
            self.connector.disconnect(conn).await;
        }
        self.notify.notify_one();
    }

    /// Close pooled connections, forget in-use ones, and wake all waiters
    pub async fn close_all(&self) {
        let drained = {
            let mut state = self.lock();
            let drained: Vec<C::Conn> = state
                .idle
                .drain(..)
                .map(|(_, entry)| entry.conn)
                .collect();
            state.stats.closed += drained.len() as u64 + state.in_use.len() as u64;
            state.in_use.clear();
            state.created = 0;
            drained
        };

        for conn in drained {
            self.connector.disconnect(conn).await;
        }

        let stats = self.stats();
        info!("Closed all connections. Stats: {:?}", stats);
        self.notify.notify_waiters();
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            in_use: state.in_use.len(),
            pooled: state.idle.len(),
            ..state.stats.clone()
        }
    }
}
