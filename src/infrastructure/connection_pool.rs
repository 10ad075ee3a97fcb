//! Connection Pool
//!
//! Keeps open SQLite connections to the location database so a lookup
//! does not pay for opening the file every time.

use crate::error::PoolError;
use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Connection pool configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum open connections (idle + in use)
    pub max_connections: usize,
    /// Maximum time a connection can be idle
    pub idle_timeout: Duration,
    /// Maximum connection lifetime
    pub max_lifetime: Duration,
    /// How long `acquire` waits for a free connection
    pub acquire_timeout: Duration,
    /// SQLite busy handler timeout for lock contention
    pub busy_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(5),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// An open connection with its bookkeeping.
struct Slot {
    conn: Connection,
    created_at: Instant,
    last_used: Instant,
}

impl Slot {
    fn new(conn: Connection) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.created_at.elapsed() > max_lifetime
    }

    fn is_idle_expired(&self, idle_timeout: Duration) -> bool {
        self.last_used.elapsed() > idle_timeout
    }
}

struct PoolState {
    idle: VecDeque<Slot>,
    /// Connections currently open, idle or handed out
    open: usize,
}

/// Blocking pool of SQLite connections to one database file.
pub struct ConnectionPool {
    path: PathBuf,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Create a pool for the database at `path`. Connections are opened
    /// on demand.
    pub fn new(path: impl AsRef<Path>, config: PoolConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                open: 0,
            }),
            available: Condvar::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire a connection, reusing an idle one when possible.
    ///
    /// Blocks up to `acquire_timeout` when every connection is in use.
    /// The connection goes back to the pool when the guard is dropped.
    pub fn acquire(&self) -> Result<PooledConnection<'_>, PoolError> {
        let deadline = Instant::now() + self.config.acquire_timeout;
        let mut state = self.state.lock();

        loop {
            while let Some(mut slot) = state.idle.pop_front() {
                if slot.is_expired(self.config.max_lifetime)
                    || slot.is_idle_expired(self.config.idle_timeout)
                {
                    tracing::debug!("discarding stale connection to {}", self.path.display());
                    state.open -= 1;
                    continue;
                }
                slot.last_used = Instant::now();
                return Ok(PooledConnection::new(slot, self));
            }

            if state.open < self.config.max_connections {
                state.open += 1;
                drop(state);
                return match self.open_connection() {
                    Ok(conn) => Ok(PooledConnection::new(Slot::new(conn), self)),
                    Err(e) => {
                        self.state.lock().open -= 1;
                        self.available.notify_one();
                        Err(e)
                    }
                };
            }

            if self.available.wait_until(&mut state, deadline).timed_out() {
                return Err(PoolError::Timeout);
            }
        }
    }

    fn open_connection(&self) -> Result<Connection, PoolError> {
        let conn = Connection::open(&self.path).map_err(PoolError::Open)?;
        conn.busy_timeout(self.config.busy_timeout)
            .map_err(PoolError::Open)?;
        Ok(conn)
    }

    fn release(&self, mut slot: Slot) {
        let mut state = self.state.lock();

        if !slot.conn.is_autocommit() {
            // a transaction leaked past its scope; the connection is unusable
            tracing::warn!("discarding connection left inside a transaction");
            state.open -= 1;
        } else if slot.is_expired(self.config.max_lifetime) {
            state.open -= 1;
        } else {
            slot.last_used = Instant::now();
            state.idle.push_back(slot);
        }

        drop(state);
        self.available.notify_one();
    }

    fn forget(&self) {
        self.state.lock().open -= 1;
        self.available.notify_one();
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            open: state.open,
            idle: state.idle.len(),
        }
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections open (idle + in use)
    pub open: usize,
    /// Connections waiting in the pool
    pub idle: usize,
}

impl PoolStats {
    pub fn in_use(&self) -> usize {
        self.open - self.idle
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Returned to the pool on drop, on every exit path.
pub struct PooledConnection<'a> {
    slot: Option<Slot>,
    pool: &'a ConnectionPool,
}

impl<'a> PooledConnection<'a> {
    fn new(slot: Slot, pool: &'a ConnectionPool) -> Self {
        Self {
            slot: Some(slot),
            pool,
        }
    }

    /// Close the connection instead of returning it to the pool.
    pub fn discard(mut self) {
        if self.slot.take().is_some() {
            self.pool.forget();
        }
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // slot is only taken by discard/drop, which consume the guard
        &self.slot.as_ref().expect("pooled connection present").conn
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        &mut self.slot.as_mut().expect("pooled connection present").conn
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.pool.release(slot);
        }
    }
}
