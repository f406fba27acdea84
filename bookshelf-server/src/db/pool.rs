//! Database connection pool management
//!
//! A fixed set of connections, opened lazily and exactly once.
//!
//! # Lifecycle
//!
//! `Uninitialized -> Initializing -> Ready | Failed`, at most once per pool.
//! The first caller of [`ConnectionPool::acquire`] (or
//! [`ConnectionPool::initialize`]) starts population on a runtime task; every
//! caller, the first included, then waits on the same state channel with a
//! bounded timeout. Population continues even if the caller that started it
//! goes away. `Failed` is terminal; [`ConnectionPool::drain`] is the only
//! way from `Ready` to `Failed`.
//!
//! # Checkout
//!
//! Connections live in numbered slots. A checkout takes the first idle slot
//! whose connection is open, under a short mutex that is never held across
//! an await. The connection moves out into a [`PooledConnection`] guard and
//! goes back when the guard is released or dropped. Closed connections are
//! retired and never handed out again.

use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;

use super::connection::{Connection, Connector, Row, Value};
use super::error::{PoolError, PoolFailure, QueryError};

/// Default number of connections in the pool.
pub const DEFAULT_POOL_SIZE: usize = 10;

const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pool sizing and wait bounds
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Number of connections opened during initialization
    pub size: usize,
    /// How long `acquire` waits for a connection to be released
    pub acquire_timeout: Duration,
    /// How long `acquire` waits for initialization to finish
    pub init_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            size: DEFAULT_POOL_SIZE,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
        }
    }
}

/// Observable initialization state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Uninitialized,
    Initializing,
    Ready,
    Failed,
}

/// Point-in-time view of the pool, for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub state: PoolState,
    pub size: usize,
    pub idle: usize,
    pub in_use: usize,
    pub retired: usize,
}

#[derive(Debug, Clone)]
enum InitState {
    Uninitialized,
    Initializing,
    Ready,
    Failed(Arc<PoolFailure>),
}

impl InitState {
    fn is_settled(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed(_))
    }
}

impl From<&InitState> for PoolState {
    fn from(state: &InitState) -> Self {
        match state {
            InitState::Uninitialized => Self::Uninitialized,
            InitState::Initializing => Self::Initializing,
            InitState::Ready => Self::Ready,
            InitState::Failed(_) => Self::Failed,
        }
    }
}

enum Slot {
    Idle(Box<dyn Connection>),
    CheckedOut,
    Retired,
}

struct PoolInner {
    connector: Box<dyn Connector>,
    options: PoolOptions,
    state: watch::Sender<InitState>,
    slots: Mutex<Vec<Slot>>,
    released: Notify,
}

/// Fixed-size pool of database connections.
///
/// Cheap to clone; all clones share the same slots and state.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create an empty, uninitialized pool. No connection is opened here.
    pub fn new(connector: impl Connector, options: PoolOptions) -> Self {
        let (state, _) = watch::channel(InitState::Uninitialized);
        Self {
            inner: Arc::new(PoolInner {
                connector: Box::new(connector),
                options,
                state,
                slots: Mutex::new(Vec::new()),
                released: Notify::new(),
            }),
        }
    }

    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    pub fn state(&self) -> PoolState {
        PoolState::from(&*self.inner.state.borrow())
    }

    /// Run initialization now instead of on first use.
    ///
    /// Same once-only barrier as `acquire`: a second call, or a call racing
    /// with `acquire`, waits for the one population in progress.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        self.wait_ready().await
    }

    /// Check out a connection.
    ///
    /// Initializes the pool on first use. Once ready, hands out the first idle
    /// open connection, waiting up to `acquire_timeout` for one to be released.
    ///
    /// # Errors
    ///
    /// - `InitFailed` if the pool is in its failed state
    /// - `InitTimeout` if initialization did not settle within `init_timeout`
    /// - `Exhausted` if every connection is retired, or none was released in time
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        self.wait_ready().await?;

        let deadline = Instant::now() + self.inner.options.acquire_timeout;
        loop {
            // Register for wakeups before scanning so a release between the
            // scan and the wait is not missed.
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some((id, conn)) = self.inner.checkout()? {
                tracing::trace!(slot = id, "connection checked out");
                return Ok(PooledConnection {
                    id,
                    conn,
                    pool: Arc::clone(&self.inner),
                });
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(
                    pool_size = self.inner.options.size,
                    waited = ?self.inner.options.acquire_timeout,
                    "no connection released in time"
                );
                return Err(PoolError::Exhausted {
                    reason: "timed out waiting for a connection to be released",
                });
            }
        }
    }

    /// Return a checked-out connection. Equivalent to dropping the guard.
    pub fn release(&self, conn: PooledConnection) {
        debug_assert!(Arc::ptr_eq(&self.inner, &conn.pool));
        drop(conn);
    }

    /// Take the pool out of service.
    ///
    /// Moves the pool to `Failed`, closes idle connections now and checked-out
    /// ones as they are released. Later `acquire` calls fail with `InitFailed`.
    pub async fn drain(&self) {
        let mut drained = false;
        self.inner.state.send_if_modified(|state| {
            if matches!(state, InitState::Failed(_)) {
                // Keep the original failure cause.
                false
            } else {
                *state = InitState::Failed(Arc::new(PoolFailure::Drained));
                drained = true;
                true
            }
        });
        if !drained {
            return;
        }

        let idle = take_idle(&mut self.inner.lock_slots());
        self.inner.released.notify_waiters();

        tracing::info!(closed = idle.len(), "draining connection pool");
        for mut conn in idle {
            conn.close().await;
        }
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.state();
        let slots = self.inner.lock_slots();
        let mut status = PoolStatus {
            state,
            size: self.inner.options.size,
            idle: 0,
            in_use: 0,
            retired: 0,
        };
        for slot in slots.iter() {
            match slot {
                Slot::Idle(_) => status.idle += 1,
                Slot::CheckedOut => status.in_use += 1,
                Slot::Retired => status.retired += 1,
            }
        }
        status
    }

    async fn wait_ready(&self) -> Result<(), PoolError> {
        let mut rx = self.inner.state.subscribe();

        let mut start = false;
        self.inner.state.send_if_modified(|state| {
            if matches!(state, InitState::Uninitialized) {
                *state = InitState::Initializing;
                start = true;
                true
            } else {
                false
            }
        });
        if start {
            tokio::spawn(Arc::clone(&self.inner).populate());
        }

        let waited = self.inner.options.init_timeout;
        let settled = match tokio::time::timeout(waited, rx.wait_for(InitState::is_settled)).await
        {
            Err(_) => return Err(PoolError::InitTimeout { waited }),
            // The sender lives in `inner`, which we hold; a closed channel
            // cannot happen, but treat it as an aborted init.
            Ok(Err(_)) => InitState::Failed(Arc::new(PoolFailure::Aborted)),
            Ok(Ok(state)) => state.clone(),
        };

        match settled {
            InitState::Failed(cause) => Err(PoolError::InitFailed { cause }),
            _ => Ok(()),
        }
    }
}

/// Moves the pool to `Failed` if population stops before settling,
/// e.g. the runtime shut down mid-initialization.
struct PopulateGuard<'a> {
    state: &'a watch::Sender<InitState>,
}

impl Drop for PopulateGuard<'_> {
    fn drop(&mut self) {
        self.state.send_if_modified(|state| {
            if matches!(state, InitState::Initializing) {
                *state = InitState::Failed(Arc::new(PoolFailure::Aborted));
                true
            } else {
                false
            }
        });
    }
}

impl PoolInner {
    fn lock_slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        // Slot bookkeeping stays consistent at every await-free step,
        // so a panic elsewhere cannot leave it half-updated.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn populate(self: Arc<Self>) {
        let _guard = PopulateGuard { state: &self.state };
        let size = self.options.size;
        tracing::info!(pool_size = size, "opening database connections");

        let mut opened = Vec::with_capacity(size);
        let mut failure = None;
        for slot in 0..size {
            match self.connector.open().await {
                Ok(conn) => opened.push(conn),
                Err(source) => {
                    tracing::warn!(slot, error = %source, "database connection failed to open");
                    failure = Some(PoolFailure::Connect { slot, size, source });
                    break;
                }
            }
        }

        if let Some(failure) = failure {
            // Never keep half of a pool around.
            for mut conn in opened {
                conn.close().await;
            }
            tracing::error!(error = %failure, "connection pool initialization failed");
            self.settle(InitState::Failed(Arc::new(failure)));
            return;
        }

        *self.lock_slots() = opened.into_iter().map(Slot::Idle).collect();
        if self.settle(InitState::Ready) {
            tracing::info!(pool_size = size, "connection pool ready");
            return;
        }

        // Drained while we were connecting.
        let conns = take_idle(&mut self.lock_slots());
        for mut conn in conns {
            conn.close().await;
        }
    }

    /// Leave `Initializing` for `next`. Returns false if someone else
    /// (a concurrent drain) settled the state first.
    fn settle(&self, next: InitState) -> bool {
        let mut next = Some(next);
        self.state.send_if_modified(|state| {
            match (&*state, next.take()) {
                (InitState::Initializing, Some(next)) => {
                    *state = next;
                    true
                }
                _ => false,
            }
        })
    }

    fn checkout(&self) -> Result<Option<(usize, Box<dyn Connection>)>, PoolError> {
        if let InitState::Failed(cause) = &*self.state.borrow() {
            return Err(PoolError::InitFailed {
                cause: Arc::clone(cause),
            });
        }

        let mut slots = self.lock_slots();
        let mut in_use = 0;
        for (id, slot) in slots.iter_mut().enumerate() {
            match slot {
                Slot::Idle(conn) if conn.is_open() => {}
                Slot::Idle(_) => {
                    tracing::warn!(slot = id, "retiring closed connection");
                    *slot = Slot::Retired;
                    continue;
                }
                Slot::CheckedOut => {
                    in_use += 1;
                    continue;
                }
                Slot::Retired => continue,
            }
            if let Slot::Idle(conn) = mem::replace(slot, Slot::CheckedOut) {
                return Ok(Some((id, conn)));
            }
        }

        if in_use == 0 {
            tracing::warn!("every pooled connection has been retired");
            return Err(PoolError::Exhausted {
                reason: "every connection has been retired",
            });
        }
        Ok(None)
    }

    fn checkin(&self, id: usize, conn: Box<dyn Connection>) {
        let draining = matches!(*self.state.borrow(), InitState::Failed(_));
        let open = conn.is_open();

        let retired = {
            let mut slots = self.lock_slots();
            match slots.get_mut(id) {
                Some(slot) if open && !draining => {
                    *slot = Slot::Idle(conn);
                    None
                }
                Some(slot) => {
                    *slot = Slot::Retired;
                    Some(conn)
                }
                None => Some(conn),
            }
        };

        match retired {
            None => self.released.notify_one(),
            Some(conn) => {
                if !open {
                    tracing::warn!(slot = id, "retiring connection returned closed");
                }
                // Waiters must rescan: the pool may now be exhausted.
                self.released.notify_waiters();
                close_detached(conn, open);
            }
        }
    }
}

/// Retire every idle slot, handing back its connection for closing
fn take_idle(slots: &mut [Slot]) -> Vec<Box<dyn Connection>> {
    slots
        .iter_mut()
        .filter_map(|slot| match slot {
            Slot::Idle(_) => match mem::replace(slot, Slot::Retired) {
                Slot::Idle(conn) => Some(conn),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

/// Close a connection that no longer belongs to any slot. Drop cannot
/// await, so the close runs on the current runtime if there is one.
fn close_detached(mut conn: Box<dyn Connection>, open: bool) {
    if !open {
        return;
    }
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move { conn.close().await });
        }
        Err(_) => {
            tracing::debug!("no runtime to close connection; dropping session");
        }
    }
}

/// Placeholder left in a guard after its connection went back to the pool
struct Detached;

#[async_trait]
impl Connection for Detached {
    async fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, QueryError> {
        Err(super::error::ConnectionError::Closed.into())
    }

    async fn close(&mut self) {}

    fn is_open(&self) -> bool {
        false
    }
}

/// A connection checked out of the pool.
///
/// Derefs to the connection. Goes back to the pool on [`release`](Self::release)
/// or drop, on every path: success, error, or the owning future being cancelled.
pub struct PooledConnection {
    id: usize,
    conn: Box<dyn Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    /// Slot number of this connection, stable for the pool's lifetime
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn release(self) {}
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("open", &self.conn.is_open())
            .finish()
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = mem::replace(&mut self.conn, Box::new(Detached));
        tracing::trace!(slot = self.id, "connection released");
        self.pool.checkin(self.id, conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::error::ConnectionError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Stub {
        open: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connection for Stub {
        async fn query(&mut self, _sql: &str, _params: &[Value]) -> Result<Vec<Row>, QueryError> {
            Ok(Vec::new())
        }

        async fn close(&mut self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct StubConnector {
        opened: Arc<AtomicUsize>,
        handles: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
    }

    #[async_trait]
    impl Connector for StubConnector {
        async fn open(&self) -> Result<Box<dyn Connection>, ConnectionError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let open = Arc::new(AtomicBool::new(true));
            self.handles.lock().unwrap().push(Arc::clone(&open));
            Ok(Box::new(Stub { open }))
        }
    }

    fn options(size: usize) -> PoolOptions {
        PoolOptions {
            size,
            acquire_timeout: Duration::from_millis(50),
            init_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn new_pool_opens_nothing() {
        let connector = StubConnector::default();
        let opened = Arc::clone(&connector.opened);
        let pool = ConnectionPool::new(connector, options(3));

        assert_eq!(pool.state(), PoolState::Uninitialized);
        assert_eq!(opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn acquire_picks_first_idle_slot() {
        let pool = ConnectionPool::new(StubConnector::default(), options(3));

        let first = pool.acquire().await.unwrap();
        let second = pool.acquire().await.unwrap();
        assert_eq!((first.id(), second.id()), (0, 1));

        pool.release(first);
        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), 0);
        assert_eq!(pool.status().in_use, 2);
    }

    #[tokio::test]
    async fn closed_connection_is_retired_not_handed_out() {
        let connector = StubConnector::default();
        let handles = Arc::clone(&connector.handles);
        let pool = ConnectionPool::new(connector, options(2));
        pool.initialize().await.unwrap();

        handles.lock().unwrap()[0].store(false, Ordering::SeqCst);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), 1);
        assert_eq!(pool.status().retired, 1);
    }

    #[tokio::test]
    async fn connection_closed_while_checked_out_is_retired_on_release() {
        let pool = ConnectionPool::new(StubConnector::default(), options(1));

        let mut conn = pool.acquire().await.unwrap();
        conn.close().await;
        drop(conn);

        let status = pool.status();
        assert_eq!((status.idle, status.retired), (0, 1));
        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn acquire_times_out_when_all_checked_out() {
        let pool = ConnectionPool::new(StubConnector::default(), options(1));
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn drain_closes_idle_and_fails_later_acquires() {
        let connector = StubConnector::default();
        let handles = Arc::clone(&connector.handles);
        let pool = ConnectionPool::new(connector, options(2));

        let held = pool.acquire().await.unwrap();
        pool.drain().await;
        assert_eq!(pool.state(), PoolState::Failed);

        let open_now = |handles: &Arc<Mutex<Vec<Arc<AtomicBool>>>>| {
            handles
                .lock()
                .unwrap()
                .iter()
                .filter(|h| h.load(Ordering::SeqCst))
                .count()
        };
        assert_eq!(open_now(&handles), 1);

        let err = pool.acquire().await.unwrap_err();
        match err {
            PoolError::InitFailed { cause } => assert!(matches!(*cause, PoolFailure::Drained)),
            other => panic!("unexpected error: {other:?}"),
        }

        drop(held);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(open_now(&handles), 0);
        assert_eq!(pool.status().retired, 2);
    }
}
