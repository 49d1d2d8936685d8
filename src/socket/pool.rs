//! Connection pool keyed by [`Route`].
//!
//! Leases reusable connections, enforcing a per-route and a global cap on
//! open connections. Counts include idle connections, so the number of
//! leased connections can never exceed either cap.

use crate::base::neterror::NetError;
use crate::config::PoolConfig;
use crate::socket::route::Route;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// A connection the pool can hold while idle.
pub trait Poolable: Send + Sync + 'static {
    /// False once the peer closed or the protocol state forbids reuse.
    fn is_open(&self) -> bool;
}

/// Opens new connections on a pool miss.
pub trait Connector: Send + Sync + 'static {
    type Connection: Poolable;

    fn connect(
        &self,
        route: &Route,
    ) -> impl Future<Output = Result<Self::Connection, NetError>> + Send;
}

/// A connection bound to exactly one route.
#[derive(Debug)]
pub struct PooledConnection<T> {
    id: u64,
    route: Route,
    reused: bool,
    created_at: Instant,
    inner: T,
}

impl<T> PooledConnection<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    /// True when the connection came from the idle set.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

/// Idle connection with metadata for timeout tracking.
struct IdleConnection<T> {
    conn: PooledConnection<T>,
    /// When this connection was returned to the pool
    since: Instant,
}

/// Per-route state tracking.
struct RouteState<T> {
    idle: VecDeque<IdleConnection<T>>,
    /// Leased connections, including ones still being connected.
    leased: usize,
}

impl<T> RouteState<T> {
    fn new() -> Self {
        Self { idle: VecDeque::new(), leased: 0 }
    }

    fn open(&self) -> usize {
        self.leased + self.idle.len()
    }

    fn is_empty(&self) -> bool {
        self.leased == 0 && self.idle.is_empty()
    }
}

enum Acquired<T> {
    Idle(PooledConnection<T>),
    Reserved(u64),
}

/// A reserved but not yet connected slot.
struct Reservation<'a, C: Connector> {
    pool: &'a ConnectionPool<C>,
    route: &'a Route,
    armed: bool,
}

impl<C: Connector> Reservation<'_, C> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<C: Connector> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(route = %self.route, "releasing unused reservation");
            self.pool.unreserve(self.route);
        }
    }
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,
    routes: DashMap<Route, RouteState<C::Connection>>,
    total_open: AtomicUsize,
    total_leased: AtomicUsize,
    next_id: AtomicU64,
    released: Notify,
}

/// Manages pooled connections, enforcing per-route and global limits.
pub struct ConnectionPool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_connections", &self.inner.config.max_connections)
            .field("max_connections_per_route", &self.inner.config.max_connections_per_route)
            .field("total_open", &self.total_open())
            .field("total_leased", &self.total_leased())
            .finish()
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(connector: C, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                routes: DashMap::new(),
                total_open: AtomicUsize::new(0),
                total_leased: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                released: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn connector(&self) -> &C {
        &self.inner.connector
    }

    /// Lease a connection for `route`.
    ///
    /// Returns an idle connection when one is usable, otherwise opens a new
    /// one if both limits allow it. With no `acquire_timeout` configured a
    /// limit hit fails immediately; otherwise the call waits for a release.
    pub async fn lease(&self, route: &Route) -> Result<Lease<C>, NetError> {
        let acquired = match self.inner.config.acquire_timeout {
            None => self.try_acquire(route)?,
            Some(timeout) => self.acquire_waiting(route, timeout).await?,
        };

        let conn = match acquired {
            Acquired::Idle(conn) => {
                tracing::debug!(route = %route, id = conn.id, "reusing pooled connection");
                conn
            }
            Acquired::Reserved(id) => {
                // Dropping the guard gives the slot back, also when this
                // future is cancelled mid-connect.
                let reservation = Reservation { pool: self, route, armed: true };
                let inner = self.inner.connector.connect(route).await?;
                reservation.disarm();
                tracing::debug!(route = %route, id, "opened new connection");
                PooledConnection {
                    id,
                    route: route.clone(),
                    reused: false,
                    created_at: Instant::now(),
                    inner,
                }
            }
        };

        Ok(Lease { pool: self.clone(), conn: Some(conn) })
    }

    async fn acquire_waiting(
        &self,
        route: &Route,
        timeout: Duration,
    ) -> Result<Acquired<C::Connection>, NetError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Register before checking so a release in between is not missed.
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_acquire(route) {
                Ok(acquired) => return Ok(acquired),
                Err(e) if e.is_capacity() => {
                    tracing::debug!(route = %route, "pool limit reached, waiting for release");
                }
                Err(e) => return Err(e),
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(NetError::PoolAcquireTimeout);
            }
        }
    }

    /// Single atomic capacity step: take an idle connection or reserve a slot.
    fn try_acquire(&self, route: &Route) -> Result<Acquired<C::Connection>, NetError> {
        let max_per_route = self.inner.config.max_connections_per_route;
        let idle_timeout = self.inner.config.pooled_idle_timeout;

        loop {
            {
                let mut state =
                    self.inner.routes.entry(route.clone()).or_insert_with(RouteState::new);

                // 1. Most recently returned idle connection first
                while let Some(idle) = state.idle.pop_back() {
                    if idle.since.elapsed() < idle_timeout && idle.conn.inner.is_open() {
                        state.leased += 1;
                        self.inner.total_leased.fetch_add(1, Ordering::AcqRel);
                        let mut conn = idle.conn;
                        conn.reused = true;
                        return Ok(Acquired::Idle(conn));
                    }
                    // Expired or dead, drop it and free the slot
                    self.inner.total_open.fetch_sub(1, Ordering::AcqRel);
                }

                // 2. Per-route limit
                if state.open() >= max_per_route {
                    return Err(NetError::MaxConnectionsPerRouteReached);
                }

                // 3. Global limit, checked and incremented in one step
                if self.try_reserve_global() {
                    state.leased += 1;
                    self.inner.total_leased.fetch_add(1, Ordering::AcqRel);
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    return Ok(Acquired::Reserved(id));
                }
            }

            // Global cap hit: close an idle connection elsewhere to make room.
            if !self.evict_one_idle(route) {
                return Err(NetError::MaxConnectionsReached);
            }
        }
    }

    fn try_reserve_global(&self) -> bool {
        let max = self.inner.config.max_connections;
        self.inner
            .total_open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    /// Close the oldest idle connection on any route other than `except`.
    fn evict_one_idle(&self, except: &Route) -> bool {
        for mut entry in self.inner.routes.iter_mut() {
            if entry.key() == except {
                continue;
            }
            if let Some(victim) = entry.value_mut().idle.pop_front() {
                self.inner.total_open.fetch_sub(1, Ordering::AcqRel);
                tracing::debug!(route = %entry.key(), id = victim.conn.id, "evicting idle connection under capacity pressure");
                return true;
            }
        }
        false
    }

    /// Undo a reservation whose connect attempt failed or was cancelled.
    fn unreserve(&self, route: &Route) {
        if let Some(mut state) = self.inner.routes.get_mut(route) {
            state.leased = state.leased.saturating_sub(1);
        }
        self.inner.total_leased.fetch_sub(1, Ordering::AcqRel);
        self.inner.total_open.fetch_sub(1, Ordering::AcqRel);
        self.inner.released.notify_waiters();
    }

    /// Return a connection. Reusable connections go back to the idle set,
    /// everything else is closed on the spot.
    pub fn release(&self, conn: PooledConnection<C::Connection>, reusable: bool) {
        let keep = reusable && conn.inner.is_open();
        {
            let mut state = self.inner.routes.entry(conn.route.clone()).or_insert_with(RouteState::new);
            state.leased = state.leased.saturating_sub(1);
            self.inner.total_leased.fetch_sub(1, Ordering::AcqRel);

            if keep {
                tracing::debug!(route = %conn.route, id = conn.id, "connection returned to pool");
                state.idle.push_back(IdleConnection { conn, since: Instant::now() });
            } else {
                tracing::debug!(route = %conn.route, id = conn.id, "closing connection");
                self.inner.total_open.fetch_sub(1, Ordering::AcqRel);
                drop(conn);
            }
        }
        self.inner.released.notify_waiters();
    }

    /// Evict idle connections past the idle timeout or no longer open.
    pub fn cleanup_idle(&self) -> usize {
        let timeout = self.inner.config.pooled_idle_timeout;
        let mut removed = 0;
        let mut empty_routes = Vec::new();

        for mut entry in self.inner.routes.iter_mut() {
            let state = entry.value_mut();
            let before = state.idle.len();
            state.idle.retain(|idle| idle.since.elapsed() < timeout && idle.conn.inner.is_open());
            removed += before - state.idle.len();

            if state.is_empty() {
                empty_routes.push(entry.key().clone());
            }
        }

        if removed > 0 {
            self.inner.total_open.fetch_sub(removed, Ordering::AcqRel);
            tracing::debug!(removed, "evicted idle connections");
            self.inner.released.notify_waiters();
        }

        for route in empty_routes {
            self.inner.routes.remove_if(&route, |_, state| state.is_empty());
        }

        removed
    }

    /// Close every idle connection.
    pub fn close_idle(&self) -> usize {
        let mut removed = 0;
        for mut entry in self.inner.routes.iter_mut() {
            removed += entry.value_mut().idle.drain(..).count();
        }
        if removed > 0 {
            self.inner.total_open.fetch_sub(removed, Ordering::AcqRel);
            self.inner.released.notify_waiters();
        }
        removed
    }

    /// Start a background task that periodically evicts idle connections.
    /// The task ends once the last pool handle is dropped. Does nothing
    /// outside a Tokio runtime; leases still skip expired connections.
    pub fn start_cleanup_task(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let weak: Weak<PoolInner<C>> = Arc::downgrade(&self.inner);
        let period = self.inner.config.cleanup_interval;
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                ConnectionPool { inner }.cleanup_idle();
            }
        });
    }

    /// Leased connections for `route`, including ones still connecting.
    pub fn leased_count(&self, route: &Route) -> usize {
        self.inner.routes.get(route).map(|s| s.leased).unwrap_or(0)
    }

    /// Leased plus idle connections for `route`.
    pub fn open_count(&self, route: &Route) -> usize {
        self.inner.routes.get(route).map(|s| s.open()).unwrap_or(0)
    }

    /// Get total idle connection count across all routes.
    pub fn idle_count(&self) -> usize {
        self.inner.routes.iter().map(|s| s.idle.len()).sum()
    }

    pub fn total_leased(&self) -> usize {
        self.inner.total_leased.load(Ordering::Acquire)
    }

    pub fn total_open(&self) -> usize {
        self.inner.total_open.load(Ordering::Acquire)
    }
}

/// Exclusive ownership of a leased connection.
///
/// Dropping a lease without calling [`Lease::release`] closes the
/// connection, so error and cancellation paths never leak a slot or
/// hand a half-used connection to another request.
pub struct Lease<C: Connector> {
    pool: ConnectionPool<C>,
    conn: Option<PooledConnection<C::Connection>>,
}

impl<C: Connector> Lease<C> {
    pub fn release(mut self, reusable: bool) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, reusable);
        }
    }

    pub fn close(self) {
        self.release(false);
    }

    pub fn id(&self) -> u64 {
        self.pooled().id
    }

    pub fn route(&self) -> &Route {
        &self.pooled().route
    }

    pub fn is_reused(&self) -> bool {
        self.pooled().reused
    }

    fn pooled(&self) -> &PooledConnection<C::Connection> {
        // Only `release` empties the slot and it consumes the lease.
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("lease used after release"),
        }
    }
}

impl<C: Connector> Deref for Lease<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        &self.pooled().inner
    }
}

impl<C: Connector> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(conn) => &mut conn.inner,
            None => unreachable!("lease used after release"),
        }
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn, false);
        }
    }
}

impl<C: Connector> std::fmt::Debug for Lease<C>
where
    C::Connection: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("conn", &self.conn).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    #[derive(Debug)]
    struct FakeConn {
        open: Arc<AtomicBool>,
    }

    impl Poolable for FakeConn {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    #[derive(Default)]
    struct FakeConnector {
        connects: AtomicUsize,
        fail: AtomicBool,
    }

    impl Connector for FakeConnector {
        type Connection = FakeConn;

        async fn connect(&self, _route: &Route) -> Result<FakeConn, NetError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(NetError::ConnectionRefused);
            }
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn { open: Arc::new(AtomicBool::new(true)) })
        }
    }

    fn pool(per_route: usize, total: usize) -> ConnectionPool<FakeConnector> {
        ConnectionPool::new(
            FakeConnector::default(),
            PoolConfig {
                max_connections: total,
                max_connections_per_route: per_route,
                ..Default::default()
            },
        )
    }

    fn route(host: &str) -> Route {
        Route::new("http", host, 80)
    }

    #[tokio::test]
    async fn test_reuse_after_release() {
        let pool = pool(2, 10);
        let r = route("a");

        let lease = pool.lease(&r).await.unwrap();
        assert!(!lease.is_reused());
        let id = lease.id();
        lease.release(true);
        assert_eq!(pool.idle_count(), 1);

        let lease = pool.lease(&r).await.unwrap();
        assert!(lease.is_reused());
        assert_eq!(lease.id(), id);
        assert_eq!(pool.connector().connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_per_route_limit_fails_fast() {
        let pool = pool(1, 10);
        let r = route("a");

        let _held = pool.lease(&r).await.unwrap();
        let err = pool.lease(&r).await.unwrap_err();
        assert_eq!(err, NetError::MaxConnectionsPerRouteReached);

        // Other routes are unaffected
        assert!(pool.lease(&route("b")).await.is_ok());
    }

    #[tokio::test]
    async fn test_global_limit() {
        let pool = pool(5, 2);
        let _a = pool.lease(&route("a")).await.unwrap();
        let _b = pool.lease(&route("b")).await.unwrap();
        let err = pool.lease(&route("c")).await.unwrap_err();
        assert_eq!(err, NetError::MaxConnectionsReached);
        assert_eq!(pool.total_leased(), 2);
    }

    #[tokio::test]
    async fn test_global_limit_evicts_idle_elsewhere() {
        let pool = pool(5, 1);
        pool.lease(&route("a")).await.unwrap().release(true);
        assert_eq!(pool.idle_count(), 1);

        let lease = pool.lease(&route("b")).await.unwrap();
        assert!(!lease.is_reused());
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.total_open(), 1);
    }

    #[tokio::test]
    async fn test_drop_closes_connection() {
        let pool = pool(1, 1);
        let r = route("a");
        {
            let _lease = pool.lease(&r).await.unwrap();
        }
        assert_eq!(pool.total_open(), 0);
        assert_eq!(pool.idle_count(), 0);
        assert!(pool.lease(&r).await.is_ok());
    }

    #[tokio::test]
    async fn test_dead_idle_connection_skipped() {
        let pool = pool(1, 1);
        let r = route("a");

        let lease = pool.lease(&r).await.unwrap();
        let flag = Arc::clone(&lease.open);
        lease.release(true);
        flag.store(false, Ordering::SeqCst);

        let lease = pool.lease(&r).await.unwrap();
        assert!(!lease.is_reused());
        assert_eq!(pool.total_open(), 1);
    }

    #[tokio::test]
    async fn test_release_not_reusable_closes() {
        let pool = pool(2, 2);
        let r = route("a");
        pool.lease(&r).await.unwrap().release(false);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.open_count(&r), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_frees_slot() {
        let pool = pool(1, 1);
        let r = route("a");
        pool.connector().fail.store(true, Ordering::SeqCst);
        assert_eq!(pool.lease(&r).await.unwrap_err(), NetError::ConnectionRefused);
        assert_eq!(pool.total_open(), 0);
        assert_eq!(pool.leased_count(&r), 0);

        pool.connector().fail.store(false, Ordering::SeqCst);
        assert!(pool.lease(&r).await.is_ok());
    }

    #[tokio::test]
    async fn test_waiting_mode_gets_released_connection() {
        let pool = ConnectionPool::new(
            FakeConnector::default(),
            PoolConfig {
                max_connections_per_route: 1,
                acquire_timeout: Some(Duration::from_secs(5)),
                ..Default::default()
            },
        );
        let r = route("a");
        let held = pool.lease(&r).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            let r = r.clone();
            tokio::spawn(async move { pool.lease(&r).await.map(|l| l.is_reused()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        held.release(true);

        assert_eq!(waiter.await.unwrap(), Ok(true));
    }

    #[tokio::test]
    async fn test_waiting_mode_times_out() {
        let pool = ConnectionPool::new(
            FakeConnector::default(),
            PoolConfig {
                max_connections_per_route: 1,
                acquire_timeout: Some(Duration::from_millis(30)),
                ..Default::default()
            },
        );
        let r = route("a");
        let _held = pool.lease(&r).await.unwrap();
        assert_eq!(pool.lease(&r).await.unwrap_err(), NetError::PoolAcquireTimeout);
    }

    #[tokio::test]
    async fn test_cleanup_idle_timeout() {
        let pool = ConnectionPool::new(
            FakeConnector::default(),
            PoolConfig { pooled_idle_timeout: Duration::from_secs(10), ..Default::default() },
        );
        let r = route("a");
        pool.lease(&r).await.unwrap().release(true);

        assert_eq!(pool.cleanup_idle(), 0);
        assert_eq!(pool.idle_count(), 1);

        let strict = ConnectionPool::new(
            FakeConnector::default(),
            PoolConfig { pooled_idle_timeout: Duration::ZERO, ..Default::default() },
        );
        strict.lease(&r).await.unwrap().release(true);
        assert_eq!(strict.cleanup_idle(), 1);
        assert_eq!(strict.total_open(), 0);
        assert_eq!(strict.open_count(&r), 0);
    }

    #[tokio::test]
    async fn test_close_idle() {
        let pool = pool(3, 3);
        pool.lease(&route("a")).await.unwrap().release(true);
        pool.lease(&route("b")).await.unwrap().release(true);
        assert_eq!(pool.close_idle(), 2);
        assert_eq!(pool.total_open(), 0);
    }
}
