//! Keyed connection pool.
//!
//! Connections are pooled by destination identity: scheme, host, port,
//! the proxy used to reach it, and the TLS configuration in play. Each
//! key holds a bounded set of idle connections and a bounded total count
//! of live connections; checkouts beyond the cap park until a connection
//! is returned or a dial slot frees up.
//!
//! A checked-out connection travels inside a [`Pooled`] guard. Dropping
//! the guard discards the connection. Returning it to the pool requires
//! an explicit [`Pooled::release`], which only happens after a response
//! has been read to completion.

use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

use crate::tls::TlsConfigId;
use crate::Error;

mod idle;

use idle::IdleConnections;

/// Connections which can be parked in the pool between requests.
pub(crate) trait PoolableConnection: Send + 'static {
    /// Can this connection still carry a request? Closed connections are
    /// discarded rather than handed out.
    fn is_open(&self) -> bool;
}

/// Destination identity used to group reusable connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct PoolKey {
    pub(crate) https: bool,
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) proxy: Option<String>,
    pub(crate) tls: Option<TlsConfigId>,
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.https { "https" } else { "http" };
        write!(f, "{}://{}:{}", scheme, self.host, self.port)?;
        if let Some(proxy) = &self.proxy {
            write!(f, " via {proxy}")?;
        }
        Ok(())
    }
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Idle connections retained per key.
    pub(crate) max_idle_per_key: usize,

    /// Total live connections per key. Checkouts beyond this park until
    /// a connection is returned or discarded.
    pub(crate) max_per_key: usize,

    /// Total live connections across every key. At this cap a checkout
    /// first evicts an idle connection of another key, and otherwise
    /// parks until a slot frees anywhere in the pool.
    pub(crate) max_total: usize,

    /// Idle connections older than this are discarded on checkout.
    pub(crate) idle_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_idle_per_key: 8,
            max_per_key: 32,
            max_total: 128,
            idle_timeout: Some(Duration::from_secs(90)),
        }
    }
}

/// What a checkout produced: a connection to reuse, or permission to
/// dial a new one.
#[derive(Debug)]
pub(crate) enum Checkout<C: PoolableConnection> {
    Reused(Pooled<C>),
    Dial(Permit<C>),
}

enum Handoff<C> {
    Reuse(C),
    Permit,
}

pub(crate) struct Pool<C: PoolableConnection> {
    inner: Arc<Mutex<PoolInner<C>>>,
}

impl<C: PoolableConnection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: PoolableConnection> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").finish_non_exhaustive()
    }
}

struct PoolInner<C: PoolableConnection> {
    config: Config,
    closed: bool,
    /// Live connections across every key: leased, dialing and idle.
    total: usize,
    idle: HashMap<PoolKey, IdleConnections<C>>,
    counts: HashMap<PoolKey, usize>,
    waiting: HashMap<PoolKey, VecDeque<oneshot::Sender<Handoff<C>>>>,
}

impl<C: PoolableConnection> PoolInner<C> {
    fn decrement(&mut self, key: &PoolKey, by: usize) {
        if by == 0 {
            return;
        }
        if let Some(count) = self.counts.get_mut(key) {
            *count = count.saturating_sub(by);
            if *count == 0 {
                self.counts.remove(key);
            }
        }
        self.total = self.total.saturating_sub(by);
    }

    /// Retire `by` connections of `key` and hand the freed pool-wide
    /// slots to checkouts parked under other keys.
    fn retire(&mut self, key: &PoolKey, by: usize) {
        self.decrement(key, by);
        for _ in 0..by {
            if !self.wake_any() {
                break;
            }
        }
    }

    /// Grant a dial permit to some parked checkout whose key is under
    /// its own cap, consuming one pool-wide slot.
    fn wake_any(&mut self) -> bool {
        if self.total >= self.config.max_total {
            return false;
        }
        let keys: Vec<PoolKey> = self.waiting.keys().cloned().collect();
        for key in keys {
            let count = self.counts.get(&key).copied().unwrap_or_default();
            if count >= self.config.max_per_key {
                continue;
            }
            let Some(waiters) = self.waiting.get_mut(&key) else {
                continue;
            };
            while let Some(waiter) = waiters.pop_front() {
                if waiter.send(Handoff::Permit).is_ok() {
                    trace!(%key, "pool-wide slot handed to waiting checkout");
                    if waiters.is_empty() {
                        self.waiting.remove(&key);
                    }
                    *self.counts.entry(key).or_default() += 1;
                    self.total += 1;
                    return true;
                }
            }
            self.waiting.remove(&key);
        }
        false
    }

    /// Drop one idle connection of any key to make room at the
    /// pool-wide cap.
    fn evict_idle(&mut self) -> bool {
        let victim = self
            .idle
            .iter()
            .find_map(|(key, idle)| (!idle.is_empty()).then(|| key.clone()));
        let Some(key) = victim else {
            return false;
        };
        if let Some(idle) = self.idle.get_mut(&key) {
            idle.evict_oldest();
            if idle.is_empty() {
                self.idle.remove(&key);
            }
        }
        trace!(%key, "idle connection evicted at pool-wide cap");
        self.decrement(&key, 1);
        true
    }

    /// Hand a returned connection to a parked checkout, or park it idle.
    fn reuse(&mut self, key: &PoolKey, mut connection: C) {
        if let Some(mut waiters) = self.waiting.remove(key) {
            while let Some(waiter) = waiters.pop_front() {
                match waiter.send(Handoff::Reuse(connection)) {
                    Ok(()) => {
                        trace!(%key, "connection handed to waiting checkout");
                        if !waiters.is_empty() {
                            self.waiting.insert(key.clone(), waiters);
                        }
                        return;
                    }
                    // That checkout gave up. Try the next one.
                    Err(Handoff::Reuse(returned)) => connection = returned,
                    Err(Handoff::Permit) => unreachable!("handoff payload round-trips"),
                }
            }
        }

        let idle = self.idle.entry(key.clone()).or_default();
        if idle.len() < self.config.max_idle_per_key {
            trace!(%key, "connection parked idle");
            idle.push(connection);
        } else {
            trace!(%key, "idle set full, discarding connection");
            drop(connection);
            self.retire(key, 1);
        }
    }

    /// A connection slot opened up: transfer it to a parked checkout as
    /// a dial permit, or retire it.
    fn vacate(&mut self, key: &PoolKey) {
        if let Some(mut waiters) = self.waiting.remove(key) {
            while let Some(waiter) = waiters.pop_front() {
                if waiter.send(Handoff::Permit).is_ok() {
                    trace!(%key, "dial slot handed to waiting checkout");
                    if !waiters.is_empty() {
                        self.waiting.insert(key.clone(), waiters);
                    }
                    return;
                }
            }
        }
        self.retire(key, 1);
    }
}

impl<C: PoolableConnection> Pool<C> {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                config,
                closed: false,
                total: 0,
                idle: HashMap::new(),
                counts: HashMap::new(),
                waiting: HashMap::new(),
            })),
        }
    }

    /// Obtain a connection for `key`: an idle one if available, a permit
    /// to dial if under the per-key cap, otherwise park until one of the
    /// two becomes available.
    pub(crate) async fn checkout(&self, key: PoolKey) -> Result<Checkout<C>, Error> {
        let receiver = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(Error::Closed);
            }

            let timeout = inner.config.idle_timeout;
            if let Some(idle) = inner.idle.get_mut(&key) {
                let (connection, discarded) = idle.pop(timeout);
                if idle.is_empty() {
                    inner.idle.remove(&key);
                }
                inner.retire(&key, discarded);
                if let Some(connection) = connection {
                    trace!(%key, "reusing idle connection");
                    return Ok(Checkout::Reused(self.guard(key, connection)));
                }
            }

            let count = inner.counts.get(&key).copied().unwrap_or_default();
            if count < inner.config.max_per_key {
                if inner.total >= inner.config.max_total {
                    inner.evict_idle();
                }
                if inner.total < inner.config.max_total {
                    *inner.counts.entry(key.clone()).or_default() += 1;
                    inner.total += 1;
                    trace!(%key, "granting dial permit");
                    return Ok(Checkout::Dial(self.permit(key)));
                }
            }

            trace!(%key, "at connection cap, waiting");
            let (sender, receiver) = oneshot::channel();
            inner.waiting.entry(key.clone()).or_default().push_back(sender);
            receiver
        };

        match receiver.await {
            Ok(Handoff::Reuse(connection)) => Ok(Checkout::Reused(self.guard(key, connection))),
            Ok(Handoff::Permit) => Ok(Checkout::Dial(self.permit(key))),
            Err(_) => Err(Error::Closed),
        }
    }

    /// Shut the pool: drop all idle connections and fail all parked
    /// checkouts. Connections already checked out are unaffected.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.total = 0;
        inner.idle.clear();
        inner.counts.clear();
        inner.waiting.clear();
    }

    #[cfg(test)]
    fn idle_count(&self, key: &PoolKey) -> usize {
        self.inner
            .lock()
            .idle
            .get(key)
            .map(|idle| idle.len())
            .unwrap_or_default()
    }

    fn guard(&self, key: PoolKey, connection: C) -> Pooled<C> {
        Pooled {
            connection: Some(connection),
            key,
            pool: Arc::downgrade(&self.inner),
        }
    }

    fn permit(&self, key: PoolKey) -> Permit<C> {
        Permit {
            key: Some(key),
            pool: Arc::downgrade(&self.inner),
        }
    }
}

/// Permission to dial one new connection for a key. Completing the dial
/// converts the permit into a [`Pooled`] guard; dropping it without
/// completing frees the slot for another checkout.
pub(crate) struct Permit<C: PoolableConnection> {
    key: Option<PoolKey>,
    pool: Weak<Mutex<PoolInner<C>>>,
}

impl<C: PoolableConnection> Permit<C> {
    pub(crate) fn complete(mut self, connection: C) -> Pooled<C> {
        let key = self.key.take().expect("permit completed once");
        Pooled {
            connection: Some(connection),
            key,
            pool: std::mem::replace(&mut self.pool, Weak::new()),
        }
    }
}

impl<C: PoolableConnection> Drop for Permit<C> {
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(pool) = self.pool.upgrade() {
            let mut inner = pool.lock();
            if !inner.closed {
                trace!(%key, "dial abandoned, freeing slot");
                inner.vacate(&key);
            }
        }
    }
}

impl<C: PoolableConnection> std::fmt::Debug for Permit<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").field("key", &self.key).finish()
    }
}

/// Guard around a checked-out connection.
///
/// Dropping the guard discards the connection; only an explicit
/// [`release`](Pooled::release) returns it to the pool for reuse.
pub(crate) struct Pooled<C: PoolableConnection> {
    connection: Option<C>,
    key: PoolKey,
    pool: Weak<Mutex<PoolInner<C>>>,
}

impl<C: PoolableConnection> Pooled<C> {
    /// Return the connection to the pool after a cleanly completed
    /// exchange. Closed connections are discarded instead.
    pub(crate) fn release(mut self) {
        let connection = self.connection.take().expect("connection present until consumed");
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        let mut inner = pool.lock();
        if inner.closed {
            return;
        }
        if connection.is_open() {
            inner.reuse(&self.key, connection);
        } else {
            trace!(key = %self.key, "released connection no longer open, discarding");
            drop(connection);
            inner.vacate(&self.key);
        }
    }

    /// Discard the connection, freeing its slot for another checkout.
    pub(crate) fn discard(self) {
        drop(self);
    }
}

impl<C: PoolableConnection> Drop for Pooled<C> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };
        drop(connection);
        if let Some(pool) = self.pool.upgrade() {
            let mut inner = pool.lock();
            if !inner.closed {
                trace!(key = %self.key, "connection discarded");
                inner.vacate(&self.key);
            }
        }
    }
}

impl<C: PoolableConnection> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref().expect("connection present until consumed")
    }
}

impl<C: PoolableConnection> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut().expect("connection present until consumed")
    }
}

impl<C: PoolableConnection> std::fmt::Debug for Pooled<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pooled").field("key", &self.key).finish()
    }
}
