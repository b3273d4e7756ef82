use std::time::{Duration, Instant};

use tracing::trace;

use super::PoolableConnection;

/// An idle connection parked in the pool, stamped with its park time so
/// expiry can be checked on pop.
#[derive(Debug)]
pub(super) struct Idle<C> {
    at: Instant,
    connection: C,
}

impl<C> Idle<C> {
    pub(super) fn new(connection: C) -> Self {
        Self {
            at: Instant::now(),
            connection,
        }
    }

    fn expired(&self, timeout: Option<Duration>) -> bool {
        timeout.is_some_and(|timeout| self.at.elapsed() >= timeout)
    }
}

/// A stack of idle connections for one pool key. Most recently parked
/// connections are handed out first.
#[derive(Debug)]
pub(super) struct IdleConnections<C> {
    idle: Vec<Idle<C>>,
}

impl<C> Default for IdleConnections<C> {
    fn default() -> Self {
        Self { idle: Vec::new() }
    }
}

impl<C: PoolableConnection> IdleConnections<C> {
    pub(super) fn push(&mut self, connection: C) {
        self.idle.push(Idle::new(connection));
    }

    /// Pop the freshest idle connection that is still open and not past
    /// the idle timeout. Returns the number of connections discarded
    /// along the way, so the caller can settle its accounting.
    pub(super) fn pop(&mut self, timeout: Option<Duration>) -> (Option<C>, usize) {
        let mut discarded = 0;
        while let Some(entry) = self.idle.pop() {
            if entry.expired(timeout) {
                trace!("discarding idle connection past idle timeout");
                discarded += 1;
                continue;
            }
            if !entry.connection.is_open() {
                trace!("discarding idle connection closed by peer");
                discarded += 1;
                continue;
            }
            return (Some(entry.connection), discarded);
        }
        (None, discarded)
    }

    /// Drop the oldest idle connection outright. Returns false when
    /// there was none to drop.
    pub(super) fn evict_oldest(&mut self) -> bool {
        if self.idle.is_empty() {
            false
        } else {
            self.idle.remove(0);
            true
        }
    }

    pub(super) fn len(&self) -> usize {
        self.idle.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.idle.is_empty()
    }
}
