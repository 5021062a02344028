//! Connection registry shared by the event loop and the reaper.
//!
//! A token-keyed map behind one mutex. The lock is held for a single lookup,
//! insert, removal, dispatch or scan, never across a poll. Connections
//! removed here are returned to the caller so the descriptor is closed
//! (dropped) outside the lock.

use crate::connection::{Channel, CloseReason, Connection};
use crate::poller::{Token, LISTENER_TOKEN};

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub struct Registry<C = TcpStream> {
    conns: Mutex<HashMap<Token, Connection<C>>>,
    next: AtomicU64,
}

impl<C: Channel> Registry<C> {
    pub fn new() -> Self {
        Self {
            conns: Mutex::new(HashMap::new()),
            next: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Token, Connection<C>>> {
        // A panic inside a dispatch leaves the map itself intact.
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a token that has never been handed out by this registry.
    pub fn next_token(&self) -> Token {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        debug_assert!(id < LISTENER_TOKEN.0);
        Token(id)
    }

    pub fn insert(&self, conn: Connection<C>) {
        self.lock().insert(conn.token(), conn);
    }

    pub fn remove(&self, token: Token) -> Option<Connection<C>> {
        self.lock().remove(&token)
    }

    /// Run `f` on the connection under the registry lock.
    ///
    /// `None` if the token is unknown (closed by the reaper, or stale).
    pub fn with<R>(&self, token: Token, f: impl FnOnce(&mut Connection<C>) -> R) -> Option<R> {
        self.lock().get_mut(&token).map(f)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.lock().contains_key(&token)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Close and remove every connection for which `expired` holds.
    ///
    /// Connections that already closed themselves are removed too.
    pub fn evict_where(
        &self,
        reason: CloseReason,
        mut expired: impl FnMut(&Connection<C>) -> bool,
    ) -> Vec<Connection<C>> {
        let mut conns = self.lock();
        let stale: Vec<Token> = conns
            .values()
            .filter(|c| expired(*c))
            .map(Connection::token)
            .collect();

        let mut evicted = Vec::with_capacity(stale.len());
        for token in stale {
            if let Some(mut conn) = conns.remove(&token) {
                conn.close(reason);
                evicted.push(conn);
            }
        }
        evicted
    }

    /// Remove everything, closing each connection with `reason`.
    pub fn drain_all(&self, reason: CloseReason) -> Vec<Connection<C>> {
        let mut conns = self.lock();
        conns
            .drain()
            .map(|(_, mut conn)| {
                conn.close(reason);
                conn
            })
            .collect()
    }
}

impl<C: Channel> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}
