//! Server-side registry of live connections.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::Connection;

/// The live connections of one server.
///
/// A connection is inserted when it is accepted and removed exactly once,
/// when its receive loop ends. Readers get snapshots, never the live list.
pub(crate) struct ConnectionRegistry<T> {
    connections: Mutex<Vec<Arc<Connection<T>>>>,
}

impl<T> ConnectionRegistry<T> {
    pub(crate) fn new() -> Self {
        Self {
            connections: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn insert(&self, connection: Arc<Connection<T>>) {
        self.connections.lock().push(connection);
    }

    /// Remove this exact connection; `false` if it was not registered.
    pub(crate) fn remove(&self, connection: &Arc<Connection<T>>) -> bool {
        let mut connections = self.connections.lock();
        match connections.iter().position(|c| Arc::ptr_eq(c, connection)) {
            Some(index) => {
                connections.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<Connection<T>>> {
        self.connections.lock().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.connections.lock().len()
    }
}

impl<T> fmt::Debug for ConnectionRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.len())
            .finish()
    }
}
