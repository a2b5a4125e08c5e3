//! # Connection Listeners
//!
//! Application callbacks for connection events. Every callback runs on the
//! network thread, synchronously, in registration order.

use std::sync::Arc;
use parking_lot::RwLock;
use crate::connection::Connection;

/// Receives connection events from an endpoint.
///
/// All methods default to no-ops.
pub trait ConnectionListener<M>: Send + Sync {
    /// A peer finished the handshake.
    fn on_connected(&self, _connection: &Connection) {}

    /// A previously connected peer went away.
    fn on_disconnected(&self, _connection: &Connection) {}

    /// An application message arrived.
    fn on_received(&self, _connection: &Connection, _message: &M) {}

    /// The server refused a connection because it is full.
    fn on_server_full(&self, _connection: &Connection) {}
}

/// Shared, ordered listener registry.
pub(crate) struct ListenerList<M> {
    listeners: RwLock<Vec<Arc<dyn ConnectionListener<M>>>>,
}

impl<M: 'static> ListenerList<M> {
    pub(crate) fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, listener: Arc<dyn ConnectionListener<M>>) {
        self.listeners.write().push(listener);
    }

    /// Removes `listener`, matched by identity. Returns true if found.
    pub(crate) fn remove(&self, listener: &Arc<dyn ConnectionListener<M>>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|registered| !Arc::ptr_eq(registered, listener));
        listeners.len() != before
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Copies the current list so callbacks may (un)register listeners.
    fn snapshot(&self) -> Vec<Arc<dyn ConnectionListener<M>>> {
        self.listeners.read().clone()
    }

    pub(crate) fn fire_connected(&self, connection: &Connection) {
        for listener in self.snapshot() {
            listener.on_connected(connection);
        }
    }

    pub(crate) fn fire_disconnected(&self, connection: &Connection) {
        for listener in self.snapshot() {
            listener.on_disconnected(connection);
        }
    }

    pub(crate) fn fire_received(&self, connection: &Connection, message: &M) {
        for listener in self.snapshot() {
            listener.on_received(connection, message);
        }
    }

    pub(crate) fn fire_server_full(&self, connection: &Connection) {
        for listener in self.snapshot() {
            listener.on_server_full(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use parking_lot::Mutex;
    use crate::config::NetConfig;
    use crate::connection::ConnectionState;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ConnectionListener<u32> for Recorder {
        fn on_connected(&self, connection: &Connection) {
            self.log
                .lock()
                .push(format!("{} connected {}", self.name, connection.peer_id()));
        }

        fn on_received(&self, _connection: &Connection, message: &u32) {
            self.log.lock().push(format!("{} got {message}", self.name));
        }
    }

    fn connection() -> Connection {
        Connection::new(
            4,
            "127.0.0.1:9000".parse().unwrap(),
            ConnectionState::Connected,
            Instant::now(),
            &NetConfig::default(),
        )
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let list: ListenerList<u32> = ListenerList::new();
        list.add(Arc::new(Recorder { name: "a", log: Arc::clone(&log) }));
        list.add(Arc::new(Recorder { name: "b", log: Arc::clone(&log) }));

        let conn = connection();
        list.fire_connected(&conn);
        list.fire_received(&conn, &7);
        // Default no-ops.
        list.fire_disconnected(&conn);
        list.fire_server_full(&conn);

        assert_eq!(
            *log.lock(),
            vec!["a connected 4", "b connected 4", "a got 7", "b got 7"]
        );
    }

    #[test]
    fn test_remove_by_identity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let list: ListenerList<u32> = ListenerList::new();
        let first: Arc<dyn ConnectionListener<u32>> =
            Arc::new(Recorder { name: "a", log: Arc::clone(&log) });
        let twin: Arc<dyn ConnectionListener<u32>> =
            Arc::new(Recorder { name: "a", log: Arc::clone(&log) });
        list.add(Arc::clone(&first));

        assert!(!list.remove(&twin));
        assert_eq!(list.len(), 1);
        assert!(list.remove(&first));
        assert_eq!(list.len(), 0);

        list.fire_received(&connection(), &1);
        assert!(log.lock().is_empty());
    }

    struct SelfRemover {
        list: Arc<ListenerList<u32>>,
        me: Mutex<Option<Arc<dyn ConnectionListener<u32>>>>,
    }

    impl ConnectionListener<u32> for SelfRemover {
        fn on_received(&self, _connection: &Connection, _message: &u32) {
            if let Some(me) = self.me.lock().take() {
                self.list.remove(&me);
            }
        }
    }

    #[test]
    fn test_listener_may_unregister_during_callback() {
        let list = Arc::new(ListenerList::new());
        let remover = Arc::new(SelfRemover {
            list: Arc::clone(&list),
            me: Mutex::new(None),
        });
        let as_dyn: Arc<dyn ConnectionListener<u32>> = remover.clone();
        *remover.me.lock() = Some(Arc::clone(&as_dyn));
        list.add(as_dyn);

        list.fire_received(&connection(), &1);
        assert_eq!(list.len(), 0);
    }
}
