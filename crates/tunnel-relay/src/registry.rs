//! Published-port registry (spec §4.7): one table of currently registered
//! ports, guarded by a single mutex, shared between the Control Session
//! (which adds/removes entries on REGISTER_PORT/UNREGISTER_PORT) and the
//! Data Plane (which consults it to bind each arriving User connection to
//! the Agent's data-connection handshake). A single mutex, rather than a
//! lock per port, matches `tunnel-server-tcp-proxy`'s `TunnelConnectionManager`
//! pattern of one shared table behind one async lock.

use std::collections::{HashMap, VecDeque};

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Default)]
struct RegistryState {
    /// Per-port listener task, so UNREGISTER_PORT can tear it down.
    listeners: HashMap<u16, JoinHandle<()>>,
    /// TCP variant only: Users who have connected and are waiting for the
    /// Agent's matching data connection, in arrival order.
    waiting_users: HashMap<u16, VecDeque<TcpStream>>,
}

pub struct PortRegistry {
    state: Mutex<RegistryState>,
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PortRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
        }
    }

    pub async fn is_registered(&self, port: u16) -> bool {
        self.state.lock().await.listeners.contains_key(&port)
    }

    /// Registers `port`, storing the handle to its listener task. A
    /// duplicate REGISTER_PORT for an already-registered port replaces the
    /// old listener handle after the caller has aborted it, keeping
    /// registration idempotent.
    pub async fn register(&self, port: u16, listener: JoinHandle<()>) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock().await;
        state.waiting_users.entry(port).or_default();
        state.listeners.insert(port, listener)
    }

    /// Unregisters `port`, returning its listener task handle (for the
    /// caller to abort) and dropping any Users still waiting on a data
    /// connection that will now never arrive.
    pub async fn unregister(&self, port: u16) -> Option<JoinHandle<()>> {
        let mut state = self.state.lock().await;
        state.waiting_users.remove(&port);
        state.listeners.remove(&port)
    }

    /// Parks a newly accepted User connection for `port`, to be matched
    /// against the Agent's next `DATA_CONNECT` for that port.
    pub async fn park_user(&self, port: u16, stream: TcpStream) {
        let mut state = self.state.lock().await;
        state.waiting_users.entry(port).or_default().push_back(stream);
    }

    /// Pops the oldest parked User connection for `port`, matching the
    /// Agent's `DATA_CONNECT` handshake FIFO.
    pub async fn take_waiting_user(&self, port: u16) -> Option<TcpStream> {
        let mut state = self.state.lock().await;
        state.waiting_users.get_mut(&port)?.pop_front()
    }

    pub async fn registered_ports(&self) -> Vec<u16> {
        self.state.lock().await.listeners.keys().copied().collect()
    }
}
