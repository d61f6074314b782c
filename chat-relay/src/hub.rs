//! Shared relay state: the [`Router`] plus one bounded outbound queue per
//! connection, guarded by a single lock.
//!
//! Fanout never waits on a peer. Events are pushed with `try_send`; a peer whose
//! queue is full or closed is evicted on the spot, its transport is signalled
//! to hang up, and its departure is announced.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{
    protocol::ServerToClient,
    registry::{ConnectionId, Identity, Registry},
    router::{Inbound, Outbound, Router},
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Smallest queue that holds the welcome events with room left for traffic.
pub const MIN_QUEUE_CAPACITY: usize = 4;

/// Outbound events for one connection, drained by its transport task.
pub type Inbox = mpsc::Receiver<ServerToClient>;

/// Resolves once the hub has dropped the connection for falling behind.
pub type Evicted = oneshot::Receiver<()>;

/// Handles a transport needs to drive one accepted connection.
#[derive(Debug)]
pub struct Session {
    pub id: ConnectionId,
    pub inbox: Inbox,
    pub evicted: Evicted,
}

#[derive(Clone)]
pub struct Hub {
    state: Arc<Mutex<HubState>>,
    queue_capacity: usize,
}

struct HubState {
    router: Router,
    peers: HashMap<ConnectionId, Peer>,
}

struct Peer {
    tx: mpsc::Sender<ServerToClient>,
    evict: oneshot::Sender<()>,
}

impl Hub {
    pub fn new(queue_capacity: usize) -> Self {
        Self::with_registry(Registry::new(), queue_capacity)
    }

    /// Capacities below [`MIN_QUEUE_CAPACITY`] are raised to it.
    pub fn with_registry(registry: Registry, queue_capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                router: Router::new(registry),
                peers: HashMap::new(),
            })),
            queue_capacity: queue_capacity.max(MIN_QUEUE_CAPACITY),
        }
    }

    /// Accepts a new connection: assigns an id, registers its identity and
    /// announces it. The returned inbox already holds the welcome events.
    pub async fn connect(&self) -> Session {
        let (tx, inbox) = mpsc::channel(self.queue_capacity);
        let (evict, evicted) = oneshot::channel();
        let mut state = self.state.lock().await;

        let mut id = ConnectionId::generate();
        while state.peers.contains_key(&id) || state.router.registry().contains(&id) {
            warn!(%id, "generated connection id collides with a live one, retrying");
            id = ConnectionId::generate();
        }

        state.peers.insert(id.clone(), Peer { tx, evict });
        let outbound = state.router.dispatch(&id, Inbound::Connect);
        state.deliver(outbound);

        Session { id, inbox, evicted }
    }

    /// Routes one event from an open connection. Events from a connection the
    /// hub no longer tracks are dropped.
    pub async fn handle(&self, id: &ConnectionId, event: Inbound) {
        let mut state = self.state.lock().await;
        if !state.peers.contains_key(id) {
            debug!(%id, "ignoring event from a dropped connection");
            return;
        }
        let outbound = state.router.dispatch(id, event);
        state.deliver(outbound);
    }

    /// Drops the connection's queue and announces its departure, if it has not
    /// already been evicted.
    pub async fn disconnect(&self, id: &ConnectionId) {
        let mut state = self.state.lock().await;
        state.peers.remove(id);
        let outbound = state.router.dispatch(id, Inbound::Disconnect);
        state.deliver(outbound);
    }

    /// Sends a final error event to every connection.
    pub async fn shutdown(&self, reason: &str) {
        let state = self.state.lock().await;
        info!(peers = state.peers.len(), "notifying connections of shutdown");
        for (id, peer) in &state.peers {
            let notice = ServerToClient::Error {
                message: reason.to_string(),
            };
            match peer.tx.try_send(notice) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%id, "outbound queue full, shutdown notice not queued");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(%id, "outbound queue closed before shutdown notice");
                }
            }
        }
    }

    pub async fn roster(&self) -> Vec<Identity> {
        self.state.lock().await.router.registry().snapshot()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.peers.len()
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl HubState {
    fn deliver(&mut self, outbound: Vec<Outbound>) {
        let mut pending = outbound;

        while !pending.is_empty() {
            let mut evicted = Vec::new();
            for Outbound { target, message } in pending {
                for (id, peer) in &self.peers {
                    if !target.includes(id) || evicted.contains(id) {
                        continue;
                    }
                    match peer.tx.try_send(message.clone()) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            warn!(%id, "outbound queue full, dropping connection");
                            evicted.push(id.clone());
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            debug!(%id, "outbound queue closed, dropping connection");
                            evicted.push(id.clone());
                        }
                    }
                }
            }

            pending = Vec::new();
            for id in evicted {
                if let Some(peer) = self.peers.remove(&id) {
                    if peer.evict.send(()).is_err() {
                        debug!(%id, "transport already gone");
                    }
                }
                pending.extend(self.router.dispatch(&id, Inbound::Disconnect));
            }
        }
    }
}
