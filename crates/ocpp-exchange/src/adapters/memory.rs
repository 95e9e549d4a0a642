//! In-process transport.
//!
//! A [`MemoryNetwork`] links endpoints with tokio channels. Each endpoint gets
//! a [`MemoryTransport`] to hand to its engine and a receiver of
//! [`TransportEvent`]s to feed [`crate::MessageExchange::run`]. Links can be
//! cut and can rewrite frames in flight, which is how tests corrupt a hop.

use crate::transport::{ConnectionId, InboundFrame, SendOutcome, Transport, TransportEvent};
use async_trait::async_trait;
use ocpp_types::NodeId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Rewrites a frame in flight.
pub type Tamper = Arc<dyn Fn(String) -> String + Send + Sync>;

/// Network setup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// No endpoint with this id exists.
    #[error("unknown endpoint {0}")]
    UnknownNode(NodeId),
    /// The two endpoints are not linked.
    #[error("{0} and {1} are not linked")]
    NotLinked(NodeId, NodeId),
    /// An endpoint's event receiver was dropped.
    #[error("endpoint {0} is no longer listening")]
    Closed(NodeId),
}

#[derive(Clone)]
struct Link {
    peer: NodeId,
    peer_events: mpsc::Sender<TransportEvent>,
    peer_connection: ConnectionId,
    tamper: Option<Tamper>,
}

/// One endpoint's side of the network.
pub struct MemoryTransport {
    node: NodeId,
    links: RwLock<HashMap<ConnectionId, Link>>,
}

impl MemoryTransport {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            links: RwLock::new(HashMap::new()),
        }
    }

    /// The endpoint this transport belongs to.
    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Connection to `peer`, if linked.
    pub fn connection_to(&self, peer: &NodeId) -> Option<ConnectionId> {
        self.links
            .read()
            .iter()
            .find(|(_, link)| &link.peer == peer)
            .map(|(connection, _)| *connection)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, connection: ConnectionId, frame: String) -> SendOutcome {
        // Never hold the lock across the channel send.
        let Some(link) = self.links.read().get(&connection).cloned() else {
            return SendOutcome::ConnectionClosed;
        };
        let raw = match &link.tamper {
            Some(tamper) => tamper(frame),
            None => frame,
        };
        let event = TransportEvent::Frame(InboundFrame {
            connection: link.peer_connection,
            raw,
        });
        match link.peer_events.send(event).await {
            Ok(()) => SendOutcome::Delivered,
            Err(_) => SendOutcome::ConnectionClosed,
        }
    }
}

struct Endpoint {
    events: mpsc::Sender<TransportEvent>,
    transport: Arc<MemoryTransport>,
}

/// A set of linked in-memory endpoints.
pub struct MemoryNetwork {
    endpoints: Mutex<HashMap<NodeId, Endpoint>>,
    next_connection: AtomicU64,
    buffer: usize,
}

impl MemoryNetwork {
    /// Create a network whose event channels hold `buffer` events.
    pub fn new(buffer: usize) -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            next_connection: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Add an endpoint; returns its transport and event stream.
    ///
    /// Adding an id twice replaces the earlier endpoint.
    pub fn endpoint(&self, node: NodeId) -> (Arc<MemoryTransport>, mpsc::Receiver<TransportEvent>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let transport = Arc::new(MemoryTransport::new(node.clone()));
        self.endpoints.lock().insert(
            node,
            Endpoint {
                events: tx,
                transport: Arc::clone(&transport),
            },
        );
        (transport, rx)
    }

    fn lookup(&self, node: &NodeId) -> Result<(mpsc::Sender<TransportEvent>, Arc<MemoryTransport>), MemoryError> {
        self.endpoints
            .lock()
            .get(node)
            .map(|e| (e.events.clone(), Arc::clone(&e.transport)))
            .ok_or_else(|| MemoryError::UnknownNode(node.clone()))
    }

    fn allocate(&self) -> ConnectionId {
        ConnectionId::new(self.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Link two endpoints and announce the connection to both.
    ///
    /// Returns the connection ids as seen from `a` and from `b`.
    pub async fn link(
        &self,
        a: &NodeId,
        b: &NodeId,
    ) -> Result<(ConnectionId, ConnectionId), MemoryError> {
        let (a_events, a_transport) = self.lookup(a)?;
        let (b_events, b_transport) = self.lookup(b)?;
        let (a_side, b_side) = (self.allocate(), self.allocate());

        a_transport.links.write().insert(
            a_side,
            Link {
                peer: b.clone(),
                peer_events: b_events.clone(),
                peer_connection: b_side,
                tamper: None,
            },
        );
        b_transport.links.write().insert(
            b_side,
            Link {
                peer: a.clone(),
                peer_events: a_events.clone(),
                peer_connection: a_side,
                tamper: None,
            },
        );

        a_events
            .send(TransportEvent::Opened {
                connection: a_side,
                peer: b.clone(),
            })
            .await
            .map_err(|_| MemoryError::Closed(a.clone()))?;
        b_events
            .send(TransportEvent::Opened {
                connection: b_side,
                peer: a.clone(),
            })
            .await
            .map_err(|_| MemoryError::Closed(b.clone()))?;

        debug!(a = %a, b = %b, a_side = %a_side, b_side = %b_side, "Linked endpoints");
        Ok((a_side, b_side))
    }

    /// Cut the link between two endpoints and announce the close to both.
    pub async fn unlink(&self, a: &NodeId, b: &NodeId) -> Result<(), MemoryError> {
        let (a_events, a_transport) = self.lookup(a)?;
        let (b_events, b_transport) = self.lookup(b)?;
        let a_side = a_transport
            .connection_to(b)
            .ok_or_else(|| MemoryError::NotLinked(a.clone(), b.clone()))?;
        let b_side = b_transport
            .connection_to(a)
            .ok_or_else(|| MemoryError::NotLinked(b.clone(), a.clone()))?;

        a_transport.links.write().remove(&a_side);
        b_transport.links.write().remove(&b_side);

        // A listener that already went away has nothing to be told.
        let _ = a_events
            .send(TransportEvent::Closed { connection: a_side })
            .await;
        let _ = b_events
            .send(TransportEvent::Closed { connection: b_side })
            .await;
        debug!(a = %a, b = %b, "Unlinked endpoints");
        Ok(())
    }

    /// Rewrite every frame `from` sends to `to`.
    pub fn tamper(&self, from: &NodeId, to: &NodeId, tamper: Tamper) -> Result<(), MemoryError> {
        let (_, transport) = self.lookup(from)?;
        let connection = transport
            .connection_to(to)
            .ok_or_else(|| MemoryError::NotLinked(from.clone(), to.clone()))?;
        if let Some(link) = transport.links.write().get_mut(&connection) {
            link.tamper = Some(tamper);
        }
        Ok(())
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new(256)
    }
}
