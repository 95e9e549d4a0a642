//! Connection topology.
//!
//! An arena of connection handles indexed by node id. Lookups hand out
//! [`ConnectionId`]s, never references to peers, so the table can be shared
//! behind a read-write lock and only mutated on connection open/close or when
//! routes are configured.

use super::RoutingError;
use crate::transport::ConnectionId;
use ocpp_types::NodeId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
struct TopologyInner {
    /// Directly connected peers.
    peers: HashMap<NodeId, ConnectionId>,
    /// Reverse index for close notifications and hop checks.
    connections: HashMap<ConnectionId, NodeId>,
    /// Static "reachable via" routes: destination -> relay.
    routes: HashMap<NodeId, NodeId>,
    /// Fallback relay for everything else.
    uplink: Option<NodeId>,
}

/// Who can be reached, and over which connection.
#[derive(Debug, Default)]
pub struct Topology {
    inner: RwLock<TopologyInner>,
}

impl Topology {
    /// Create an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a direct connection to `peer`.
    ///
    /// A peer reconnecting replaces its previous connection, which is returned.
    pub fn connect(&self, peer: NodeId, connection: ConnectionId) -> Option<ConnectionId> {
        let mut inner = self.inner.write();
        let previous = inner.peers.insert(peer.clone(), connection);
        if let Some(old) = previous {
            inner.connections.remove(&old);
        }
        debug!(peer = %peer, connection = %connection, "Peer connected");
        inner.connections.insert(connection, peer);
        previous
    }

    /// Forget a connection. Returns the peer it belonged to.
    pub fn disconnect(&self, connection: ConnectionId) -> Option<NodeId> {
        let mut inner = self.inner.write();
        let peer = inner.connections.remove(&connection)?;
        // Only drop the peer entry if it still points at this connection.
        if inner.peers.get(&peer) == Some(&connection) {
            inner.peers.remove(&peer);
        }
        debug!(peer = %peer, connection = %connection, "Peer disconnected");
        Some(peer)
    }

    /// Declare that `destination` is reachable through `relay`.
    pub fn add_route(&self, destination: NodeId, relay: NodeId) {
        self.inner.write().routes.insert(destination, relay);
    }

    /// Remove a static route.
    pub fn remove_route(&self, destination: &NodeId) -> Option<NodeId> {
        self.inner.write().routes.remove(destination)
    }

    /// Set or clear the default uplink.
    pub fn set_uplink(&self, uplink: Option<NodeId>) {
        self.inner.write().uplink = uplink;
    }

    /// Connection to a directly connected peer.
    pub fn connection_for(&self, peer: &NodeId) -> Option<ConnectionId> {
        self.inner.read().peers.get(peer).copied()
    }

    /// Peer on the other end of a connection.
    pub fn peer_of(&self, connection: ConnectionId) -> Option<NodeId> {
        self.inner.read().connections.get(&connection).cloned()
    }

    /// Number of directly connected peers.
    pub fn peer_count(&self) -> usize {
        self.inner.read().peers.len()
    }

    /// Resolve the connection that leads towards `target`.
    ///
    /// Direct peer first, then a static route through a connected relay, then
    /// the default uplink.
    pub fn resolve(&self, target: &NodeId) -> Result<ConnectionId, RoutingError> {
        let inner = self.inner.read();
        if let Some(connection) = inner.peers.get(target) {
            return Ok(*connection);
        }
        if let Some(connection) = inner
            .routes
            .get(target)
            .and_then(|relay| inner.peers.get(relay))
        {
            return Ok(*connection);
        }
        if let Some(connection) = inner.uplink.as_ref().and_then(|up| inner.peers.get(up)) {
            return Ok(*connection);
        }
        Err(RoutingError::Unreachable {
            destination: target.clone(),
        })
    }
}
