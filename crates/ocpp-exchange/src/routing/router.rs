//! Next-hop resolution for forward and reply traffic.

use super::{RoutingError, Topology};
use crate::transport::ConnectionId;
use ocpp_types::{NetworkPath, NodeId, SourceRouting};
use std::sync::Arc;

/// Where a reply goes next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyHop {
    /// This node originated the request; resolve it locally.
    Local,
    /// Hand the reply to the previous hop.
    Forward {
        /// Connection to the previous hop.
        connection: ConnectionId,
        /// The previous hop.
        next: NodeId,
    },
}

/// Routing decisions for one node.
#[derive(Debug, Clone)]
pub struct Router {
    local: NodeId,
    topology: Arc<Topology>,
}

impl Router {
    /// Create a router for `local`.
    pub fn new(local: NodeId, topology: Arc<Topology>) -> Self {
        Self { local, topology }
    }

    /// This node.
    pub fn local(&self) -> &NodeId {
        &self.local
    }

    /// Shared topology.
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Whether a forward-travelling frame is addressed to this node.
    ///
    /// A frame without a destination is addressed to whoever receives it.
    pub fn is_addressed_here(&self, destination: Option<&SourceRouting>) -> bool {
        destination.map_or(true, |d| d.is_destination(&self.local))
    }

    /// Connection towards the next target of `routing`.
    pub fn next_hop(&self, routing: &SourceRouting) -> Result<ConnectionId, RoutingError> {
        let target = routing.next_target(&self.local);
        self.topology.resolve(target)
    }

    /// Connection and extended path for relaying a forward-travelling frame.
    pub fn forward(
        &self,
        routing: &SourceRouting,
        path: &NetworkPath,
    ) -> Result<(ConnectionId, NetworkPath), RoutingError> {
        if path.contains(&self.local) {
            return Err(RoutingError::Loop {
                node: self.local.clone(),
                path: path.clone(),
            });
        }
        let connection = self.next_hop(routing)?;
        Ok((connection, path.append(self.local.clone())))
    }

    /// Where a reply with `path` goes next.
    ///
    /// An empty path comes from a peer that does not record routing metadata
    /// and is treated as addressed to this node.
    pub fn reply_hop(&self, path: &NetworkPath) -> Result<ReplyHop, RoutingError> {
        if path.is_empty() {
            return Ok(ReplyHop::Local);
        }
        match path.position(&self.local) {
            None => Err(RoutingError::NotOnPath {
                node: self.local.clone(),
                path: path.clone(),
            }),
            Some(0) => Ok(ReplyHop::Local),
            Some(_) => {
                let next = path
                    .previous_hop(&self.local)
                    .cloned()
                    .ok_or_else(|| RoutingError::NotOnPath {
                        node: self.local.clone(),
                        path: path.clone(),
                    })?;
                let connection = self.topology.resolve(&next)?;
                Ok(ReplyHop::Forward { connection, next })
            }
        }
    }

    /// Check a forward-travelling frame's path against the connection it came in on.
    ///
    /// Returns the sending peer and the effective path; an empty path is
    /// attributed to the peer.
    pub fn inbound_path(
        &self,
        connection: ConnectionId,
        path: &NetworkPath,
    ) -> Result<(NodeId, NetworkPath), RoutingError> {
        let peer = self
            .topology
            .peer_of(connection)
            .ok_or(RoutingError::UnknownConnection { connection })?;
        match path.last() {
            None => Ok((peer.clone(), NetworkPath::from_source(peer))),
            Some(last) if *last == peer => Ok((peer, path.clone())),
            Some(last) => Err(RoutingError::HopMismatch {
                claimed: last.clone(),
                peer,
            }),
        }
    }
}
