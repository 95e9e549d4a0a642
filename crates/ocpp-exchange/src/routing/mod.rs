//! Multi-hop routing.
//!
//! Requests (and response errors) travel forward along their `destination`
//! directive, each relay appending itself to the network path. Replies carry
//! the request path plus the responder and walk it backwards, so the return
//! route is read off the frame rather than looked up.

pub mod router;
pub mod topology;

pub use router::{ReplyHop, Router};
pub use topology::Topology;

use crate::transport::ConnectionId;
use ocpp_types::{NetworkPath, NodeId};
use thiserror::Error;

/// Routing failures. None of them queue or retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No next hop exists for the destination.
    #[error("no route to {destination}")]
    Unreachable {
        /// Node that could not be reached.
        destination: NodeId,
    },

    /// Forwarding would revisit a node already on the path.
    #[error("routing loop: {node} already on path {path}")]
    Loop {
        /// This node.
        node: NodeId,
        /// Path of the frame.
        path: NetworkPath,
    },

    /// A reply reached a node that is not on its path.
    #[error("{node} is not on reply path {path}")]
    NotOnPath {
        /// This node.
        node: NodeId,
        /// Path of the frame.
        path: NetworkPath,
    },

    /// The last hop on the path is not the peer the frame came from.
    #[error("path ends at {claimed} but frame arrived from {peer}")]
    HopMismatch {
        /// Last node named on the path.
        claimed: NodeId,
        /// Peer of the inbound connection.
        peer: NodeId,
    },

    /// The frame arrived on a connection without a registered peer.
    #[error("frame arrived on unregistered connection {connection}")]
    UnknownConnection {
        /// Connection handle.
        connection: ConnectionId,
    },
}
