//! Transport port.
//!
//! The engine never touches sockets. A transport adapter owns the physical
//! connections, hands out [`ConnectionId`] handles, writes frames when asked
//! and feeds [`TransportEvent`]s into [`crate::MessageExchange::run`].

use async_trait::async_trait;
use ocpp_types::NodeId;
use std::fmt;

/// Handle to a physical connection owned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a transport-assigned number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The transport-assigned number.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Result of writing one frame to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The frame was handed to the peer.
    Delivered,
    /// The connection is gone.
    ConnectionClosed,
    /// The write did not complete in time.
    TimedOut,
    /// Any other transport failure.
    Failed,
}

impl SendOutcome {
    /// Whether the frame went out.
    pub fn is_delivered(self) -> bool {
        self == Self::Delivered
    }
}

impl fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Delivered => "Delivered",
            Self::ConnectionClosed => "ConnectionClosed",
            Self::TimedOut => "TimedOut",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// A raw frame read from a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Connection the frame arrived on.
    pub connection: ConnectionId,
    /// Undecoded wire text.
    pub raw: String,
}

/// Everything a transport reports to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A peer finished its handshake.
    Opened {
        /// New connection handle.
        connection: ConnectionId,
        /// Identity the peer presented.
        peer: NodeId,
    },
    /// A frame arrived.
    Frame(InboundFrame),
    /// A connection went away.
    Closed {
        /// Handle of the closed connection.
        connection: ConnectionId,
    },
}

/// Outbound half of a transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one frame to a connection.
    async fn send(&self, connection: ConnectionId, frame: String) -> SendOutcome;
}
