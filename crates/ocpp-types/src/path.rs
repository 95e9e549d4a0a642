//! Routing provenance and routing directives.
//!
//! A [`NetworkPath`] is append-only: extending it returns a new path and the
//! original stays untouched, so a frame that is forwarded never changes the
//! path seen by anyone still holding the inbound copy.

use crate::ids::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered list of every node a frame has traversed. The first element is the source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkPath(Vec<NodeId>);

impl NetworkPath {
    /// An empty path (frame not yet attributed to a source).
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// A path starting at `source`.
    pub fn from_source(source: NodeId) -> Self {
        Self(vec![source])
    }

    /// Return a copy of this path with `hop` appended.
    #[must_use]
    pub fn append(&self, hop: NodeId) -> Self {
        let mut hops = Vec::with_capacity(self.0.len() + 1);
        hops.extend(self.0.iter().cloned());
        hops.push(hop);
        Self(hops)
    }

    /// The originating node.
    pub fn source(&self) -> Option<&NodeId> {
        self.0.first()
    }

    /// The most recent hop.
    pub fn last(&self) -> Option<&NodeId> {
        self.0.last()
    }

    /// Position of `node` on the path.
    ///
    /// Uses the last occurrence so that a node which legitimately appears twice
    /// (a loop through a relay) walks back from its latest visit.
    pub fn position(&self, node: &NodeId) -> Option<usize> {
        self.0.iter().rposition(|hop| hop == node)
    }

    /// The hop preceding `node`, i.e. where a reply goes next when walking back.
    pub fn previous_hop(&self, node: &NodeId) -> Option<&NodeId> {
        match self.position(node) {
            Some(0) | None => None,
            Some(idx) => self.0.get(idx - 1),
        }
    }

    /// Whether `node` already appears on the path.
    pub fn contains(&self, node: &NodeId) -> bool {
        self.0.contains(node)
    }

    /// The hops in reverse order (responder first).
    pub fn reversed(&self) -> Vec<NodeId> {
        self.0.iter().rev().cloned().collect()
    }

    /// Hops as a slice.
    pub fn hops(&self) -> &[NodeId] {
        &self.0
    }

    /// Number of hops.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<NodeId> for NetworkPath {
    fn from_iter<I: IntoIterator<Item = NodeId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for NetworkPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for hop in &self.0 {
            if !first {
                f.write_str(" -> ")?;
            }
            write!(f, "{hop}")?;
            first = false;
        }
        Ok(())
    }
}

/// Routing directive: the final destination, optionally preceded by an explicit
/// chain of relays to traverse in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<NodeId>", into = "Vec<NodeId>")]
pub struct SourceRouting {
    via: Vec<NodeId>,
    destination: NodeId,
}

impl SourceRouting {
    /// Route to a single node; relays are chosen from the topology.
    pub fn to(destination: NodeId) -> Self {
        Self {
            via: Vec::new(),
            destination,
        }
    }

    /// Route through an explicit chain of relays before reaching `destination`.
    pub fn via(via: Vec<NodeId>, destination: NodeId) -> Self {
        Self { via, destination }
    }

    /// The final destination.
    pub fn destination(&self) -> &NodeId {
        &self.destination
    }

    /// Explicit relays, in traversal order.
    pub fn relays(&self) -> &[NodeId] {
        &self.via
    }

    /// The node this hop should head for, as seen from `local`.
    ///
    /// If `local` is one of the explicit relays, that is the chain element after
    /// it; otherwise the first explicit relay; otherwise the destination.
    pub fn next_target(&self, local: &NodeId) -> &NodeId {
        match self.via.iter().position(|hop| hop == local) {
            Some(idx) => self.via.get(idx + 1).unwrap_or(&self.destination),
            None => self.via.first().unwrap_or(&self.destination),
        }
    }

    /// Whether `local` is the final destination.
    pub fn is_destination(&self, local: &NodeId) -> bool {
        &self.destination == local
    }
}

impl TryFrom<Vec<NodeId>> for SourceRouting {
    type Error = &'static str;

    fn try_from(mut hops: Vec<NodeId>) -> Result<Self, Self::Error> {
        let destination = hops.pop().ok_or("routing chain must name a destination")?;
        Ok(Self {
            via: hops,
            destination,
        })
    }
}

impl From<SourceRouting> for Vec<NodeId> {
    fn from(routing: SourceRouting) -> Self {
        let mut hops = routing.via;
        hops.push(routing.destination);
        hops
    }
}
