//! Directed, costed connections between nodes.

use super::node::NodeId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(pub u64);

impl EdgeId {
    /// Invalid/null edge ID.
    pub const INVALID: EdgeId = EdgeId(u64::MAX);

    /// Check if this is a valid edge ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

static NEXT_EDGE_ID: AtomicU64 = AtomicU64::new(1);

impl EdgeId {
    /// Generate a new unique edge ID.
    pub fn new() -> Self {
        EdgeId(NEXT_EDGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A directed edge from a parent node to a child node.
///
/// The cost is mutable; `f64::INFINITY` marks the edge as currently
/// obstructed. Obstructed edges are kept in the tree, never deleted by
/// validity checks.
#[derive(Debug, Clone)]
pub struct Edge {
    id: EdgeId,
    parent: NodeId,
    child: NodeId,
    cost: f64,
}

impl Edge {
    /// Create an edge with a cost.
    pub fn new(parent: NodeId, child: NodeId, cost: f64) -> Self {
        debug_assert!(cost >= 0.0 || cost.is_infinite());
        Self {
            id: EdgeId::new(),
            parent,
            child,
            cost,
        }
    }

    /// Get edge ID.
    pub fn id(&self) -> EdgeId {
        self.id
    }

    /// Get the parent endpoint.
    pub fn parent(&self) -> NodeId {
        self.parent
    }

    /// Get the child endpoint.
    pub fn child(&self) -> NodeId {
        self.child
    }

    /// Get the current cost.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// Set the cost. `f64::INFINITY` marks the edge obstructed.
    pub fn set_cost(&mut self, cost: f64) {
        debug_assert!(cost >= 0.0 || cost.is_infinite());
        self.cost = cost;
    }

    /// Whether the edge is currently obstructed.
    pub fn is_obstructed(&self) -> bool {
        self.cost.is_infinite()
    }

    /// Given one endpoint, return the other.
    pub fn other(&self, node: NodeId) -> NodeId {
        if node == self.parent {
            self.child
        } else {
            debug_assert_eq!(node, self.child);
            self.parent
        }
    }

    pub(crate) fn reverse(&mut self) {
        std::mem::swap(&mut self.parent, &mut self.child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_id_validity() {
        assert!(EdgeId(7).is_valid());
        assert!(!EdgeId::INVALID.is_valid());
    }

    #[test]
    fn obstruction_is_infinite_cost() {
        let mut edge = Edge::new(NodeId(1), NodeId(2), 1.0);
        assert!(!edge.is_obstructed());

        edge.set_cost(f64::INFINITY);
        assert!(edge.is_obstructed());

        edge.set_cost(0.5);
        assert!(!edge.is_obstructed());
        assert_eq!(edge.cost(), 0.5);
    }

    #[test]
    fn reverse_swaps_endpoints_and_keeps_cost() {
        let mut edge = Edge::new(NodeId(1), NodeId(2), 2.5);
        edge.reverse();
        assert_eq!(edge.parent(), NodeId(2));
        assert_eq!(edge.child(), NodeId(1));
        assert_eq!(edge.cost(), 2.5);
    }

    #[test]
    fn other_returns_opposite_endpoint() {
        let edge = Edge::new(NodeId(1), NodeId(2), 1.0);
        assert_eq!(edge.other(NodeId(1)), NodeId(2));
        assert_eq!(edge.other(NodeId(2)), NodeId(1));
    }
}
