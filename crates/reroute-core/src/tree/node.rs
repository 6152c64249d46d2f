//! Tree node representation.

use super::edge::EdgeId;
use nalgebra::DVector;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u64);

impl NodeId {
    /// Invalid/null node ID.
    pub const INVALID: NodeId = NodeId(u64::MAX);

    /// Check if this is a valid node ID.
    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// A node in the search tree.
///
/// A node owns its configuration and refers to its adjacent edges by id.
/// Identity is the id; two distinct nodes may carry equal configurations.
#[derive(Debug, Clone)]
pub struct Node {
    /// Unique node identifier.
    id: NodeId,
    /// Joint-space configuration.
    configuration: DVector<f64>,
    /// Incoming edge (None for the root).
    parent_edge: Option<EdgeId>,
    /// Outgoing edges.
    child_edges: Vec<EdgeId>,
}

impl Node {
    /// Create a detached node at a configuration.
    pub fn new(configuration: DVector<f64>) -> Self {
        Self {
            id: NodeId::new(),
            configuration,
            parent_edge: None,
            child_edges: Vec::new(),
        }
    }

    /// Get node ID.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Get the configuration.
    pub fn configuration(&self) -> &DVector<f64> {
        &self.configuration
    }

    /// Get the incoming edge, if any.
    pub fn parent_edge(&self) -> Option<EdgeId> {
        self.parent_edge
    }

    /// Get the outgoing edges.
    pub fn child_edges(&self) -> &[EdgeId] {
        &self.child_edges
    }

    /// Whether this node is a root (no parent edge).
    pub fn is_root(&self) -> bool {
        self.parent_edge.is_none()
    }

    /// Number of adjacent edges.
    pub fn degree(&self) -> usize {
        self.child_edges.len() + usize::from(self.parent_edge.is_some())
    }

    pub(crate) fn set_parent_edge(&mut self, edge: Option<EdgeId>) {
        debug_assert!(
            edge.is_none() || self.parent_edge.is_none(),
            "a node has at most one parent edge"
        );
        self.parent_edge = edge;
    }

    pub(crate) fn add_child_edge(&mut self, edge: EdgeId) {
        self.child_edges.push(edge);
    }

    pub(crate) fn remove_child_edge(&mut self, edge: EdgeId) {
        self.child_edges.retain(|&e| e != edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn node_id_validity() {
        let valid = NodeId(42);
        assert!(valid.is_valid());
        assert!(!NodeId::INVALID.is_valid());
    }

    #[test]
    fn node_id_generates_unique_ids() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn new_node_is_detached() {
        let node = Node::new(dvector![0.0, 1.0]);
        assert!(node.is_root());
        assert!(node.child_edges().is_empty());
        assert_eq!(node.degree(), 0);
        assert_eq!(node.configuration(), &dvector![0.0, 1.0]);
    }

    #[test]
    fn adjacency_bookkeeping() {
        let mut node = Node::new(dvector![0.0]);
        let e1 = EdgeId::new();
        let e2 = EdgeId::new();

        node.add_child_edge(e1);
        node.add_child_edge(e2);
        assert_eq!(node.child_edges(), &[e1, e2]);

        node.remove_child_edge(e1);
        assert_eq!(node.child_edges(), &[e2]);

        node.set_parent_edge(Some(e1));
        assert!(!node.is_root());
        assert_eq!(node.degree(), 2);

        node.set_parent_edge(None);
        assert!(node.is_root());
    }
}
