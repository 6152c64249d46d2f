//! Ordered edge sequences over a tree.

use super::{EdgeId, NodeId, Tree};
use crate::error::{RerouteError, Result};
use crate::metrics::Metric;
use crate::scene::CollisionChecker;
use nalgebra::DVector;

/// Tolerance under which a configuration is taken to coincide with a node.
const NODE_TOL: f64 = 1e-9;

/// An ordered sequence of edges from a start node to the goal node.
///
/// The path is the sole owner of its tree; cloning a path deep-clones the
/// tree, so a replanner mutating its clone can never touch the executing
/// path. Consecutive edges share endpoints and the path cost is the sum of
/// the edge costs; any infinite edge cost makes the whole path obstructed.
#[derive(Debug, Clone)]
pub struct Path {
    tree: Tree,
    edges: Vec<EdgeId>,
}

impl Path {
    /// Path over an existing tree.
    pub fn new(tree: Tree, edges: Vec<EdgeId>) -> Result<Self> {
        if edges.is_empty() {
            return Err(RerouteError::MalformedPath("no edges".to_string()));
        }
        for pair in edges.windows(2) {
            let a = tree
                .edge(pair[0])
                .ok_or(RerouteError::InvalidEdge(pair[0].0))?;
            let b = tree
                .edge(pair[1])
                .ok_or(RerouteError::InvalidEdge(pair[1].0))?;
            if a.child() != b.parent() {
                return Err(RerouteError::MalformedPath(
                    "consecutive edges do not share endpoints".to_string(),
                ));
            }
        }
        if tree.edge(*edges.last().unwrap()).is_none() {
            return Err(RerouteError::InvalidEdge(edges.last().unwrap().0));
        }
        Ok(Self { tree, edges })
    }

    /// Straight-line path through a sequence of waypoints, building its own
    /// chain tree rooted at the first waypoint.
    pub fn from_waypoints(
        waypoints: &[DVector<f64>],
        metric: &dyn Metric,
        max_distance: f64,
    ) -> Result<Self> {
        if waypoints.len() < 2 {
            return Err(RerouteError::MalformedPath(
                "a path needs at least two waypoints".to_string(),
            ));
        }
        let mut tree = Tree::new(waypoints[0].clone(), max_distance);
        let mut previous = tree.root();
        let mut edges = Vec::with_capacity(waypoints.len() - 1);
        for w in &waypoints[1..] {
            let node = tree.add_node(w.clone());
            let cost = metric.cost(
                &tree.configuration(previous).unwrap().clone(),
                w,
            );
            edges.push(tree.connect(previous, node, cost)?);
            previous = node;
        }
        Ok(Self { tree, edges })
    }

    /// The tree this path runs over.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Consume the path, keeping the tree.
    pub fn into_tree(self) -> Tree {
        self.tree
    }

    /// Mutable access to the tree.
    pub fn tree_mut(&mut self) -> &mut Tree {
        &mut self.tree
    }

    /// Ordered edge ids.
    pub fn edges(&self) -> &[EdgeId] {
        &self.edges
    }

    /// First node of the path.
    pub fn start_node(&self) -> NodeId {
        self.tree.edge(self.edges[0]).unwrap().parent()
    }

    /// Last node of the path.
    pub fn goal_node(&self) -> NodeId {
        self.tree.edge(*self.edges.last().unwrap()).unwrap().child()
    }

    /// Goal configuration.
    pub fn goal_configuration(&self) -> &DVector<f64> {
        self.tree.configuration(self.goal_node()).unwrap()
    }

    /// Ordered node ids, start to goal.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids = vec![self.start_node()];
        for &eid in &self.edges {
            ids.push(self.tree.edge(eid).unwrap().child());
        }
        ids
    }

    /// Ordered waypoint configurations.
    pub fn waypoints(&self) -> Vec<DVector<f64>> {
        self.node_ids()
            .into_iter()
            .map(|id| self.tree.configuration(id).unwrap().clone())
            .collect()
    }

    /// Sum of edge costs.
    pub fn cost(&self) -> f64 {
        self.edges
            .iter()
            .map(|eid| self.tree.edge(*eid).unwrap().cost())
            .sum()
    }

    /// Whether any edge is currently obstructed.
    pub fn is_obstructed(&self) -> bool {
        self.edges
            .iter()
            .any(|eid| self.tree.edge(*eid).unwrap().is_obstructed())
    }

    /// Locate the edge whose segment contains `q`.
    ///
    /// Returns the edge index and the normalized position of the projection
    /// of `q` on it. Falls back to the closest edge when `q` is slightly off
    /// the path.
    pub fn find_edge_containing(&self, q: &DVector<f64>) -> Option<(usize, f64)> {
        let mut best: Option<(f64, usize, f64)> = None;
        for (index, &eid) in self.edges.iter().enumerate() {
            let edge = self.tree.edge(eid)?;
            let a = self.tree.configuration(edge.parent())?;
            let b = self.tree.configuration(edge.child())?;
            let ab = b - a;
            let len_sq = ab.norm_squared();
            let t = if len_sq < 1e-18 {
                0.0
            } else {
                ((q - a).dot(&ab) / len_sq).clamp(0.0, 1.0)
            };
            let distance = (q - (a + ab * t)).norm();
            if distance < NODE_TOL {
                return Some((index, t));
            }
            if best.map_or(true, |(bd, _, _)| distance < bd) {
                best = Some((distance, index, t));
            }
        }
        best.map(|(_, index, t)| (index, t))
    }

    /// Cost of the remaining path from configuration `q` to the goal.
    /// Infinite when any remaining edge (including the fraction of the edge
    /// containing `q`) is obstructed.
    pub fn cost_from(&self, q: &DVector<f64>) -> f64 {
        let Some((index, t)) = self.find_edge_containing(q) else {
            return self.cost();
        };
        let mut cost = 0.0;
        for (i, &eid) in self.edges.iter().enumerate().skip(index) {
            let edge_cost = self.tree.edge(eid).unwrap().cost();
            if edge_cost.is_infinite() {
                return f64::INFINITY;
            }
            cost += if i == index {
                edge_cost * (1.0 - t)
            } else {
                edge_cost
            };
        }
        cost
    }

    /// Insert a node at configuration `q` on the path, splitting the
    /// enclosing edge. When `q` coincides with an existing waypoint that
    /// node is returned and nothing is split.
    pub fn split_at(&mut self, q: &DVector<f64>) -> Result<NodeId> {
        let (index, _) = self
            .find_edge_containing(q)
            .ok_or_else(|| RerouteError::MalformedPath("empty path".to_string()))?;
        let eid = self.edges[index];
        let (parent, child) = {
            let edge = self.tree.edge(eid).unwrap();
            (edge.parent(), edge.child())
        };
        if (self.tree.configuration(parent).unwrap() - q).norm() < NODE_TOL {
            return Ok(parent);
        }
        if (self.tree.configuration(child).unwrap() - q).norm() < NODE_TOL {
            return Ok(child);
        }

        let node = self.tree.split_edge_at(eid, q.clone())?;
        let first = self
            .tree
            .node(node)
            .unwrap()
            .parent_edge()
            .ok_or(RerouteError::InvalidNode(node.0))?;
        let second = self.tree.node(node).unwrap().child_edges()[0];
        self.edges.splice(index..=index, [first, second]);
        Ok(node)
    }

    /// Edges of the path from `node` to the goal.
    pub fn edges_from_node(&self, node: NodeId) -> Option<Vec<EdgeId>> {
        let ids = self.node_ids();
        let position = ids.iter().position(|&n| n == node)?;
        Some(self.edges[position..].to_vec())
    }

    /// Edges of the path from the start up to `node`.
    pub fn edges_to_node(&self, node: NodeId) -> Option<Vec<EdgeId>> {
        let ids = self.node_ids();
        let position = ids.iter().position(|&n| n == node)?;
        Some(self.edges[..position].to_vec())
    }

    /// Re-check every edge from the one containing `from` (or the whole path
    /// when `None`) and refresh its cost: the metric's price when the segment
    /// is free, infinity when it is not. Returns whether every checked edge
    /// is free.
    pub fn revalidate_from(
        &mut self,
        from: Option<&DVector<f64>>,
        checker: &dyn CollisionChecker,
        metric: &dyn Metric,
    ) -> bool {
        let start_index = from
            .and_then(|q| self.find_edge_containing(q))
            .map(|(index, _)| index)
            .unwrap_or(0);

        let mut all_free = true;
        for &eid in &self.edges[start_index..] {
            let (parent, child) = {
                let edge = self.tree.edge(eid).unwrap();
                (edge.parent(), edge.child())
            };
            let a = self.tree.configuration(parent).unwrap().clone();
            let b = self.tree.configuration(child).unwrap().clone();
            let cost = if checker.check_segment(&a, &b) {
                metric.cost(&a, &b)
            } else {
                all_free = false;
                f64::INFINITY
            };
            let _ = self.tree.set_edge_cost(eid, cost);
        }
        all_free
    }

    /// Copy edge costs from another clone of the same path family. Only
    /// edges present in both trees are touched.
    pub fn copy_edge_costs_from(&mut self, other: &Path) {
        for eid in other.tree.edge_ids() {
            if self.tree.edge(eid).is_some() {
                let cost = other.tree.edge(eid).unwrap().cost();
                let _ = self.tree.set_edge_cost(eid, cost);
            }
        }
    }

    /// Rebase the path onto configuration `conf`: insert a node there,
    /// reroot the tree at it and rebuild the edge sequence down to the goal.
    /// This is the tree-side half of the manager's hot-swap.
    pub fn start_from(&mut self, conf: &DVector<f64>) -> Result<NodeId> {
        let goal = self.goal_node();
        let node = self.split_at(conf)?;
        if !self.tree.reroot(node) {
            return Err(RerouteError::Precondition(
                "hot-swap node cannot become the root".to_string(),
            ));
        }
        self.edges = self
            .tree
            .edges_to(goal)
            .ok_or_else(|| RerouteError::MalformedPath("goal detached from root".to_string()))?;
        if self.edges.is_empty() {
            return Err(RerouteError::MalformedPath(
                "hot-swap configuration coincides with the goal".to_string(),
            ));
        }
        Ok(node)
    }
}
