//! Rooted search tree over an id-keyed arena.
//!
//! The tree owns its nodes and edges; nodes refer to edges (and edges to
//! nodes) by id only, so there is no cyclic ownership and a deep clone is a
//! plain `Clone`. All editing primitives are time-free and never fail with an
//! error: "no progress" is a `None`/`false` result, and an edge that fails a
//! validity check keeps its place in the tree with its cost set to infinity.
//!
//! # Editing primitives
//!
//! - [`Tree::extend`]: classical RRT step toward a sample.
//! - [`Tree::rewire`]: RRT★ insertion with choose-parent and neighbor
//!   reparenting, guarded by a white list of protected nodes.
//! - [`Tree::rewire_only_with_path_check`]: pure rewire pass around an
//!   origin, no new node added.
//! - [`Tree::reroot`]: O(depth) reversal of the root chain, costs preserved.

mod edge;
mod node;
mod path;

pub use edge::{Edge, EdgeId};
pub use node::{Node, NodeId};
pub use path::Path;

use crate::error::{RerouteError, Result};
use crate::metrics::Metric;
use crate::scene::CollisionChecker;
use nalgebra::DVector;
use std::collections::{HashMap, HashSet};

/// Cache of edge validity verdicts established during one replanning call.
pub type CheckedEdges = HashMap<EdgeId, bool>;

/// A rooted tree of configurations.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: HashMap<NodeId, Node>,
    edges: HashMap<EdgeId, Edge>,
    root: NodeId,
    max_distance: f64,
}

impl Tree {
    /// Tree with a single root node.
    pub fn new(root_configuration: DVector<f64>, max_distance: f64) -> Self {
        let root = Node::new(root_configuration);
        let root_id = root.id();
        let mut nodes = HashMap::new();
        nodes.insert(root_id, root);
        Self {
            nodes,
            edges: HashMap::new(),
            root: root_id,
            max_distance,
        }
    }

    /// Current root.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// RRT step limit.
    pub fn max_distance(&self) -> f64 {
        self.max_distance
    }

    /// Number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Membership test.
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// Node accessor.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Edge accessor.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// Configuration of a node.
    pub fn configuration(&self, id: NodeId) -> Option<&DVector<f64>> {
        self.nodes.get(&id).map(|n| n.configuration())
    }

    /// Iterate edge ids in insertion order.
    pub fn edge_ids(&self) -> Vec<EdgeId> {
        let mut ids: Vec<EdgeId> = self.edges.keys().copied().collect();
        ids.sort_by_key(|e| e.0);
        ids
    }

    /// Set the cost of an edge. `f64::INFINITY` marks it obstructed.
    pub fn set_edge_cost(&mut self, id: EdgeId, cost: f64) -> Result<()> {
        let edge = self
            .edges
            .get_mut(&id)
            .ok_or(RerouteError::InvalidEdge(id.0))?;
        edge.set_cost(cost);
        Ok(())
    }

    /// Insert a detached node.
    pub fn add_node(&mut self, configuration: DVector<f64>) -> NodeId {
        let node = Node::new(configuration);
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    /// Connect `parent -> child` with a cost, updating both adjacency lists.
    pub fn connect(&mut self, parent: NodeId, child: NodeId, cost: f64) -> Result<EdgeId> {
        if !self.nodes.contains_key(&parent) {
            return Err(RerouteError::InvalidNode(parent.0));
        }
        if !self.nodes.contains_key(&child) {
            return Err(RerouteError::InvalidNode(child.0));
        }
        let edge = Edge::new(parent, child, cost);
        let id = edge.id();
        self.edges.insert(id, edge);
        self.nodes.get_mut(&parent).unwrap().add_child_edge(id);
        self.nodes.get_mut(&child).unwrap().set_parent_edge(Some(id));
        Ok(id)
    }

    /// Remove an edge, detaching both endpoints.
    pub fn remove_edge(&mut self, id: EdgeId) -> Option<Edge> {
        let edge = self.edges.remove(&id)?;
        if let Some(parent) = self.nodes.get_mut(&edge.parent()) {
            parent.remove_child_edge(id);
        }
        if let Some(child) = self.nodes.get_mut(&edge.child()) {
            if child.parent_edge() == Some(id) {
                child.set_parent_edge(None);
            }
        }
        Some(edge)
    }

    /// Remove a node nothing else depends on.
    ///
    /// A pass-through node (one parent edge, one child edge) is spliced out
    /// and its two edges merged into one whose cost is their sum, restoring
    /// the edge list that existed before a split. A leaf is simply detached.
    /// A node with several children, or the root, is left untouched.
    pub fn remove_node_if_unreferenced(&mut self, id: NodeId) -> bool {
        if id == self.root {
            return false;
        }
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        let parent_edge = node.parent_edge();
        let child_edges: Vec<EdgeId> = node.child_edges().to_vec();

        match (parent_edge, child_edges.as_slice()) {
            (Some(pe), [ce]) => {
                let (a, c1) = {
                    let e = &self.edges[&pe];
                    (e.parent(), e.cost())
                };
                let (b, c2) = {
                    let e = &self.edges[ce];
                    (e.child(), e.cost())
                };
                self.remove_edge(pe);
                self.remove_edge(*ce);
                self.nodes.remove(&id);
                let merged = if c1.is_infinite() || c2.is_infinite() {
                    f64::INFINITY
                } else {
                    c1 + c2
                };
                self.connect(a, b, merged).is_ok()
            }
            (Some(pe), []) => {
                self.remove_edge(pe);
                self.nodes.remove(&id);
                true
            }
            (None, []) => {
                self.nodes.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Nodes within `radius` of `q`, in insertion order.
    pub fn near(&self, q: &DVector<f64>, radius: f64) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .values()
            .filter(|n| (n.configuration() - q).norm() <= radius)
            .map(|n| n.id())
            .collect();
        ids.sort_by_key(|n| n.0);
        ids
    }

    /// Nearest node to `q`, ties broken by insertion order.
    pub fn nearest(&self, q: &DVector<f64>) -> Option<NodeId> {
        self.nearest_filtered(q, None)
    }

    fn nearest_filtered(&self, q: &DVector<f64>, restrict: Option<&HashSet<NodeId>>) -> Option<NodeId> {
        let mut best: Option<(f64, NodeId)> = None;
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_by_key(|n| n.0);
        for id in ids {
            if let Some(set) = restrict {
                if !set.contains(&id) {
                    continue;
                }
            }
            let d = (self.nodes[&id].configuration() - q).norm();
            if best.map_or(true, |(bd, _)| d < bd) {
                best = Some((d, id));
            }
        }
        best.map(|(_, id)| id)
    }

    fn near_filtered(
        &self,
        q: &DVector<f64>,
        radius: f64,
        restrict: Option<&HashSet<NodeId>>,
    ) -> Vec<NodeId> {
        self.near(q, radius)
            .into_iter()
            .filter(|id| restrict.map_or(true, |set| set.contains(id)))
            .collect()
    }

    /// Sum of edge costs from the root to `node`; infinite when the chain
    /// crosses an obstructed edge, `NAN`-free.
    pub fn cost_to_node(&self, node: NodeId) -> f64 {
        let mut cost = 0.0;
        let mut current = node;
        let mut hops = 0;
        while let Some(pe) = self.nodes.get(&current).and_then(|n| n.parent_edge()) {
            let edge = &self.edges[&pe];
            if edge.is_obstructed() {
                return f64::INFINITY;
            }
            cost += edge.cost();
            current = edge.parent();
            hops += 1;
            debug_assert!(hops <= self.nodes.len(), "parent chain cycle");
        }
        cost
    }

    /// Ordered edges from the root to `node`.
    pub fn edges_to(&self, node: NodeId) -> Option<Vec<EdgeId>> {
        if !self.contains(node) {
            return None;
        }
        let mut chain = Vec::new();
        let mut current = node;
        while let Some(pe) = self.nodes[&current].parent_edge() {
            chain.push(pe);
            current = self.edges[&pe].parent();
            if chain.len() > self.nodes.len() {
                return None;
            }
        }
        if current != self.root {
            return None;
        }
        chain.reverse();
        Some(chain)
    }

    /// Whether `ancestor` lies on the parent chain of `node`.
    pub fn is_ancestor_of(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = node;
        let mut hops = 0;
        while let Some(pe) = self.nodes.get(&current).and_then(|n| n.parent_edge()) {
            current = self.edges[&pe].parent();
            if current == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.nodes.len() {
                return false;
            }
        }
        false
    }

    /// Descendants of `from` (inclusive), hiding `black_list` nodes and
    /// everything below them.
    pub fn descendants(&self, from: NodeId, black_list: &[NodeId]) -> HashSet<NodeId> {
        let mut view = HashSet::new();
        if !self.contains(from) || black_list.contains(&from) {
            return view;
        }
        let mut frontier = vec![from];
        view.insert(from);
        while let Some(current) = frontier.pop() {
            for &ce in self.nodes[&current].child_edges() {
                let child = self.edges[&ce].child();
                if black_list.contains(&child) || view.contains(&child) {
                    continue;
                }
                view.insert(child);
                frontier.push(child);
            }
        }
        view
    }

    /// Change the root to `new_root`, reversing the edges along the chain
    /// from the old root. Edge costs are preserved.
    pub fn reroot(&mut self, new_root: NodeId) -> bool {
        if !self.contains(new_root) {
            return false;
        }
        if new_root == self.root {
            return true;
        }

        let mut chain = Vec::new();
        let mut current = new_root;
        while let Some(pe) = self.nodes[&current].parent_edge() {
            chain.push(pe);
            current = self.edges[&pe].parent();
        }
        if current != self.root {
            return false;
        }

        // Detach every chain edge first so each node's single-parent
        // invariant holds while the orientations flip.
        for &pe in &chain {
            let (parent, child) = {
                let e = &self.edges[&pe];
                (e.parent(), e.child())
            };
            self.nodes.get_mut(&parent).unwrap().remove_child_edge(pe);
            self.nodes.get_mut(&child).unwrap().set_parent_edge(None);
        }
        for &pe in &chain {
            self.edges.get_mut(&pe).unwrap().reverse();
            let (parent, child) = {
                let e = &self.edges[&pe];
                (e.parent(), e.child())
            };
            self.nodes.get_mut(&parent).unwrap().add_child_edge(pe);
            self.nodes.get_mut(&child).unwrap().set_parent_edge(Some(pe));
        }

        self.root = new_root;
        true
    }

    /// Split an edge at configuration `q`, producing a pass-through node.
    /// Finite costs are divided proportionally to the Euclidean split;
    /// an obstructed edge yields two obstructed halves.
    pub fn split_edge_at(&mut self, edge: EdgeId, q: DVector<f64>) -> Result<NodeId> {
        let (parent, child, cost) = {
            let e = self
                .edges
                .get(&edge)
                .ok_or(RerouteError::InvalidEdge(edge.0))?;
            (e.parent(), e.child(), e.cost())
        };
        let parent_conf = self.nodes[&parent].configuration().clone();
        let child_conf = self.nodes[&child].configuration().clone();

        let total = (&child_conf - &parent_conf).norm();
        let fraction = if total < 1e-12 {
            0.5
        } else {
            ((&q - &parent_conf).norm() / total).clamp(0.0, 1.0)
        };
        let (c1, c2) = if cost.is_infinite() {
            (f64::INFINITY, f64::INFINITY)
        } else {
            (cost * fraction, cost * (1.0 - fraction))
        };

        self.remove_edge(edge);
        let node = self.add_node(q);
        self.connect(parent, node, c1)?;
        self.connect(node, child, c2)?;
        Ok(node)
    }

    /// Classical RRT step toward `q`, limited to `max_distance`.
    /// Returns the new node, or `None` when the step is invalid.
    pub fn extend(
        &mut self,
        q: &DVector<f64>,
        checker: &dyn CollisionChecker,
        metric: &dyn Metric,
    ) -> Option<NodeId> {
        let nearest = self.nearest(q)?;
        let q_near = self.nodes[&nearest].configuration().clone();
        let q_new = self.steer(&q_near, q)?;
        if !checker.check_segment(&q_near, &q_new) {
            return None;
        }
        let cost = metric.cost(&q_near, &q_new);
        let node = self.add_node(q_new);
        self.connect(nearest, node, cost).ok()?;
        Some(node)
    }

    /// RRT★ insertion toward `q` with reparenting in both directions.
    ///
    /// The new node takes the cheapest valid parent among the nodes within
    /// `radius`; then every neighbor whose cost drops by going through the
    /// new node is reparented, unless it is white-listed (its incoming edge
    /// belongs to the protected path) or the move would create a cycle.
    /// `restrict` narrows every neighbor query to a subtree view.
    #[allow(clippy::too_many_arguments)]
    pub fn rewire(
        &mut self,
        q: &DVector<f64>,
        checked: &mut CheckedEdges,
        radius: f64,
        white_list: &[NodeId],
        checker: &dyn CollisionChecker,
        metric: &dyn Metric,
        restrict: Option<&HashSet<NodeId>>,
    ) -> Option<NodeId> {
        let nearest = self.nearest_filtered(q, restrict)?;
        let q_near = self.nodes[&nearest].configuration().clone();
        let q_new = self.steer(&q_near, q)?;
        if !checker.check_segment(&q_near, &q_new) {
            return None;
        }

        let neighbors = self.near_filtered(&q_new, radius, restrict);

        let mut best_parent = nearest;
        let mut best_cost =
            self.cost_to_node(nearest) + metric.cost(&q_near, &q_new);
        for &nb in &neighbors {
            if nb == nearest {
                continue;
            }
            let c_nb = self.cost_to_node(nb);
            if !c_nb.is_finite() {
                continue;
            }
            let nb_conf = self.nodes[&nb].configuration().clone();
            let candidate = c_nb + metric.cost(&nb_conf, &q_new);
            if candidate < best_cost
                && self.path_valid_to(nb, checked, checker)
                && checker.check_segment(&nb_conf, &q_new)
            {
                best_parent = nb;
                best_cost = candidate;
            }
        }

        if !self.path_valid_to(best_parent, checked, checker) {
            return None;
        }

        let parent_conf = self.nodes[&best_parent].configuration().clone();
        let node = self.add_node(q_new.clone());
        self.connect(best_parent, node, metric.cost(&parent_conf, &q_new))
            .ok()?;

        for &nb in &neighbors {
            if nb == best_parent || nb == self.root || white_list.contains(&nb) {
                continue;
            }
            if self.is_ancestor_of(nb, node) {
                continue;
            }
            let nb_conf = self.nodes[&nb].configuration().clone();
            let through_new = best_cost + metric.cost(&q_new, &nb_conf);
            if through_new < self.cost_to_node(nb)
                && checker.check_segment(&q_new, &nb_conf)
            {
                if let Some(pe) = self.nodes[&nb].parent_edge() {
                    self.remove_edge(pe);
                }
                let cost = metric.cost(&q_new, &nb_conf);
                let _ = self.connect(node, nb, cost);
            }
        }

        Some(node)
    }

    /// Pure rewire pass around `origin`: no node is added, nodes reachable
    /// from `origin` within `depth` child hops are reparented onto cheaper
    /// valid parents found within `radius`. Returns whether anything moved.
    #[allow(clippy::too_many_arguments)]
    pub fn rewire_only_with_path_check(
        &mut self,
        origin: NodeId,
        checked: &mut CheckedEdges,
        radius: f64,
        white_list: &[NodeId],
        depth: usize,
        checker: &dyn CollisionChecker,
        metric: &dyn Metric,
    ) -> bool {
        if !self.contains(origin) {
            return false;
        }
        let mut modified = false;
        let mut visited: HashSet<NodeId> = HashSet::new();
        visited.insert(origin);
        let mut frontier = vec![origin];

        for _ in 0..depth {
            let mut next = Vec::new();
            for &current in &frontier {
                for &ce in self.nodes[&current].child_edges() {
                    let child = self.edges[&ce].child();
                    if visited.insert(child) {
                        next.push(child);
                    }
                }
            }

            for &x in &next {
                if x == self.root || white_list.contains(&x) {
                    continue;
                }
                let x_conf = self.nodes[&x].configuration().clone();
                let mut current_cost = self.cost_to_node(x);
                for p in self.near(&x_conf, radius) {
                    if p == x || self.is_ancestor_of(x, p) {
                        continue;
                    }
                    let p_cost = self.cost_to_node(p);
                    if !p_cost.is_finite() {
                        continue;
                    }
                    let p_conf = self.nodes[&p].configuration().clone();
                    let candidate = p_cost + metric.cost(&p_conf, &x_conf);
                    if candidate < current_cost
                        && self.path_valid_to(p, checked, checker)
                        && checker.check_segment(&p_conf, &x_conf)
                    {
                        if let Some(pe) = self.nodes[&x].parent_edge() {
                            self.remove_edge(pe);
                        }
                        let cost = metric.cost(&p_conf, &x_conf);
                        if self.connect(p, x, cost).is_ok() {
                            current_cost = candidate;
                            modified = true;
                        }
                    }
                }
            }
            frontier = next;
        }
        modified
    }

    /// Verify the validity of every edge from the root to `node` through
    /// the checker's cache-aware edge query. An invalid edge gets its cost
    /// set to infinity and fails the whole chain; the edge stays in the
    /// tree.
    pub fn path_valid_to(
        &mut self,
        node: NodeId,
        checked: &mut CheckedEdges,
        checker: &dyn CollisionChecker,
    ) -> bool {
        let Some(chain) = self.edges_to(node) else {
            return false;
        };
        for eid in chain {
            let valid = {
                let e = &self.edges[&eid];
                let a = self.nodes[&e.parent()].configuration().clone();
                let b = self.nodes[&e.child()].configuration().clone();
                checker.check_edge(e, &a, &b, checked)
            };
            if !valid {
                self.edges.get_mut(&eid).unwrap().set_cost(f64::INFINITY);
                return false;
            }
        }
        true
    }

    fn steer(&self, from: &DVector<f64>, toward: &DVector<f64>) -> Option<DVector<f64>> {
        let delta = toward - from;
        let d = delta.norm();
        if d < 1e-12 {
            return None;
        }
        if d <= self.max_distance {
            Some(toward.clone())
        } else {
            Some(from + delta * (self.max_distance / d))
        }
    }
}
