//! Interpolation cursor for the trajectory tick.
//!
//! The cursor tracks where on the executing path the published reference is,
//! as an edge index plus a normalized position on that edge. Each tick reads
//! the reference at the cursor, then advances it by at most
//! `max_joint_speed * dt` of arclength. The cursor refuses to enter an
//! obstructed edge: the reference holds at the obstruction boundary until a
//! repair is hot-swapped in, which also keeps the per-tick joint delta
//! bounded across the swap.

use crate::tree::Path;
use nalgebra::DVector;

/// Position of the published reference along the executing path.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    edge_index: usize,
    t: f64,
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new()
    }
}

impl Cursor {
    /// Cursor at the start of the path.
    pub fn new() -> Self {
        Self {
            edge_index: 0,
            t: 0.0,
        }
    }

    /// Jump back to the start of the (new) path. Called by the hot-swap.
    pub fn reset(&mut self) {
        self.edge_index = 0;
        self.t = 0.0;
    }

    /// Index of the edge the cursor is on.
    pub fn edge_index(&self) -> usize {
        self.edge_index
    }

    /// Reference configuration at the cursor.
    pub fn position(&self, path: &Path) -> DVector<f64> {
        let edges = path.edges();
        let index = self.edge_index.min(edges.len() - 1);
        let edge = path.tree().edge(edges[index]).unwrap();
        let a = path.tree().configuration(edge.parent()).unwrap();
        let b = path.tree().configuration(edge.child()).unwrap();
        a + (b - a) * self.t
    }

    /// Whether the cursor has reached the end of the path.
    pub fn at_end(&self, path: &Path) -> bool {
        self.edge_index >= path.edges().len()
            || (self.edge_index == path.edges().len() - 1 && self.t >= 1.0)
    }

    /// Advance by at most `ds` of joint-space arclength, holding at
    /// obstructed edges and at the end of the path.
    pub fn advance(&mut self, path: &Path, ds: f64) {
        let mut remaining = ds;
        let edges = path.edges();

        while remaining > 0.0 && self.edge_index < edges.len() {
            let edge = path.tree().edge(edges[self.edge_index]).unwrap();
            if edge.is_obstructed() {
                // Hold at the obstruction boundary.
                return;
            }
            let a = path.tree().configuration(edge.parent()).unwrap();
            let b = path.tree().configuration(edge.child()).unwrap();
            let length = (b - a).norm();
            if length < 1e-12 {
                self.next_edge(edges.len());
                continue;
            }

            let available = (1.0 - self.t) * length;
            if remaining < available {
                self.t += remaining / length;
                return;
            }
            remaining -= available;
            if !self.next_edge(edges.len()) {
                return;
            }
        }
    }

    /// Step to the next edge; clamps at the path end.
    fn next_edge(&mut self, num_edges: usize) -> bool {
        if self.edge_index + 1 < num_edges {
            self.edge_index += 1;
            self.t = 0.0;
            true
        } else {
            self.t = 1.0;
            false
        }
    }
}
