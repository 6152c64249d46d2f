//! Multi-path anytime repair (MARS / MARSHA).
//!
//! Instead of growing a detour from scratch, MARS stitches the executing
//! path to one of a bank of precomputed alternate paths: it bridges from a
//! node still reachable before the obstruction to a node of an alternate
//! whose remaining suffix is free, then spends the leftover budget on local
//! rewiring around the stitch. MARSHA is the same search under the
//! SSM-weighted metric, with the exhaustive net search forced off.

use super::ReplanOutcome;
use crate::metrics::Metric;
use crate::scene::CollisionChecker;
use crate::tree::{CheckedEdges, NodeId, Path};
use nalgebra::{DVector, Matrix3xX};
use std::time::{Duration, Instant};
use tracing::debug;

/// Fraction of the budget the bridge search and improvement may consume.
const SEARCH_BUDGET_FRACTION: f64 = 0.98;

/// Radius multiplier for the rewire pass around the stitch.
const STITCH_RADIUS_FACTOR: f64 = 1.5;

/// A candidate stitch between the executing path and an alternate.
struct Bridge {
    /// Index of the donor path in the bank.
    donor: usize,
    /// Bridge start on the executing path (still reachable).
    from: NodeId,
    /// Bridge end on the donor path.
    to: NodeId,
    /// Full stitched cost: prefix + bridge + donor suffix.
    cost: f64,
}

/// The MARS repair strategy.
///
/// Unlike DRRT★ it never samples new configurations, so it carries no joint
/// bounds: every waypoint of a repaired path already existed on the
/// executing path or on one of the donors.
pub struct Mars {
    checker: Box<dyn CollisionChecker>,
    metric: Box<dyn Metric>,
    other_paths: Vec<Path>,
    full_net_search: bool,
}

impl Mars {
    /// New repairer over the given checker and metric.
    pub fn new(
        checker: Box<dyn CollisionChecker>,
        metric: Box<dyn Metric>,
        full_net_search: bool,
    ) -> Self {
        Self {
            checker,
            metric,
            other_paths: Vec::new(),
            full_net_search,
        }
    }

    /// Whether the exhaustive net search is enabled.
    pub fn full_net_search(&self) -> bool {
        self.full_net_search
    }

    /// Install clones of the alternate-path bank.
    pub fn set_other_paths(&mut self, other_paths: Vec<Path>) {
        self.other_paths = other_paths;
    }

    /// Number of alternates currently installed.
    pub fn num_other_paths(&self) -> usize {
        self.other_paths.len()
    }

    /// Forward obstacle positions to the metric.
    pub fn set_obstacle_positions(&mut self, positions: &Matrix3xX<f64>) {
        self.metric.set_obstacle_positions(positions);
    }

    /// Update the scene seen by this replanner's checker.
    pub fn set_scene(&mut self, scene: &crate::scene::SceneSnapshot) {
        self.checker.set_scene(scene);
    }

    /// Cost of the donor path from `node` to its goal; infinite when any
    /// suffix edge is obstructed.
    fn suffix_cost(path: &Path, node: NodeId) -> f64 {
        let Some(edges) = path.edges_from_node(node) else {
            return f64::INFINITY;
        };
        edges
            .iter()
            .map(|&e| path.tree().edge(e).unwrap().cost())
            .sum()
    }

    /// Enumerate bridge candidates, cheapest first.
    ///
    /// `reachable` are the executing-path nodes before the obstruction with
    /// their cost from the current configuration. Within one donor the
    /// candidates are cost-ordered; `full_net_search` merges the donors into
    /// one globally ordered list, otherwise donors are visited in bank
    /// order (first admissible donor wins).
    fn candidates(&self, path: &Path, reachable: &[(NodeId, f64)]) -> Vec<Bridge> {
        let mut per_donor: Vec<Vec<Bridge>> = Vec::with_capacity(self.other_paths.len());
        for (j, donor) in self.other_paths.iter().enumerate() {
            let mut list = Vec::new();
            for m in donor.node_ids() {
                let suffix = Self::suffix_cost(donor, m);
                if !suffix.is_finite() {
                    continue;
                }
                let m_conf = donor.tree().configuration(m).unwrap();
                // Nearest reachable node hosts the bridge.
                let mut best: Option<Bridge> = None;
                for &(s, prefix_cost) in reachable {
                    let s_conf = path.tree().configuration(s).unwrap();
                    let bridge_cost = self.metric.cost(s_conf, m_conf);
                    let total = prefix_cost + bridge_cost + suffix;
                    if best.as_ref().map_or(true, |b| total < b.cost) {
                        best = Some(Bridge {
                            donor: j,
                            from: s,
                            to: m,
                            cost: total,
                        });
                    }
                }
                if let Some(bridge) = best {
                    list.push(bridge);
                }
            }
            list.sort_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap());
            per_donor.push(list);
        }

        if self.full_net_search {
            let mut all: Vec<Bridge> = per_donor.into_iter().flatten().collect();
            all.sort_by(|a, b| a.cost.partial_cmp(&b.cost).unwrap());
            all
        } else {
            per_donor.into_iter().flatten().collect()
        }
    }

    /// Repair `current_path` from `current_conf` within `budget`.
    pub fn replan(
        &mut self,
        current_conf: &DVector<f64>,
        current_path: &Path,
        budget: Duration,
    ) -> ReplanOutcome {
        let tic = Instant::now();
        let deadline = budget.mul_f64(SEARCH_BUDGET_FRACTION);

        if current_path.cost_from(current_conf).is_finite() {
            return ReplanOutcome::unchanged(current_path.clone());
        }
        if self.other_paths.is_empty() {
            debug!("no alternate paths to stitch to");
            return ReplanOutcome::unchanged(current_path.clone());
        }

        let mut path = current_path.clone();
        let node_replan = match path.split_at(current_conf) {
            Ok(node) => node,
            Err(e) => {
                debug!("replanning start not locatable on the path: {e}");
                return ReplanOutcome::unchanged(current_path.clone());
            }
        };
        // Executing-path nodes still reachable before the first obstructed
        // edge, with their cost from the current configuration. Collected
        // before the reroot, while the edge sequence still reads start to
        // goal.
        let node_ids = path.node_ids();
        let position = node_ids
            .iter()
            .position(|&n| n == node_replan)
            .unwrap_or(0);
        let mut reachable: Vec<(NodeId, f64)> = vec![(node_replan, 0.0)];
        let mut running = 0.0;
        for (i, &eid) in path.edges().iter().enumerate().skip(position) {
            let edge = path.tree().edge(eid).unwrap();
            if edge.is_obstructed() {
                break;
            }
            running += edge.cost();
            reachable.push((node_ids[i + 1], running));
        }
        let white_list = node_ids.clone();

        if !path.tree_mut().reroot(node_replan) {
            debug!("the replanning start node does not belong to the tree");
            return ReplanOutcome::unchanged(current_path.clone());
        }
        let candidates = self.candidates(&path, &reachable);
        if candidates.is_empty() {
            debug!("no finite bridge candidate");
            return ReplanOutcome::unchanged(current_path.clone());
        }

        for bridge in candidates {
            if tic.elapsed() >= deadline {
                debug!("bridge search ran out of budget");
                return ReplanOutcome::unchanged(current_path.clone());
            }

            let from_conf = path.tree().configuration(bridge.from).unwrap().clone();
            let to_conf = {
                let donor = &self.other_paths[bridge.donor];
                donor.tree().configuration(bridge.to).unwrap().clone()
            };
            if !self.checker.check_segment(&from_conf, &to_conf) {
                continue;
            }

            // Import the donor suffix into the repaired tree and stitch.
            let donor = &self.other_paths[bridge.donor];
            let donor_nodes = donor.node_ids();
            let donor_position = donor_nodes.iter().position(|&n| n == bridge.to).unwrap();

            let bridge_cost = self.metric.cost(&from_conf, &to_conf);
            let mut imported = path.tree_mut().add_node(to_conf.clone());
            if path
                .tree_mut()
                .connect(bridge.from, imported, bridge_cost)
                .is_err()
            {
                continue;
            }
            for (offset, &eid) in donor.edges()[donor_position..].iter().enumerate() {
                let cost = donor.tree().edge(eid).unwrap().cost();
                let next_conf = donor
                    .tree()
                    .configuration(donor_nodes[donor_position + offset + 1])
                    .unwrap()
                    .clone();
                let next = path.tree_mut().add_node(next_conf);
                path.tree_mut()
                    .connect(imported, next, cost)
                    .expect("imported suffix stays connected");
                imported = next;
            }
            let stitched_goal = imported;

            // Anytime improvement around the stitch while budget remains.
            let radius = STITCH_RADIUS_FACTOR * (&to_conf - &from_conf).norm();
            let mut checked = CheckedEdges::new();
            while tic.elapsed() < deadline {
                let modified = path.tree_mut().rewire_only_with_path_check(
                    bridge.from,
                    &mut checked,
                    radius,
                    &white_list,
                    2,
                    self.checker.as_ref(),
                    self.metric.as_ref(),
                );
                if !modified {
                    break;
                }
            }

            let Some(edges) = path.tree().edges_to(stitched_goal) else {
                continue;
            };
            match Path::new(path.into_tree(), edges) {
                Ok(repaired) => {
                    return ReplanOutcome {
                        success: true,
                        mutated: true,
                        path: repaired,
                    };
                }
                Err(e) => {
                    debug!("stitched edge sequence rejected: {e}");
                    return ReplanOutcome::unchanged(current_path.clone());
                }
            }
        }

        debug!("no admissible bridge");
        ReplanOutcome::unchanged(current_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EuclideanMetric;
    use crate::scene::{Obstacle, SceneChecker, SceneSnapshot};
    use nalgebra::dvector;

    fn primary_path() -> Path {
        Path::from_waypoints(
            &[dvector![0.0, 0.0], dvector![1.0, 0.0], dvector![2.0, 0.0]],
            &EuclideanMetric,
            0.4,
        )
        .unwrap()
    }

    fn alternate_path() -> Path {
        Path::from_waypoints(
            &[dvector![0.0, 0.0], dvector![1.0, 1.0], dvector![2.0, 0.0]],
            &EuclideanMetric,
            0.4,
        )
        .unwrap()
    }

    fn blocked_scene() -> SceneSnapshot {
        SceneSnapshot::new(vec![Obstacle::new("ball", dvector![1.5, 0.0], 0.1)])
    }

    fn make_mars(scene: SceneSnapshot, full_net_search: bool) -> Mars {
        Mars::new(
            Box::new(SceneChecker::new(scene)),
            Box::new(EuclideanMetric),
            full_net_search,
        )
    }

    fn obstruct(path: &mut Path, scene: &SceneSnapshot) {
        let checker = SceneChecker::new(scene.clone());
        path.revalidate_from(None, &checker, &EuclideanMetric);
    }

    #[test]
    fn unobstructed_path_is_a_silent_no_op() {
        let path = primary_path();
        let mut mars = make_mars(SceneSnapshot::default(), true);
        mars.set_other_paths(vec![alternate_path()]);

        let outcome = mars.replan(&dvector![0.5, 0.0], &path, Duration::from_millis(450));
        assert!(!outcome.success);
        assert!(!outcome.mutated);
    }

    #[test]
    fn empty_bank_cannot_repair() {
        let mut path = primary_path();
        let scene = blocked_scene();
        obstruct(&mut path, &scene);

        let mut mars = make_mars(scene, true);
        let outcome = mars.replan(&dvector![1.0, 0.0], &path, Duration::from_millis(450));
        assert!(!outcome.success);
        assert_eq!(outcome.path.waypoints(), path.waypoints());
    }

    #[test]
    fn stitches_through_the_alternate_over_the_obstruction() {
        // The direct bridge (1,0) -> (2,0) crosses the ball, so the repair
        // must route through the alternate's (1,1) waypoint.
        let mut path = primary_path();
        let scene = blocked_scene();
        obstruct(&mut path, &scene);

        let mut mars = make_mars(scene.clone(), true);
        mars.set_other_paths(vec![alternate_path()]);

        let conf = dvector![1.0, 0.0];
        let outcome = mars.replan(&conf, &path, Duration::from_millis(450));

        assert!(outcome.success);
        assert!(outcome.mutated);
        assert!(!outcome.path.is_obstructed());

        let waypoints = outcome.path.waypoints();
        assert_eq!(waypoints[0], conf);
        assert_eq!(*waypoints.last().unwrap(), dvector![2.0, 0.0]);

        // The stitched sequence is connected and collision-free throughout.
        let checker = SceneChecker::new(scene);
        for pair in waypoints.windows(2) {
            assert!(checker.check_segment(&pair[0], &pair[1]));
        }
        assert!(waypoints.iter().any(|w| (w - dvector![1.0, 1.0]).norm() < 1e-9));
    }

    #[test]
    fn repair_does_not_touch_input_or_donor_paths() {
        let mut path = primary_path();
        let scene = blocked_scene();
        obstruct(&mut path, &scene);
        let donor = alternate_path();

        let path_before = path.waypoints();
        let donor_before = donor.waypoints();

        let mut mars = make_mars(scene, true);
        mars.set_other_paths(vec![donor]);
        let outcome = mars.replan(&dvector![1.0, 0.0], &path, Duration::from_millis(450));
        assert!(outcome.success);

        assert_eq!(path.waypoints(), path_before);
        assert_eq!(mars.other_paths[0].waypoints(), donor_before);
    }

    #[test]
    fn obstructed_donor_suffix_is_skipped() {
        // Block both the primary edge 2 and the alternate's descent, leaving
        // no admissible bridge.
        let scene = SceneSnapshot::new(vec![
            Obstacle::new("a", dvector![1.5, 0.0], 0.1),
            Obstacle::new("b", dvector![1.5, 0.5], 0.45),
        ]);
        let mut path = primary_path();
        obstruct(&mut path, &scene);
        let mut donor = alternate_path();
        obstruct(&mut donor, &scene);
        assert!(donor.is_obstructed());

        let mut mars = make_mars(scene, true);
        mars.set_other_paths(vec![donor]);

        let outcome = mars.replan(&dvector![1.0, 0.0], &path, Duration::from_millis(100));
        assert!(!outcome.success);
        assert_eq!(outcome.path.waypoints(), path.waypoints());
    }

    #[test]
    fn zero_budget_fails_cleanly() {
        let mut path = primary_path();
        let scene = blocked_scene();
        obstruct(&mut path, &scene);

        let mut mars = make_mars(scene, true);
        mars.set_other_paths(vec![alternate_path()]);

        let outcome = mars.replan(&dvector![1.0, 0.0], &path, Duration::ZERO);
        assert!(!outcome.success);
        assert!(!outcome.mutated);
        assert_eq!(outcome.path.waypoints(), path.waypoints());
    }
}
