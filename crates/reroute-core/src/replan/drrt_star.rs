//! Local informed RRT★ repair (DRRT★).
//!
//! Repairs an obstructed path by rewiring the search tree behind the
//! obstruction. The tree is rerooted at the robot's current configuration,
//! a local informed sampler focuses growth between it and the first valid
//! node beyond the obstruction, and an anytime loop keeps improving the
//! reconnection until the budget runs out.
//!
//! The replanner only ever edits a deep clone of the executing path; a
//! failed repair discards the clone, so the caller observes either a
//! repaired path or exactly the path it passed in.

use super::ReplanOutcome;
use crate::metrics::Metric;
use crate::sampler::LocalInformedSampler;
use crate::scene::CollisionChecker;
use crate::tree::{CheckedEdges, NodeId, Path};
use nalgebra::{DVector, Matrix3xX};
use std::time::{Duration, Instant};
use tracing::debug;

/// Fraction of the budget the anytime loop may consume.
const ANYTIME_BUDGET_FRACTION: f64 = 0.98;

/// Radius multiplier for the local repair region.
const REPAIR_RADIUS_FACTOR: f64 = 1.5;

/// Traversal depth of the initial local rewire pass.
const LOCAL_REWIRE_DEPTH: usize = 2;

/// The DRRT★ repair strategy.
pub struct DrrtStar {
    checker: Box<dyn CollisionChecker>,
    metric: Box<dyn Metric>,
    lb: DVector<f64>,
    ub: DVector<f64>,
    seed: Option<u64>,
}

impl DrrtStar {
    /// New repairer over the given checker and metric.
    pub fn new(
        checker: Box<dyn CollisionChecker>,
        metric: Box<dyn Metric>,
        lb: DVector<f64>,
        ub: DVector<f64>,
    ) -> Self {
        Self {
            checker,
            metric,
            lb,
            ub,
            seed: None,
        }
    }

    /// Deterministic sampling for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Forward obstacle positions to the metric.
    pub fn set_obstacle_positions(&mut self, positions: &Matrix3xX<f64>) {
        self.metric.set_obstacle_positions(positions);
    }

    /// Update the scene seen by this replanner's checker.
    pub fn set_scene(&mut self, scene: &crate::scene::SceneSnapshot) {
        self.checker.set_scene(scene);
    }

    /// First valid node beyond the last obstructed edge of `path`.
    ///
    /// Scanning from the goal side, the first obstructed edge `e_i` yields
    /// the child of `e_{i+1}`; when `e_i` is the last edge, its own child
    /// (the goal) is the replan goal.
    fn replan_goal(path: &Path) -> Option<NodeId> {
        let edges = path.edges();
        for i in (0..edges.len()).rev() {
            let edge = path.tree().edge(edges[i])?;
            if edge.is_obstructed() {
                return if i + 1 < edges.len() {
                    Some(path.tree().edge(edges[i + 1])?.child())
                } else {
                    Some(edge.child())
                };
            }
        }
        None
    }

    /// Repair `current_path` from `current_conf` within `budget`.
    pub fn replan(
        &mut self,
        current_conf: &DVector<f64>,
        current_path: &Path,
        budget: Duration,
    ) -> ReplanOutcome {
        let tic = Instant::now();

        if current_path.cost_from(current_conf).is_finite() {
            // Nothing between the robot and the goal is obstructed.
            return ReplanOutcome::unchanged(current_path.clone());
        }

        let mut path = current_path.clone();
        let original_root = path.tree().root();
        let goal_node = path.goal_node();

        let node_replan = match path.split_at(current_conf) {
            Ok(node) => node,
            Err(e) => {
                debug!("replanning start not locatable on the path: {e}");
                return ReplanOutcome::unchanged(current_path.clone());
            }
        };
        let white_list = path.node_ids();

        let Some(replan_goal) = Self::replan_goal(&path) else {
            debug!("goal behind obstacle not found");
            return ReplanOutcome::unchanged(current_path.clone());
        };
        if replan_goal == node_replan {
            return ReplanOutcome::unchanged(current_path.clone());
        }

        let replan_conf = path.tree().configuration(node_replan).unwrap().clone();
        let goal_conf = path.tree().configuration(replan_goal).unwrap().clone();
        let radius = REPAIR_RADIUS_FACTOR * (&goal_conf - &replan_conf).norm();

        let mut sampler = LocalInformedSampler::new(
            replan_conf.clone(),
            goal_conf.clone(),
            self.lb.clone(),
            self.ub.clone(),
            f64::INFINITY,
        );
        if let Some(seed) = self.seed {
            sampler = sampler.with_seed(seed);
        }
        sampler.add_ball(replan_conf.clone(), radius);

        if !path.tree_mut().reroot(node_replan) {
            debug!("the replanning start node does not belong to the tree");
            return ReplanOutcome::unchanged(current_path.clone());
        }

        let mut checked = CheckedEdges::new();
        let mut tree_modified = path.tree_mut().rewire_only_with_path_check(
            node_replan,
            &mut checked,
            radius,
            &white_list,
            LOCAL_REWIRE_DEPTH,
            self.checker.as_ref(),
            self.metric.as_ref(),
        );

        let max_distance = path.tree().max_distance();
        let mut success = false;
        let mut cost_to_goal = f64::INFINITY;
        let deadline = budget.mul_f64(ANYTIME_BUDGET_FRACTION);

        while tic.elapsed() < deadline {
            let q = sampler.sample();
            let view = path.tree().descendants(node_replan, &[replan_goal]);
            let Some(new_node) = path.tree_mut().rewire(
                &q,
                &mut checked,
                radius,
                &white_list,
                self.checker.as_ref(),
                self.metric.as_ref(),
                Some(&view),
            ) else {
                continue;
            };
            tree_modified = true;

            let new_conf = path.tree().configuration(new_node).unwrap().clone();
            let distance_to_goal = (&new_conf - &goal_conf).norm();
            if distance_to_goal > max_distance {
                continue;
            }

            let cost_to_new = path.tree().cost_to_node(new_node);
            if cost_to_new + distance_to_goal < cost_to_goal
                && self.checker.check_segment(&new_conf, &goal_conf)
            {
                if let Some(pe) = path.tree().node(replan_goal).unwrap().parent_edge() {
                    path.tree_mut().remove_edge(pe);
                }
                let edge_cost = self.metric.cost(&new_conf, &goal_conf);
                if path
                    .tree_mut()
                    .connect(new_node, replan_goal, edge_cost)
                    .is_ok()
                {
                    cost_to_goal = cost_to_new + edge_cost;
                    success = true;
                }
            }
        }

        if success {
            let Some(edges) = path.tree().edges_to(goal_node) else {
                debug!("goal detached after repair, discarding");
                return ReplanOutcome::unchanged(current_path.clone());
            };
            let restored = path.tree_mut().reroot(original_root);
            assert!(restored, "original root must be restorable");
            let replanned = match Path::new(path.into_tree(), edges) {
                Ok(p) => p,
                Err(e) => {
                    debug!("repaired edge sequence rejected: {e}");
                    return ReplanOutcome::unchanged(current_path.clone());
                }
            };
            return ReplanOutcome {
                success: true,
                mutated: true,
                path: replanned,
            };
        }

        // Roll the clone back the way the algorithm prescribes before it is
        // discarded: original root, and no orphan replanning node.
        let restored = path.tree_mut().reroot(original_root);
        assert!(restored, "original root must be restorable");
        if tree_modified {
            debug!("tree changed but the path did not improve");
        } else {
            path.tree_mut().remove_node_if_unreferenced(node_replan);
            debug!("path unchanged");
        }
        ReplanOutcome::unchanged(current_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::EuclideanMetric;
    use crate::scene::{Obstacle, SceneChecker, SceneSnapshot};
    use nalgebra::dvector;

    fn bounds() -> (DVector<f64>, DVector<f64>) {
        (dvector![-5.0, -5.0], dvector![5.0, 5.0])
    }

    fn straight_path() -> Path {
        Path::from_waypoints(
            &[dvector![0.0, 0.0], dvector![1.0, 0.0], dvector![2.0, 0.0]],
            &EuclideanMetric,
            0.4,
        )
        .unwrap()
    }

    fn blocked_scene() -> SceneSnapshot {
        SceneSnapshot::new(vec![Obstacle::new("ball", dvector![1.5, 0.0], 0.1)])
    }

    /// Obstruct the path edges against `scene` the way the collision-check
    /// cycle would.
    fn obstruct(path: &mut Path, scene: &SceneSnapshot) {
        let checker = SceneChecker::new(scene.clone());
        path.revalidate_from(None, &checker, &EuclideanMetric);
    }

    fn make_replanner(scene: SceneSnapshot) -> DrrtStar {
        let (lb, ub) = bounds();
        DrrtStar::new(
            Box::new(SceneChecker::new(scene)),
            Box::new(EuclideanMetric),
            lb,
            ub,
        )
        .with_seed(42)
    }

    #[test]
    fn unobstructed_path_is_a_silent_no_op() {
        let path = straight_path();
        let mut replanner = make_replanner(SceneSnapshot::default());

        let outcome = replanner.replan(
            &dvector![0.5, 0.0],
            &path,
            Duration::from_millis(450),
        );

        assert!(!outcome.success);
        assert!(!outcome.mutated);
        assert_eq!(outcome.path.waypoints(), path.waypoints());
    }

    #[test]
    fn replan_goal_is_child_of_edge_after_the_obstruction() {
        let mut path = Path::from_waypoints(
            &[
                dvector![0.0, 0.0],
                dvector![1.0, 0.0],
                dvector![2.0, 0.0],
                dvector![3.0, 0.0],
            ],
            &EuclideanMetric,
            0.4,
        )
        .unwrap();
        // Obstruct edge 2 of 3: the replan goal skips past its child.
        let eid = path.edges()[1];
        path.tree_mut().set_edge_cost(eid, f64::INFINITY).unwrap();

        let goal = DrrtStar::replan_goal(&path).unwrap();
        assert_eq!(goal, path.node_ids()[3]);
    }

    #[test]
    fn replan_goal_on_last_edge_is_its_child() {
        let mut path = straight_path();
        let eid = path.edges()[1];
        path.tree_mut().set_edge_cost(eid, f64::INFINITY).unwrap();

        let goal = DrrtStar::replan_goal(&path).unwrap();
        assert_eq!(goal, path.goal_node());
    }

    #[test]
    fn repairs_a_straight_path_around_a_ball() {
        // Straight 2-DoF path with edge 2 obstructed; the repair must leave
        // from the current configuration and reconnect to (2, 0).
        let mut path = straight_path();
        let scene = blocked_scene();
        obstruct(&mut path, &scene);
        assert!(path.is_obstructed());

        let mut replanner = make_replanner(scene);
        let conf = dvector![1.0, 0.0];
        let outcome = replanner.replan(&conf, &path, Duration::from_millis(450));

        assert!(outcome.success);
        assert!(outcome.mutated);
        assert!(!outcome.path.is_obstructed());
        assert_eq!(outcome.path.waypoints()[0], conf);
        assert_eq!(*outcome.path.goal_configuration(), dvector![2.0, 0.0]);
        assert!(outcome.path.edges().len() <= 3);
        assert!(
            outcome.path.cost() <= 1.5,
            "repaired cost {} exceeds 1.5x the unobstructed remainder",
            outcome.path.cost()
        );
    }

    #[test]
    fn repaired_edges_are_collision_free() {
        let mut path = straight_path();
        let scene = blocked_scene();
        obstruct(&mut path, &scene);

        let mut replanner = make_replanner(scene.clone());
        let outcome = replanner.replan(
            &dvector![1.0, 0.0],
            &path,
            Duration::from_millis(450),
        );
        assert!(outcome.success);

        let checker = SceneChecker::new(scene);
        for pair in outcome.path.waypoints().windows(2) {
            assert!(checker.check_segment(&pair[0], &pair[1]));
        }
    }

    #[test]
    fn replanning_does_not_touch_the_input_path() {
        let mut path = straight_path();
        let scene = blocked_scene();
        obstruct(&mut path, &scene);

        let waypoints_before = path.waypoints();
        let nodes_before = path.tree().num_nodes();
        let cost_before: Vec<f64> = path
            .edges()
            .iter()
            .map(|&e| path.tree().edge(e).unwrap().cost())
            .collect();

        let mut replanner = make_replanner(scene);
        let outcome = replanner.replan(
            &dvector![1.0, 0.0],
            &path,
            Duration::from_millis(450),
        );
        assert!(outcome.success);

        assert_eq!(path.waypoints(), waypoints_before);
        assert_eq!(path.tree().num_nodes(), nodes_before);
        let cost_after: Vec<f64> = path
            .edges()
            .iter()
            .map(|&e| path.tree().edge(e).unwrap().cost())
            .collect();
        assert_eq!(cost_before, cost_after);
    }

    /// Checker that charges a realistic (millisecond-scale) price per query,
    /// like a planning-scene service would.
    struct SlowChecker {
        inner: SceneChecker,
        delay: Duration,
    }

    impl CollisionChecker for SlowChecker {
        fn set_scene(&mut self, scene: &SceneSnapshot) {
            self.inner.set_scene(scene);
        }

        fn check_segment(&self, a: &DVector<f64>, b: &DVector<f64>) -> bool {
            std::thread::sleep(self.delay);
            self.inner.check_segment(a, b)
        }

        fn clone_checker(&self) -> Box<dyn CollisionChecker> {
            Box::new(Self {
                inner: self.inner.clone(),
                delay: self.delay,
            })
        }
    }

    #[test]
    fn expired_deadline_is_reported_as_clean_failure() {
        let mut path = straight_path();
        let scene = blocked_scene();
        obstruct(&mut path, &scene);

        let (lb, ub) = bounds();
        let mut replanner = DrrtStar::new(
            Box::new(SlowChecker {
                inner: SceneChecker::new(scene),
                delay: Duration::from_millis(2),
            }),
            Box::new(EuclideanMetric),
            lb,
            ub,
        )
        .with_seed(42);

        let outcome = replanner.replan(&dvector![1.0, 0.0], &path, Duration::from_millis(5));

        assert!(!outcome.success);
        assert!(!outcome.mutated);
        // The executing path stays exactly as it was, obstruction included.
        assert_eq!(outcome.path.waypoints(), path.waypoints());
        let last = *outcome.path.edges().last().unwrap();
        assert!(outcome.path.tree().edge(last).unwrap().is_obstructed());
    }
}
