//! Pluggable path-repair strategies.
//!
//! Every strategy takes the robot's current configuration, a clone of the
//! path being executed and a time budget, and answers with a
//! [`ReplanOutcome`]. Replanners run with no locks held: they only ever see
//! clones, and the manager publishes their result through the hot-swap.
//!
//! The set of strategies is closed, so dispatch is a tagged enum rather than
//! an open trait hierarchy.

mod drrt_star;
mod mars;

pub use drrt_star::DrrtStar;
pub use mars::Mars;

use crate::config::{ManagerConfig, ReplannerType};
use crate::error::{RerouteError, Result};
use crate::metrics::{LengthPenaltyMetric, Metric, SsmEstimator};
use crate::scene::CollisionChecker;
use crate::tree::Path;
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tracing::warn;

/// Result of one replanning call.
#[derive(Debug)]
pub struct ReplanOutcome {
    /// Whether a repaired, goal-connected path was found.
    pub success: bool,
    /// Whether mutations survive in the returned path. Strategies work on
    /// clones and roll failed repairs back before returning, so `mutated`
    /// without `success` never escapes a replanner.
    pub mutated: bool,
    /// The repaired path on success, the input path unchanged otherwise.
    pub path: Path,
}

impl ReplanOutcome {
    /// A silent no-op: nothing touched, path handed back unchanged.
    pub fn unchanged(path: Path) -> Self {
        Self {
            success: false,
            mutated: false,
            path,
        }
    }
}

/// A configured replanning strategy.
pub enum Replanner {
    /// Local informed RRT★ repair behind the obstruction.
    DrrtStar(DrrtStar),
    /// Multi-path repair over the alternate-path bank (MARS or MARSHA).
    Mars(Mars),
}

impl Replanner {
    /// Build the strategy selected by the configuration.
    ///
    /// `ssm` must be provided for MARSHA; the aliases `MPRRT`, `DRRT` and
    /// `anytimeDRRT` resolve to the DRRT★ repair.
    pub fn from_config(
        config: &ManagerConfig,
        checker: Box<dyn CollisionChecker>,
        metric: Box<dyn Metric>,
        lb: DVector<f64>,
        ub: DVector<f64>,
        ssm: Option<Box<dyn SsmEstimator>>,
    ) -> Result<Self> {
        match config.replanner_type {
            ReplannerType::DrrtStar => {
                Ok(Replanner::DrrtStar(DrrtStar::new(checker, metric, lb, ub)))
            }
            ReplannerType::Mprrt | ReplannerType::Drrt | ReplannerType::AnytimeDrrt => {
                warn!(
                    "replanner {:?} resolves to the DRRT* repair",
                    config.replanner_type
                );
                Ok(Replanner::DrrtStar(DrrtStar::new(checker, metric, lb, ub)))
            }
            ReplannerType::Mars => Ok(Replanner::Mars(Mars::new(
                checker,
                metric,
                config.mars.full_net_search,
            ))),
            ReplannerType::Marsha => {
                let ssm = ssm.ok_or_else(|| {
                    RerouteError::ConfigError("MARSHA requires an SSM estimator".to_string())
                })?;
                let mut ssm = ssm;
                ssm.set_poi_names(&config.marsha.poi_names);
                let metric = Box::new(LengthPenaltyMetric::new(ssm));
                if config.mars.full_net_search {
                    warn!("full net search not available for MARSHA, forcing it off");
                }
                Ok(Replanner::Mars(Mars::new(checker, metric, false)))
            }
        }
    }

    /// Repair `current_path` starting from `current_conf` within `budget`.
    pub fn replan(
        &mut self,
        current_conf: &DVector<f64>,
        current_path: &Path,
        budget: Duration,
    ) -> ReplanOutcome {
        match self {
            Replanner::DrrtStar(r) => r.replan(current_conf, current_path, budget),
            Replanner::Mars(r) => r.replan(current_conf, current_path, budget),
        }
    }

    /// Install clones of the alternate paths (MARS family only; a no-op for
    /// DRRT★).
    pub fn set_other_paths(&mut self, other_paths: Vec<Path>) {
        match self {
            Replanner::DrrtStar(_) => {}
            Replanner::Mars(r) => r.set_other_paths(other_paths),
        }
    }

    /// Update the obstacle positions seen by the strategy's metric.
    pub fn set_obstacle_positions(&mut self, positions: &nalgebra::Matrix3xX<f64>) {
        match self {
            Replanner::DrrtStar(r) => r.set_obstacle_positions(positions),
            Replanner::Mars(r) => r.set_obstacle_positions(positions),
        }
    }

    /// Update the scene seen by the strategy's collision checker.
    pub fn set_scene(&mut self, scene: &crate::scene::SceneSnapshot) {
        match self {
            Replanner::DrrtStar(r) => r.set_scene(scene),
            Replanner::Mars(r) => r.set_scene(scene),
        }
    }
}

/// Grow an RRT from `start` until it connects to `goal`.
///
/// This is the minimal seed planner the demos and tests use to produce the
/// initial path and the alternate-path bank; the production-grade solver
/// stays external.
#[allow(clippy::too_many_arguments)]
pub fn rrt_plan(
    start: &DVector<f64>,
    goal: &DVector<f64>,
    lb: &DVector<f64>,
    ub: &DVector<f64>,
    checker: &dyn CollisionChecker,
    metric: &dyn Metric,
    max_distance: f64,
    max_iterations: usize,
    seed: u64,
) -> Result<Path> {
    let mut tree = crate::tree::Tree::new(start.clone(), max_distance);
    let mut rng = StdRng::seed_from_u64(seed);
    let n = start.len();

    for iteration in 0..max_iterations {
        // Goal bias every tenth draw.
        let target = if iteration % 10 == 0 {
            goal.clone()
        } else {
            DVector::from_fn(n, |i, _| rng.gen_range(lb[i]..ub[i]))
        };

        let Some(node) = tree.extend(&target, checker, metric) else {
            continue;
        };
        let conf = tree.configuration(node).unwrap().clone();
        if (&conf - goal).norm() <= max_distance && checker.check_segment(&conf, goal) {
            let goal_node = tree.add_node(goal.clone());
            tree.connect(node, goal_node, metric.cost(&conf, goal))?;
            let edges = tree
                .edges_to(goal_node)
                .ok_or_else(|| RerouteError::PlanningFailed("goal unreachable".to_string()))?;
            return Path::new(tree, edges);
        }
    }

    Err(RerouteError::PlanningFailed(format!(
        "no path after {max_iterations} iterations"
    )))
}
