//! Speed-and-separation monitoring (SSM) edge weighting.
//!
//! Implements the human-aware cost used by MARSHA: the Euclidean edge length
//! is multiplied by a slowdown factor derived from the minimum separation
//! between the robot's points of interest and the "aware" obstacles. The
//! closer an edge passes to a human, the lower the velocity the ISO/TS-15066
//! stopping-distance inequality allows and the more expensive the edge
//! becomes. Obstruction itself stays the collision checker's verdict; SSM
//! costs are always finite.

use super::Metric;
use crate::config::MarshaParams;
use nalgebra::{DVector, Matrix3xX, Point3};
use rayon::prelude::*;

/// Nominal Cartesian tool speed the slowdown is measured against [m/s].
const NOMINAL_TOOL_SPEED: f64 = 1.0;

/// Upper clamp on the per-edge slowdown so costs stay finite.
const MAX_SLOWDOWN: f64 = 1e3;

/// Forward-kinematics seam: positions of the monitored points of interest.
///
/// The full chain evaluation lives outside this crate; tests and demos use
/// [`CartesianChain`]. `Sync` because the parallel estimator evaluates edge
/// samples from worker threads.
pub trait Chain: Send + Sync {
    /// Positions of the requested points of interest at configuration `q`.
    /// An empty `names` slice selects every POI the chain knows about.
    fn poi_positions(&self, q: &DVector<f64>, names: &[String]) -> Vec<Point3<f64>>;

    /// Produce a thread-local clone.
    fn clone_chain(&self) -> Box<dyn Chain>;
}

/// Trivial chain that reads the tool position straight from the first three
/// joint values (missing components are zero). Good enough for the planar
/// test scenes.
#[derive(Debug, Clone, Copy, Default)]
pub struct CartesianChain;

impl Chain for CartesianChain {
    fn poi_positions(&self, q: &DVector<f64>, _names: &[String]) -> Vec<Point3<f64>> {
        let coord = |i: usize| q.get(i).copied().unwrap_or(0.0);
        vec![Point3::new(coord(0), coord(1), coord(2))]
    }

    fn clone_chain(&self) -> Box<dyn Chain> {
        Box::new(*self)
    }
}

/// Estimator of the SSM slowdown along an edge.
pub trait SsmEstimator: Send + Sync {
    /// Install the positions of the obstacles the robot must be aware of,
    /// one per column.
    fn set_obstacle_positions(&mut self, positions: Matrix3xX<f64>);

    /// Select the points of interest on the chain.
    fn set_poi_names(&mut self, names: &[String]);

    /// Average slowdown (`>= 1`) over the segment from `a` to `b`.
    fn scale_factor(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64;

    /// Produce a thread-local clone.
    fn clone_ssm(&self) -> Box<dyn SsmEstimator>;
}

/// ISO/TS-15066 speed-and-separation estimator.
///
/// Samples the edge at `max_step_size`, finds the minimum POI-to-obstacle
/// distance at each sample, converts it into the maximum velocity that still
/// lets the robot stop before the protective distance is violated, and
/// averages the implied slowdown.
pub struct Ssm15066 {
    chain: Box<dyn Chain>,
    obstacle_positions: Matrix3xX<f64>,
    poi_names: Vec<String>,
    max_step_size: f64,
    threads: usize,
    max_cart_acc: f64,
    reaction_time: f64,
    min_distance: f64,
    human_velocity: f64,
}

impl Ssm15066 {
    /// Build an estimator from the MARSHA parameter block.
    pub fn new(chain: Box<dyn Chain>, params: &MarshaParams) -> Self {
        Self {
            chain,
            obstacle_positions: Matrix3xX::zeros(0),
            poi_names: params.poi_names.clone(),
            max_step_size: params.ssm_max_step_size.max(1e-6),
            threads: params.ssm_threads.max(1),
            max_cart_acc: params.max_cart_acc,
            reaction_time: params.reaction_time,
            min_distance: params.min_distance,
            human_velocity: params.v_h,
        }
    }

    /// Maximum velocity admitted by the stopping-distance inequality at
    /// separation `d`, per ISO/TS 15066:
    /// `S_p = v_h (T_r + v/a) + v T_r + v^2 / (2a) + C <= d`.
    fn allowed_velocity(&self, d: f64) -> f64 {
        let a = self.max_cart_acc;
        let b = self.human_velocity / a + self.reaction_time;
        let c = self.human_velocity * self.reaction_time + self.min_distance - d;
        let discriminant = b * b - 2.0 * c / a;
        if discriminant <= 0.0 {
            return 0.0;
        }
        (a * (discriminant.sqrt() - b)).max(0.0)
    }

    /// Slowdown at one configuration sample.
    fn slowdown_at(&self, q: &DVector<f64>) -> f64 {
        if self.obstacle_positions.ncols() == 0 {
            return 1.0;
        }

        let pois = self.chain.poi_positions(q, &self.poi_names);
        let mut min_distance = f64::INFINITY;
        for poi in &pois {
            for obstacle in self.obstacle_positions.column_iter() {
                let d = (poi.coords - obstacle).norm();
                min_distance = min_distance.min(d);
            }
        }

        let v_allowed = self
            .allowed_velocity(min_distance)
            .max(NOMINAL_TOOL_SPEED / MAX_SLOWDOWN);
        (NOMINAL_TOOL_SPEED / v_allowed).max(1.0)
    }

    fn sample_configurations(&self, a: &DVector<f64>, b: &DVector<f64>) -> Vec<DVector<f64>> {
        let length = (b - a).norm();
        let steps = (length / self.max_step_size).ceil() as usize;
        (0..=steps)
            .map(|i| {
                let t = if steps == 0 {
                    0.0
                } else {
                    i as f64 / steps as f64
                };
                a + (b - a) * t
            })
            .collect()
    }
}

impl SsmEstimator for Ssm15066 {
    fn set_obstacle_positions(&mut self, positions: Matrix3xX<f64>) {
        self.obstacle_positions = positions;
    }

    fn set_poi_names(&mut self, names: &[String]) {
        self.poi_names = names.to_vec();
    }

    fn scale_factor(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        let samples = self.sample_configurations(a, b);
        let total: f64 = if self.threads > 1 {
            samples.par_iter().map(|q| self.slowdown_at(q)).sum()
        } else {
            samples.iter().map(|q| self.slowdown_at(q)).sum()
        };
        total / samples.len() as f64
    }

    fn clone_ssm(&self) -> Box<dyn SsmEstimator> {
        Box::new(Self {
            chain: self.chain.clone_chain(),
            obstacle_positions: self.obstacle_positions.clone(),
            poi_names: self.poi_names.clone(),
            max_step_size: self.max_step_size,
            threads: self.threads,
            max_cart_acc: self.max_cart_acc,
            reaction_time: self.reaction_time,
            min_distance: self.min_distance,
            human_velocity: self.human_velocity,
        })
    }
}

/// Euclidean length multiplied by the SSM slowdown.
pub struct LengthPenaltyMetric {
    ssm: Box<dyn SsmEstimator>,
}

impl LengthPenaltyMetric {
    /// Wrap an estimator.
    pub fn new(ssm: Box<dyn SsmEstimator>) -> Self {
        Self { ssm }
    }

    /// Access the estimator.
    pub fn ssm(&self) -> &dyn SsmEstimator {
        self.ssm.as_ref()
    }

    /// Mutable access to the estimator.
    pub fn ssm_mut(&mut self) -> &mut dyn SsmEstimator {
        self.ssm.as_mut()
    }
}

impl Metric for LengthPenaltyMetric {
    fn cost(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        let length = (b - a).norm();
        if length == 0.0 {
            return 0.0;
        }
        length * self.ssm.scale_factor(a, b)
    }

    fn set_obstacle_positions(&mut self, positions: &Matrix3xX<f64>) {
        self.ssm.set_obstacle_positions(positions.clone());
    }

    fn clone_metric(&self) -> Box<dyn Metric> {
        Box::new(Self {
            ssm: self.ssm.clone_ssm(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn make_estimator() -> Ssm15066 {
        Ssm15066::new(Box::new(CartesianChain), &MarshaParams::default())
    }

    fn obstacle_at(x: f64, y: f64, z: f64) -> Matrix3xX<f64> {
        Matrix3xX::from_columns(&[nalgebra::Vector3::new(x, y, z)])
    }

    #[test]
    fn no_obstacles_means_no_slowdown() {
        let estimator = make_estimator();
        let factor = estimator.scale_factor(&dvector![0.0, 0.0], &dvector![1.0, 0.0]);
        assert_eq!(factor, 1.0);
    }

    #[test]
    fn far_obstacle_barely_slows_down() {
        let mut estimator = make_estimator();
        estimator.set_obstacle_positions(obstacle_at(100.0, 0.0, 0.0));
        let factor = estimator.scale_factor(&dvector![0.0, 0.0], &dvector![1.0, 0.0]);
        assert!(factor < 1.05, "factor {factor} too large for a distant obstacle");
    }

    #[test]
    fn approaching_obstacle_raises_factor_monotonically() {
        let mut estimator = make_estimator();

        estimator.set_obstacle_positions(obstacle_at(0.5, 3.0, 0.0));
        let far = estimator.scale_factor(&dvector![0.0, 0.0], &dvector![1.0, 0.0]);

        estimator.set_obstacle_positions(obstacle_at(0.5, 1.0, 0.0));
        let near = estimator.scale_factor(&dvector![0.0, 0.0], &dvector![1.0, 0.0]);

        assert!(near > far, "near {near} should exceed far {far}");
    }

    #[test]
    fn contact_distance_clamps_to_max_slowdown() {
        let mut estimator = make_estimator();
        estimator.set_obstacle_positions(obstacle_at(0.5, 0.0, 0.0));
        let factor = estimator.scale_factor(&dvector![0.0, 0.0], &dvector![1.0, 0.0]);
        assert!(factor.is_finite());
        assert!(factor <= MAX_SLOWDOWN);
        assert!(factor > 1.0);
    }

    #[test]
    fn allowed_velocity_is_zero_below_protective_distance() {
        let estimator = make_estimator();
        assert_eq!(estimator.allowed_velocity(0.0), 0.0);
        assert!(estimator.allowed_velocity(10.0) > 0.0);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let params = MarshaParams {
            ssm_threads: 4,
            ..MarshaParams::default()
        };
        let mut parallel = Ssm15066::new(Box::new(CartesianChain), &params);
        let mut sequential = make_estimator();

        let positions = obstacle_at(0.5, 0.8, 0.0);
        parallel.set_obstacle_positions(positions.clone());
        sequential.set_obstacle_positions(positions);

        let a = dvector![0.0, 0.0];
        let b = dvector![1.0, 0.0];
        let diff = (parallel.scale_factor(&a, &b) - sequential.scale_factor(&a, &b)).abs();
        assert!(diff < 1e-12);
    }

    #[test]
    fn length_penalty_metric_scales_euclidean_length() {
        let mut estimator = make_estimator();
        estimator.set_obstacle_positions(obstacle_at(0.5, 0.5, 0.0));
        let metric = LengthPenaltyMetric::new(Box::new(estimator));

        let a = dvector![0.0, 0.0];
        let b = dvector![1.0, 0.0];
        let cost = metric.cost(&a, &b);
        assert!(cost >= 1.0, "penalised cost {cost} must not undercut length");
        assert!(cost.is_finite());
    }

    #[test]
    fn metric_clone_carries_obstacles() {
        let mut metric = LengthPenaltyMetric::new(Box::new(make_estimator()));
        metric.set_obstacle_positions(&obstacle_at(0.5, 0.2, 0.0));
        let clone = metric.clone_metric();

        let a = dvector![0.0, 0.0];
        let b = dvector![1.0, 0.0];
        assert!((clone.cost(&a, &b) - metric.cost(&a, &b)).abs() < 1e-12);
    }
}
