//! Edge cost metrics.
//!
//! A [`Metric`] prices the motion between two configurations. The replanners
//! and the tree editor only see this trait, so the human-aware SSM-weighted
//! metric ([`ssm::LengthPenaltyMetric`]) plugs in without touching the search
//! code.

pub mod ssm;

pub use ssm::{CartesianChain, Chain, LengthPenaltyMetric, Ssm15066, SsmEstimator};

use nalgebra::{DVector, Matrix3xX};

/// Cost of moving between two configurations.
///
/// Implementations must be thread-clonable: each thread works with its own
/// instance obtained through [`Metric::clone_metric`], sharing only immutable
/// data.
pub trait Metric: Send + Sync {
    /// Non-negative cost of the straight segment from `a` to `b`.
    fn cost(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64;

    /// Update the obstacle positions the metric is aware of.
    ///
    /// Plain geometric metrics ignore this; the SSM-weighted metric forwards
    /// it to its estimator.
    fn set_obstacle_positions(&mut self, _positions: &Matrix3xX<f64>) {}

    /// Produce a thread-local clone.
    fn clone_metric(&self) -> Box<dyn Metric>;
}

/// Plain Euclidean joint-space metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanMetric;

impl Metric for EuclideanMetric {
    fn cost(&self, a: &DVector<f64>, b: &DVector<f64>) -> f64 {
        (b - a).norm()
    }

    fn clone_metric(&self) -> Box<dyn Metric> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    #[test]
    fn euclidean_cost_is_symmetric() {
        let metric = EuclideanMetric;
        let a = dvector![0.0, 0.0];
        let b = dvector![3.0, 4.0];
        assert_eq!(metric.cost(&a, &b), 5.0);
        assert_eq!(metric.cost(&b, &a), 5.0);
    }

    #[test]
    fn euclidean_cost_of_identical_points_is_zero() {
        let metric = EuclideanMetric;
        let a = dvector![1.0, 2.0, 3.0];
        assert_eq!(metric.cost(&a, &a), 0.0);
    }

    #[test]
    fn clone_metric_is_independent() {
        let metric = EuclideanMetric;
        let clone = metric.clone_metric();
        let a = dvector![0.0];
        let b = dvector![2.0];
        assert_eq!(clone.cost(&a, &b), metric.cost(&a, &b));
    }
}
