//! Local informed sampling.
//!
//! [`LocalInformedSampler`] draws configurations biased to an ellipsoid whose
//! foci are two configurations of interest, optionally mixed with a bank of
//! balls. With balls present, half of the draws come uniformly from one
//! random ball, which focuses tree growth near an obstructed region while the
//! ellipsoid half keeps global exploration alive.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Attempts at drawing inside `[lb, ub]` before clamping.
const MAX_REJECTIONS: usize = 100;

/// Sampler over an informed ellipsoid plus a bank of balls.
pub struct LocalInformedSampler {
    focus_a: DVector<f64>,
    focus_b: DVector<f64>,
    lb: DVector<f64>,
    ub: DVector<f64>,
    cost_bound: f64,
    balls: Vec<(DVector<f64>, f64)>,
    rotation: DMatrix<f64>,
    rng: StdRng,
}

impl LocalInformedSampler {
    /// Sampler between two foci with a cost upper bound.
    ///
    /// An infinite bound degrades the ellipsoid draw to a uniform draw over
    /// the foci's axis-aligned bounding box intersected with `[lb, ub]`.
    pub fn new(
        focus_a: DVector<f64>,
        focus_b: DVector<f64>,
        lb: DVector<f64>,
        ub: DVector<f64>,
        cost_bound: f64,
    ) -> Self {
        let rotation = rotation_to_axis(&focus_a, &focus_b);
        Self {
            focus_a,
            focus_b,
            lb,
            ub,
            cost_bound,
            balls: Vec::new(),
            rotation,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic variant for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Add a ball to the bank. Balls are kept in insertion order; selection
    /// among them is uniform.
    pub fn add_ball(&mut self, center: DVector<f64>, radius: f64) {
        debug_assert!(radius > 0.0);
        self.balls.push((center, radius));
    }

    /// Number of balls in the bank.
    pub fn num_balls(&self) -> usize {
        self.balls.len()
    }

    /// Draw one configuration. Never fails for finite bounds.
    pub fn sample(&mut self) -> DVector<f64> {
        if !self.balls.is_empty() && self.rng.gen_bool(0.5) {
            self.sample_ball()
        } else {
            self.sample_ellipsoid()
        }
    }

    fn sample_ball(&mut self) -> DVector<f64> {
        let index = self.rng.gen_range(0..self.balls.len());
        let (center, radius) = self.balls[index].clone();

        for _ in 0..MAX_REJECTIONS {
            let q = &center + self.unit_ball_point(center.len()) * radius;
            if self.in_bounds(&q) {
                return q;
            }
        }
        let q = &center + self.unit_ball_point(center.len()) * radius;
        self.clamp(q)
    }

    fn sample_ellipsoid(&mut self) -> DVector<f64> {
        if self.cost_bound.is_infinite() {
            return self.sample_foci_box();
        }

        let n = self.focus_a.len();
        let c_min = (&self.focus_b - &self.focus_a).norm();
        let cost = self.cost_bound.max(c_min);
        let center = (&self.focus_a + &self.focus_b) * 0.5;

        let r_transverse = cost / 2.0;
        let r_conjugate = ((cost * cost - c_min * c_min).max(0.0)).sqrt() / 2.0;

        for attempt in 0..=MAX_REJECTIONS {
            let mut x = self.unit_ball_point(n);
            x[0] *= r_transverse;
            for i in 1..n {
                x[i] *= r_conjugate;
            }
            let q = &center + &self.rotation * x;
            if self.in_bounds(&q) {
                return q;
            }
            if attempt == MAX_REJECTIONS {
                return self.clamp(q);
            }
        }
        unreachable!("rejection loop always returns");
    }

    fn sample_foci_box(&mut self) -> DVector<f64> {
        let n = self.focus_a.len();
        DVector::from_fn(n, |i, _| {
            let lo = self.focus_a[i].min(self.focus_b[i]).max(self.lb[i]);
            let hi = self.focus_a[i].max(self.focus_b[i]).min(self.ub[i]);
            if hi > lo {
                self.rng.gen_range(lo..hi)
            } else {
                lo
            }
        })
    }

    /// Uniform point in the unit n-ball (Gaussian direction, radius `u^(1/n)`).
    fn unit_ball_point(&mut self, n: usize) -> DVector<f64> {
        let mut v = DVector::from_fn(n, |_, _| self.standard_normal());
        let norm = v.norm();
        if norm > 0.0 {
            v /= norm;
        }
        let u: f64 = self.rng.gen::<f64>();
        v * u.powf(1.0 / n as f64)
    }

    fn standard_normal(&mut self) -> f64 {
        // Box-Muller from two open uniforms.
        let u1: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        let u2: f64 = self.rng.gen::<f64>();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    fn in_bounds(&self, q: &DVector<f64>) -> bool {
        q.iter()
            .zip(self.lb.iter().zip(self.ub.iter()))
            .all(|(v, (lo, hi))| v >= lo && v <= hi)
    }

    fn clamp(&self, mut q: DVector<f64>) -> DVector<f64> {
        for i in 0..q.len() {
            q[i] = q[i].clamp(self.lb[i], self.ub[i]);
        }
        q
    }
}

/// Orthonormal basis whose first column points from `a` to `b`.
fn rotation_to_axis(a: &DVector<f64>, b: &DVector<f64>) -> DMatrix<f64> {
    let n = a.len();
    let mut basis = DMatrix::identity(n, n);
    let axis = b - a;
    let norm = axis.norm();
    if norm < 1e-12 {
        return basis;
    }

    // Gram-Schmidt starting from the transverse axis.
    let mut columns: Vec<DVector<f64>> = vec![axis / norm];
    for i in 0..n {
        if columns.len() == n {
            break;
        }
        let mut candidate = DVector::zeros(n);
        candidate[i] = 1.0;
        for col in &columns {
            let proj = col.dot(&candidate);
            candidate -= col * proj;
        }
        let candidate_norm = candidate.norm();
        if candidate_norm > 1e-9 {
            columns.push(candidate / candidate_norm);
        }
    }
    for (i, col) in columns.iter().enumerate() {
        basis.set_column(i, col);
    }
    basis
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn make_sampler(cost_bound: f64) -> LocalInformedSampler {
        LocalInformedSampler::new(
            dvector![0.0, 0.0],
            dvector![2.0, 0.0],
            dvector![-5.0, -5.0],
            dvector![5.0, 5.0],
            cost_bound,
        )
        .with_seed(7)
    }

    #[test]
    fn samples_stay_within_bounds() {
        let mut sampler = make_sampler(f64::INFINITY);
        sampler.add_ball(dvector![0.0, 0.0], 10.0);
        for _ in 0..500 {
            let q = sampler.sample();
            assert!(q[0] >= -5.0 && q[0] <= 5.0);
            assert!(q[1] >= -5.0 && q[1] <= 5.0);
        }
    }

    #[test]
    fn infinite_bound_samples_foci_box() {
        let mut sampler = make_sampler(f64::INFINITY);
        for _ in 0..200 {
            let q = sampler.sample();
            assert!(q[0] >= 0.0 && q[0] <= 2.0);
            assert!((q[1] - 0.0).abs() < 1e-12, "degenerate axis collapses");
        }
    }

    #[test]
    fn finite_bound_samples_inside_ellipsoid() {
        let mut sampler = make_sampler(3.0);
        for _ in 0..500 {
            let q = sampler.sample();
            let d = (&q - dvector![0.0, 0.0]).norm() + (&q - dvector![2.0, 0.0]).norm();
            assert!(d <= 3.0 + 1e-9, "sum of focal distances {d} exceeds bound");
        }
    }

    #[test]
    fn ball_draws_land_in_some_ball() {
        let mut sampler = make_sampler(f64::INFINITY);
        sampler.add_ball(dvector![4.0, 4.0], 0.5);

        let mut in_ball = 0;
        let total = 1000;
        for _ in 0..total {
            let q = sampler.sample();
            if (&q - dvector![4.0, 4.0]).norm() <= 0.5 + 1e-9 {
                in_ball += 1;
            }
        }
        // Half of the draws should come from the ball bank.
        assert!(in_ball > total / 4, "only {in_ball}/{total} ball draws");
        assert!(in_ball < 3 * total / 4);
    }

    #[test]
    fn balls_can_be_added_after_construction() {
        let mut sampler = make_sampler(f64::INFINITY);
        assert_eq!(sampler.num_balls(), 0);
        sampler.add_ball(dvector![1.0, 0.0], 0.3);
        sampler.add_ball(dvector![1.5, 0.0], 0.3);
        assert_eq!(sampler.num_balls(), 2);
        sampler.sample();
    }

    #[test]
    fn rotation_first_axis_is_the_focal_axis() {
        let rotation = rotation_to_axis(&dvector![0.0, 0.0], &dvector![0.0, 3.0]);
        let first = rotation.column(0);
        assert!((first[0] - 0.0).abs() < 1e-12);
        assert!((first[1] - 1.0).abs() < 1e-12);
    }
}
