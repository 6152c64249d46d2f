//! Planning-scene snapshots and the collision-checking seam.
//!
//! The real geometric checker over meshes lives outside this crate. What the
//! engine needs from it is captured by [`CollisionChecker`]; the provided
//! [`SceneChecker`] validates segments against configuration-space ball
//! obstacles, which is what the synthetic test scenes use.

use crate::error::{RerouteError, Result};
use crate::tree::{CheckedEdges, Edge};
use nalgebra::{DVector, Matrix3xX, Vector3};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A ball obstacle.
///
/// `center` lives in configuration space and drives collision checking;
/// `position` is the workspace point handed to the SSM estimator.
#[derive(Debug, Clone)]
pub struct Obstacle {
    /// Scene-unique identifier.
    pub id: String,
    /// Configuration-space center.
    pub center: DVector<f64>,
    /// Ball radius.
    pub radius: f64,
    /// Workspace position, one column of the SSM obstacle matrix.
    pub position: Vector3<f64>,
}

impl Obstacle {
    /// Ball obstacle whose workspace position mirrors its first three
    /// configuration-space coordinates.
    pub fn new(id: impl Into<String>, center: DVector<f64>, radius: f64) -> Self {
        let coord = |i: usize| center.get(i).copied().unwrap_or(0.0);
        let position = Vector3::new(coord(0), coord(1), coord(2));
        Self {
            id: id.into(),
            center,
            radius,
            position,
        }
    }
}

/// Immutable view of the scene at one collision-check cycle.
#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    /// Obstacles currently in the scene.
    pub obstacles: Vec<Obstacle>,
}

impl SceneSnapshot {
    /// Scene with the given obstacles.
    pub fn new(obstacles: Vec<Obstacle>) -> Self {
        Self { obstacles }
    }

    /// Workspace positions of every obstacle the robot is aware of, one per
    /// column. Obstacles whose id appears in `unaware` are filtered out; they
    /// still participate in collision checking.
    pub fn aware_positions(&self, unaware: &[String]) -> Matrix3xX<f64> {
        let columns: Vec<Vector3<f64>> = self
            .obstacles
            .iter()
            .filter(|o| !unaware.iter().any(|u| u == &o.id))
            .map(|o| o.position)
            .collect();
        if columns.is_empty() {
            Matrix3xX::zeros(0)
        } else {
            Matrix3xX::from_columns(&columns)
        }
    }
}

/// Source of scene snapshots, typically a service call in the real system.
///
/// A failure is a transient scene fault: the manager stops all threads
/// cleanly and performs no partial publishes.
pub trait SceneService: Send {
    /// Fetch the current scene.
    fn sample_scene(&mut self) -> Result<SceneSnapshot>;
}

/// Validity oracle for configuration-space segments.
///
/// Implementations must be thread-clonable; each thread owns its clone and
/// feeds it scene updates independently.
pub trait CollisionChecker: Send + Sync {
    /// Install a new scene.
    fn set_scene(&mut self, scene: &SceneSnapshot);

    /// `true` when the straight segment from `a` to `b` is collision-free.
    fn check_segment(&self, a: &DVector<f64>, b: &DVector<f64>) -> bool;

    /// Validity of an existing tree edge with endpoints `a` and `b`, going
    /// through the per-replan verdict cache keyed by edge id. A cached
    /// verdict is reused, so one replanning call never pays twice for the
    /// same edge.
    fn check_edge(
        &self,
        edge: &Edge,
        a: &DVector<f64>,
        b: &DVector<f64>,
        checked: &mut CheckedEdges,
    ) -> bool {
        match checked.get(&edge.id()) {
            Some(&valid) => valid,
            None => {
                let valid = self.check_segment(a, b);
                checked.insert(edge.id(), valid);
                valid
            }
        }
    }

    /// Produce a thread-local clone.
    fn clone_checker(&self) -> Box<dyn CollisionChecker>;
}

/// Checker over the ball obstacles of a [`SceneSnapshot`].
///
/// Segments are sampled at `resolution`; a sample inside any ball makes the
/// segment invalid.
#[derive(Debug, Clone)]
pub struct SceneChecker {
    scene: SceneSnapshot,
    resolution: f64,
}

impl SceneChecker {
    /// Checker with the default sampling resolution.
    pub fn new(scene: SceneSnapshot) -> Self {
        Self::with_resolution(scene, 0.01)
    }

    /// Checker with an explicit sampling resolution.
    pub fn with_resolution(scene: SceneSnapshot, resolution: f64) -> Self {
        Self {
            scene,
            resolution: resolution.max(1e-6),
        }
    }

    fn point_free(&self, q: &DVector<f64>) -> bool {
        self.scene.obstacles.iter().all(|o| {
            if o.center.len() != q.len() {
                return true;
            }
            (q - &o.center).norm() > o.radius
        })
    }
}

impl CollisionChecker for SceneChecker {
    fn set_scene(&mut self, scene: &SceneSnapshot) {
        self.scene = scene.clone();
    }

    fn check_segment(&self, a: &DVector<f64>, b: &DVector<f64>) -> bool {
        let length = (b - a).norm();
        let steps = (length / self.resolution).ceil() as usize;
        for i in 0..=steps {
            let t = if steps == 0 {
                0.0
            } else {
                i as f64 / steps as f64
            };
            let q = a + (b - a) * t;
            if !self.point_free(&q) {
                return false;
            }
        }
        true
    }

    fn clone_checker(&self) -> Box<dyn CollisionChecker> {
        Box::new(self.clone())
    }
}

/// Scene service over shared mutable state.
///
/// Tests and demos hold a [`SceneHandle`] to move obstacles mid-run or to
/// inject a service fault; the collision-check thread owns the service end.
pub struct SharedSceneService {
    state: Arc<SharedSceneState>,
}

#[derive(Debug)]
struct SharedSceneState {
    scene: Mutex<SceneSnapshot>,
    faulted: AtomicBool,
}

/// Mutating handle onto a [`SharedSceneService`].
#[derive(Clone)]
pub struct SceneHandle {
    state: Arc<SharedSceneState>,
}

impl SharedSceneService {
    /// Create a service plus its mutating handle.
    pub fn new(scene: SceneSnapshot) -> (Self, SceneHandle) {
        let state = Arc::new(SharedSceneState {
            scene: Mutex::new(scene),
            faulted: AtomicBool::new(false),
        });
        (
            Self {
                state: state.clone(),
            },
            SceneHandle { state },
        )
    }
}

impl SceneService for SharedSceneService {
    fn sample_scene(&mut self) -> Result<SceneSnapshot> {
        if self.state.faulted.load(Ordering::SeqCst) {
            return Err(RerouteError::SceneFault(
                "scene service unavailable".to_string(),
            ));
        }
        Ok(self.state.scene.lock().clone())
    }
}

impl SceneHandle {
    /// Replace the whole scene.
    pub fn set_scene(&self, scene: SceneSnapshot) {
        *self.state.scene.lock() = scene;
    }

    /// Add one obstacle.
    pub fn add_obstacle(&self, obstacle: Obstacle) {
        self.state.scene.lock().obstacles.push(obstacle);
    }

    /// Move the obstacle with the given id, if present.
    pub fn move_obstacle(&self, id: &str, center: DVector<f64>) {
        let mut scene = self.state.scene.lock();
        if let Some(o) = scene.obstacles.iter_mut().find(|o| o.id == id) {
            *o = Obstacle::new(id, center, o.radius);
        }
    }

    /// Make every subsequent `sample_scene` call fail.
    pub fn inject_fault(&self) {
        self.state.faulted.store(true, Ordering::SeqCst);
    }
}
