//! The replanner manager.
//!
//! Orchestrates trajectory execution, asynchronous collision checking and
//! bounded-time replanning over shared state, and hot-swaps repaired paths
//! into the executing trajectory.
//!
//! # Threads
//!
//! - **trajectory**: publishes a joint reference at period `dt` and advances
//!   the interpolation cursor, holding at obstructions.
//! - **collision-check**: samples the scene at `f_cc`, revalidates clones of
//!   the current and alternate paths in a parallel fanout, writes the edge
//!   costs back and signals `path_obstructed`.
//! - **replanner**: wakes on the obstruction signal (or every `dt_replan`),
//!   snapshots state, runs the pluggable strategy against clones for at most
//!   `0.9 * dt_replan`, and performs the hot-swap on success.
//! - the caller of [`ReplannerManager::run`] acts as the supervisor: it
//!   joins the three workers and owns shutdown.
//!
//! # Locks
//!
//! Four mutexes guard the shared state and are always acquired in the fixed
//! order `scene -> trj -> paths -> other_paths` (and released in reverse),
//! so no cycle can form. Replanning itself runs with no locks held; it only
//! sees clones taken under `paths`.

mod trajectory;

pub use trajectory::Cursor;

use crate::config::ManagerConfig;
use crate::error::{RerouteError, Result};
use crate::metrics::Metric;
use crate::replan::Replanner;
use crate::scene::{CollisionChecker, SceneService, SceneSnapshot};
use crate::tree::Path;
use crossbeam_channel::{unbounded, Receiver, Sender};
use nalgebra::{DVector, Matrix3xX};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Scene snapshot plus the obstacle-position matrix derived from it.
#[derive(Debug)]
struct SceneState {
    snapshot: SceneSnapshot,
    obstacle_positions: Matrix3xX<f64>,
}

impl Default for SceneState {
    fn default() -> Self {
        Self {
            snapshot: SceneSnapshot::default(),
            obstacle_positions: Matrix3xX::zeros(0),
        }
    }
}

/// Current configuration and interpolation cursor (guarded by `trj`).
#[derive(Debug)]
struct TrajectoryShared {
    cursor: Cursor,
    current_configuration: DVector<f64>,
    /// Whether the last tick left the reference in place (obstruction
    /// boundary or path end).
    holding: bool,
}

/// Executing path and its resync flag (guarded by `paths`).
#[derive(Debug)]
struct PathsShared {
    executing: Path,
    sync_needed: bool,
}

/// Alternate-path bank and per-path resync flags (guarded by `other_paths`).
#[derive(Debug)]
struct OtherPathsShared {
    bank: Vec<Path>,
    sync_needed: Vec<bool>,
}

/// State shared between the manager threads. Field order mirrors the lock
/// acquisition order.
struct Shared {
    stop: AtomicBool,
    scene: Mutex<SceneState>,
    trj: Mutex<TrajectoryShared>,
    paths: Mutex<PathsShared>,
    other_paths: Mutex<OtherPathsShared>,
    obstructed: Mutex<bool>,
    obstructed_signal: Condvar,
}

impl Shared {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        // Wake the replanner out of its condvar wait.
        self.obstructed_signal.notify_all();
    }
}

/// Handle for requesting a clean shutdown from outside.
#[derive(Clone)]
pub struct StopHandle {
    shared: Arc<Shared>,
}

impl StopHandle {
    /// Set the stop flag; every thread exits at its next loop head or
    /// suspension point.
    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Whether shutdown has been requested.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped()
    }
}

/// The multi-threaded replanning orchestrator.
pub struct ReplannerManager {
    config: ManagerConfig,
    shared: Arc<Shared>,
    scene_service: Box<dyn SceneService>,
    checker: Box<dyn CollisionChecker>,
    metric: Box<dyn Metric>,
    replanner: Replanner,
    goal: DVector<f64>,
    reference_tx: Sender<DVector<f64>>,
    reference_rx: Receiver<DVector<f64>>,
}

impl ReplannerManager {
    /// Build a manager around an initial path.
    ///
    /// `other_paths` seeds the alternate-path bank (used by the MARS family,
    /// still collision-checked for the others).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ManagerConfig,
        executing: Path,
        other_paths: Vec<Path>,
        scene_service: Box<dyn SceneService>,
        checker: Box<dyn CollisionChecker>,
        metric: Box<dyn Metric>,
        replanner: Replanner,
    ) -> Result<Self> {
        config.validate()?;
        let goal = executing.goal_configuration().clone();
        let start = executing.waypoints()[0].clone();
        let sync_needed = vec![false; other_paths.len()];
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            scene: Mutex::new(SceneState::default()),
            trj: Mutex::new(TrajectoryShared {
                cursor: Cursor::new(),
                current_configuration: start,
                holding: false,
            }),
            paths: Mutex::new(PathsShared {
                executing,
                sync_needed: false,
            }),
            other_paths: Mutex::new(OtherPathsShared {
                bank: other_paths,
                sync_needed,
            }),
            obstructed: Mutex::new(false),
            obstructed_signal: Condvar::new(),
        });
        let (reference_tx, reference_rx) = unbounded();
        Ok(Self {
            config,
            shared,
            scene_service,
            checker,
            metric,
            replanner,
            goal,
            reference_tx,
            reference_rx,
        })
    }

    /// Stream of published joint references.
    pub fn references(&self) -> Receiver<DVector<f64>> {
        self.reference_rx.clone()
    }

    /// Shutdown handle.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            shared: self.shared.clone(),
        }
    }

    /// Run the engine until the goal is reached, a scene fault occurs or
    /// [`StopHandle::stop`] is called. Blocks; the calling thread supervises
    /// and joins the three workers.
    pub fn run(self) -> Result<()> {
        let Self {
            config,
            shared,
            scene_service,
            checker,
            metric,
            replanner,
            goal,
            reference_tx,
            reference_rx,
        } = self;
        drop(reference_rx);

        let trajectory = {
            let shared = shared.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("trajectory".to_string())
                .spawn(move || trajectory_thread(shared, config, reference_tx))?
        };
        let collision = {
            let shared = shared.clone();
            let config = config.clone();
            let goal = goal.clone();
            thread::Builder::new()
                .name("collision-check".to_string())
                .spawn(move || {
                    collision_check_thread(shared, config, goal, scene_service, checker, metric)
                })?
        };
        let replanning = {
            let shared = shared.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("replanner".to_string())
                .spawn(move || replanner_thread(shared, config, replanner))?
        };

        for (name, handle) in [
            ("trajectory", trajectory),
            ("collision-check", collision),
            ("replanner", replanning),
        ] {
            if handle.join().is_err() {
                error!("{name} thread panicked");
                shared.request_stop();
            }
        }
        info!("replanner manager is down");
        Ok(())
    }
}

/// Periodic joint-reference publisher.
fn trajectory_thread(
    shared: Arc<Shared>,
    config: ManagerConfig,
    reference_tx: Sender<DVector<f64>>,
) {
    let period = Duration::from_secs_f64(config.dt);
    let step = config.max_joint_speed * config.dt;

    while !shared.stopped() {
        let tick = Instant::now();
        let reference = {
            let mut trj = shared.trj.lock();
            let paths = shared.paths.lock();
            let reference = trj.cursor.position(&paths.executing);
            trj.current_configuration = reference.clone();
            trj.cursor.advance(&paths.executing, step);
            trj.holding = (trj.cursor.position(&paths.executing) - &reference).norm() < 1e-15;
            reference
        };
        let _ = reference_tx.send(reference);
        let elapsed = tick.elapsed();
        if elapsed < period {
            thread::sleep(period - elapsed);
        }
    }

    // One final hold reference so downstream consumers latch a fixed setpoint.
    let hold = shared.trj.lock().current_configuration.clone();
    let _ = reference_tx.send(hold);
    debug!("trajectory thread is over");
}

/// Periodic scene sampling, parallel path revalidation and cost write-back.
fn collision_check_thread(
    shared: Arc<Shared>,
    config: ManagerConfig,
    goal: DVector<f64>,
    mut scene_service: Box<dyn SceneService>,
    mut checker: Box<dyn CollisionChecker>,
    mut metric: Box<dyn Metric>,
) {
    let period = Duration::from_secs_f64(1.0 / config.collision_checker_thread_frequency);
    let unaware = config.marsha.unaware_obstacles.clone();

    let mut current_copy = shared.paths.lock().executing.clone();
    let mut others_copy: Vec<Path> = shared.other_paths.lock().bank.clone();
    let mut checkers: Vec<Box<dyn CollisionChecker>> = others_copy
        .iter()
        .map(|_| checker.clone_checker())
        .collect();
    let mut metrics: Vec<Box<dyn Metric>> = others_copy
        .iter()
        .map(|_| metric.clone_metric())
        .collect();

    while !shared.stopped() {
        let tic = Instant::now();

        let scene = match scene_service.sample_scene() {
            Ok(scene) => scene,
            Err(e) => {
                error!("scene service fault, stopping: {e}");
                shared.request_stop();
                break;
            }
        };
        let positions = scene.aware_positions(&unaware);
        {
            let mut sc = shared.scene.lock();
            sc.snapshot = scene.clone();
            sc.obstacle_positions = positions.clone();
        }
        checker.set_scene(&scene);
        metric.set_obstacle_positions(&positions);
        for c in checkers.iter_mut() {
            c.set_scene(&scene);
        }
        for m in metrics.iter_mut() {
            m.set_obstacle_positions(&positions);
        }

        // Resync local copies with the shared paths.
        let current_configuration = {
            let trj = shared.trj.lock();
            let mut paths = shared.paths.lock();
            let conf = trj.current_configuration.clone();
            if paths.sync_needed {
                current_copy = paths.executing.clone();
                paths.sync_needed = false;
            }
            let mut others = shared.other_paths.lock();
            while others_copy.len() < others.bank.len() {
                let i = others_copy.len();
                others_copy.push(others.bank[i].clone());
                checkers.push(checker.clone_checker());
                metrics.push(metric.clone_metric());
                others.sync_needed[i] = false;
            }
            for i in 0..others.bank.len() {
                if others.sync_needed[i] {
                    others_copy[i] = others.bank[i].clone();
                    others.sync_needed[i] = false;
                }
            }
            conf
        };

        if (&current_configuration - &goal).norm() < config.goal_tol {
            info!("goal reached");
            shared.request_stop();
            break;
        }

        // Fan out one task per alternate path; the current path is checked
        // on this thread. All tasks complete before costs are written back.
        rayon::scope(|scope| {
            for ((path, task_checker), task_metric) in others_copy
                .iter_mut()
                .zip(checkers.iter_mut())
                .zip(metrics.iter_mut())
            {
                scope.spawn(move |_| {
                    path.revalidate_from(None, task_checker.as_ref(), task_metric.as_ref());
                });
            }
            current_copy.revalidate_from(
                Some(&current_configuration),
                checker.as_ref(),
                metric.as_ref(),
            );
        });

        // Write the refreshed costs back, skipping anything hot-swapped in
        // the meantime.
        {
            let mut paths = shared.paths.lock();
            if !paths.sync_needed {
                paths.executing.copy_edge_costs_from(&current_copy);
            }
            let mut others = shared.other_paths.lock();
            for i in 0..others.bank.len().min(others_copy.len()) {
                if !others.sync_needed[i] {
                    others.bank[i].copy_edge_costs_from(&others_copy[i]);
                }
            }
        }

        if current_copy.cost_from(&current_configuration).is_infinite() {
            let mut flag = shared.obstructed.lock();
            *flag = true;
            shared.obstructed_signal.notify_one();
        }

        let duration = tic.elapsed();
        if duration > period {
            warn!("collision check cycle overran its period: {duration:?}");
        } else {
            thread::sleep(period - duration);
        }
    }
    debug!("collision check thread is over");
}

/// Event-driven replanning plus hot-swap.
fn replanner_thread(shared: Arc<Shared>, config: ManagerConfig, mut replanner: Replanner) {
    let budget = Duration::from_secs_f64(config.replan_budget());
    let wait_timeout = Duration::from_secs_f64(config.dt_replan);
    let uses_other_paths = config.replanner_type.uses_other_paths();

    while !shared.stopped() {
        {
            let mut flag = shared.obstructed.lock();
            if !*flag {
                let _ = shared.obstructed_signal.wait_for(&mut flag, wait_timeout);
            }
            *flag = false;
        }
        if shared.stopped() {
            break;
        }

        // Quick check whether the remaining path really is obstructed.
        let obstructed = {
            let trj = shared.trj.lock();
            let paths = shared.paths.lock();
            paths
                .executing
                .cost_from(&trj.current_configuration)
                .is_infinite()
        };
        if !obstructed {
            continue;
        }

        // Let the reference settle at the obstruction boundary. The robot
        // cannot cross an obstructed edge, so it holds there; replanning
        // from the held configuration makes the hot-swap preserve the
        // current configuration exactly.
        if !wait_for_hold(&shared, &config) {
            break;
        }

        // Snapshot everything the strategy needs, in lock order, then work
        // lock-free on the clones.
        let (scene, positions, conf, path_clone, others_clone) = {
            let sc = shared.scene.lock();
            let scene = sc.snapshot.clone();
            let positions = sc.obstacle_positions.clone();
            let trj = shared.trj.lock();
            let paths = shared.paths.lock();
            let conf = trj.current_configuration.clone();
            let path_clone = paths.executing.clone();
            let others_clone = if uses_other_paths {
                shared.other_paths.lock().bank.clone()
            } else {
                Vec::new()
            };
            (scene, positions, conf, path_clone, others_clone)
        };

        if path_clone.cost_from(&conf).is_finite() {
            // The scene changed while the reference settled.
            continue;
        }

        replanner.set_scene(&scene);
        replanner.set_obstacle_positions(&positions);
        replanner.set_other_paths(others_clone);

        debug!("replanning from {conf:?}");
        let outcome = replanner.replan(&conf, &path_clone, budget);
        if !outcome.success {
            debug!("replanning failed, keeping the executing path");
            continue;
        }

        let mut new_path = outcome.path;
        if let Err(e) = start_replanned_path_from_new_current_conf(&mut new_path, &conf) {
            warn!("hot-swap rejected: {e}");
            continue;
        }

        {
            let mut trj = shared.trj.lock();
            let mut paths = shared.paths.lock();
            let mut others = shared.other_paths.lock();
            if uses_other_paths {
                // The displaced executing path becomes a new alternate.
                others.bank.push(paths.executing.clone());
                others.sync_needed.push(true);
            }
            paths.executing = new_path;
            paths.sync_needed = true;
            trj.cursor.reset();
            trj.current_configuration = conf.clone();
        }
        info!("replanned path hot-swapped in");
    }
    debug!("replanner thread is over");
}

/// Block until the trajectory tick reports a stationary reference.
/// Returns `false` when shutdown was requested instead.
fn wait_for_hold(shared: &Shared, config: &ManagerConfig) -> bool {
    let poll = Duration::from_secs_f64(config.dt).max(Duration::from_millis(1));
    loop {
        if shared.stopped() {
            return false;
        }
        if shared.trj.lock().holding {
            return true;
        }
        thread::sleep(poll);
    }
}

/// Rebase a replanned path so it starts exactly at `conf`: locate the edge
/// containing it, split, reroot there and rebuild the edge sequence down to
/// the goal.
fn start_replanned_path_from_new_current_conf(
    path: &mut Path,
    conf: &DVector<f64>,
) -> Result<()> {
    path.start_from(conf).map(|_| ()).map_err(|e| match e {
        RerouteError::MalformedPath(m) => RerouteError::Precondition(m),
        other => other,
    })
}
