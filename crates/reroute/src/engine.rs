//! High-level replanning engine.

use anyhow::{Context, Result};
use nalgebra::DVector;
use reroute_core::config::{ManagerConfig, ReplannerType};
use reroute_core::manager::{ReplannerManager, StopHandle};
use reroute_core::metrics::{
    CartesianChain, Chain, EuclideanMetric, LengthPenaltyMetric, Metric, Ssm15066, SsmEstimator,
};
use reroute_core::replan::{rrt_plan, Replanner};
use reroute_core::scene::{
    CollisionChecker, SceneChecker, SceneHandle, SceneSnapshot, SharedSceneService,
};

/// Builder for creating an [`Engine`].
pub struct EngineBuilder {
    config: ManagerConfig,
    scene: SceneSnapshot,
    chain: Option<Box<dyn Chain>>,
    bounds: Option<(DVector<f64>, DVector<f64>)>,
    start: Option<DVector<f64>>,
    goal: Option<DVector<f64>>,
    plan_iterations: usize,
    plan_seed: u64,
}

impl EngineBuilder {
    /// Create a new engine builder.
    pub fn new() -> Self {
        Self {
            config: ManagerConfig::default(),
            scene: SceneSnapshot::default(),
            chain: None,
            bounds: None,
            start: None,
            goal: None,
            plan_iterations: 20_000,
            plan_seed: 1,
        }
    }

    /// Set the manager configuration.
    pub fn config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the initial scene.
    pub fn scene(mut self, scene: SceneSnapshot) -> Self {
        self.scene = scene;
        self
    }

    /// Set the kinematic chain used by the SSM metric (MARSHA only).
    pub fn chain(mut self, chain: Box<dyn Chain>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Set the joint bounds.
    pub fn bounds(mut self, lb: DVector<f64>, ub: DVector<f64>) -> Self {
        self.bounds = Some((lb, ub));
        self
    }

    /// Set the start configuration.
    pub fn start(mut self, start: DVector<f64>) -> Self {
        self.start = Some(start);
        self
    }

    /// Set the goal configuration.
    pub fn goal(mut self, goal: DVector<f64>) -> Self {
        self.goal = Some(goal);
        self
    }

    /// Iteration cap for the seed planner.
    pub fn plan_iterations(mut self, iterations: usize) -> Self {
        self.plan_iterations = iterations;
        self
    }

    /// Seed for the seed planner's sampling.
    pub fn plan_seed(mut self, seed: u64) -> Self {
        self.plan_seed = seed;
        self
    }

    /// Build the engine: plan the initial path (and the alternate bank for
    /// the MARS family), wire checker, metric and replanner, and assemble
    /// the manager.
    pub fn build(self) -> Result<Engine> {
        let (lb, ub) = self.bounds.context("joint bounds are required")?;
        let start = self.start.context("a start configuration is required")?;
        let goal = self.goal.context("a goal configuration is required")?;
        self.config.validate()?;

        let checker = SceneChecker::new(self.scene.clone());
        let chain: Box<dyn Chain> = self.chain.unwrap_or_else(|| Box::new(CartesianChain));
        let (metric, ssm): (Box<dyn Metric>, Option<Box<dyn SsmEstimator>>) =
            match self.config.replanner_type {
                ReplannerType::Marsha => {
                    let metric_estimator =
                        Ssm15066::new(chain.clone_chain(), &self.config.marsha);
                    let replanner_estimator = Ssm15066::new(chain, &self.config.marsha);
                    (
                        Box::new(LengthPenaltyMetric::new(Box::new(metric_estimator))),
                        Some(Box::new(replanner_estimator)),
                    )
                }
                _ => (Box::new(EuclideanMetric), None),
            };

        let executing = rrt_plan(
            &start,
            &goal,
            &lb,
            &ub,
            &checker,
            metric.as_ref(),
            self.config.max_distance,
            self.plan_iterations,
            self.plan_seed,
        )
        .context("planning the initial path")?;

        let mut other_paths = Vec::new();
        if self.config.replanner_type.uses_other_paths() {
            for i in 0..self.config.mars.n_other_paths {
                let alternate = rrt_plan(
                    &start,
                    &goal,
                    &lb,
                    &ub,
                    &checker,
                    metric.as_ref(),
                    self.config.max_distance,
                    self.plan_iterations,
                    self.plan_seed.wrapping_add(1 + i as u64),
                )
                .context("planning an alternate path")?;
                other_paths.push(alternate);
            }
        }

        let replanner = Replanner::from_config(
            &self.config,
            checker.clone_checker(),
            metric.clone_metric(),
            lb.clone(),
            ub.clone(),
            ssm,
        )?;

        let (scene_service, scene_handle) = SharedSceneService::new(self.scene);
        let manager = ReplannerManager::new(
            self.config,
            executing,
            other_paths,
            Box::new(scene_service),
            checker.clone_checker(),
            metric,
            replanner,
        )?;

        Ok(Engine {
            manager,
            scene_handle,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// High-level replanning engine: a configured manager plus a handle onto its
/// mutable scene.
pub struct Engine {
    manager: ReplannerManager,
    scene_handle: SceneHandle,
}

impl Engine {
    /// Create a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Handle for mutating the scene while the engine runs.
    pub fn scene_handle(&self) -> SceneHandle {
        self.scene_handle.clone()
    }

    /// Stream of published joint references.
    pub fn references(&self) -> crossbeam_channel::Receiver<DVector<f64>> {
        self.manager.references()
    }

    /// Shutdown handle.
    pub fn stop_handle(&self) -> StopHandle {
        self.manager.stop_handle()
    }

    /// Run until the goal is reached, the scene service faults or
    /// [`StopHandle::stop`] is called.
    pub fn run(self) -> Result<()> {
        self.manager.run()?;
        Ok(())
    }
}
