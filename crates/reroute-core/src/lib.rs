//! # Reroute Core
//!
//! Core engine for online motion replanning: keep an articulated robot
//! moving along a precomputed joint-space path while the environment
//! changes, repairing the path in bounded time instead of stopping.
//!
//! This crate provides the fundamental building blocks:
//! - **Arena search tree** of configurations with reroot, radius queries
//!   and time-free editing primitives (extend, rewire, subtree views)
//! - **Paths** as ordered edge sequences that deep-clone with their tree,
//!   so replanning never races execution
//! - **Local informed sampler** biased to the obstructed region
//! - **Replanners**: DRRT★ rewire-behind-the-obstacle repair, and the
//!   MARS / MARSHA multi-path stitch repair
//! - **Replanner manager**: trajectory tick, parallel collision-check
//!   fanout and bounded-time replanning across four OS threads, joined by
//!   an atomic path hot-swap
//! - **SSM metric**: ISO/TS-15066 speed-and-separation weighting for
//!   human-aware repair (MARSHA)
//!
//! ## Core loop
//!
//! ```rust,ignore
//! use reroute_core::prelude::*;
//!
//! let replanner = Replanner::from_config(&config, checker.clone_checker(),
//!     metric.clone_metric(), lb, ub, None)?;
//! let manager = ReplannerManager::new(
//!     config, path, other_paths, scene_service, checker, metric, replanner)?;
//!
//! let references = manager.references();   // joint setpoints, one per tick
//! let stop = manager.stop_handle();
//! manager.run()?;                          // blocks until goal / stop / fault
//! ```
//!
//! ## Module Overview
//!
//! - [`tree`] - search tree, edges, paths
//! - [`sampler`] - local informed sampling
//! - [`replan`] - pluggable repair strategies
//! - [`manager`] - threads, locks and the hot-swap
//! - [`metrics`] - edge cost, including the SSM-weighted metric
//! - [`scene`] - scene snapshots and the collision-checking seam
//! - [`config`] - parameter structs
//! - [`error`] - error types and Result alias

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod replan;
pub mod sampler;
pub mod scene;
pub mod tree;

pub use error::{RerouteError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{ManagerConfig, MarsParams, MarshaParams, ReplannerType};
    pub use crate::error::{RerouteError, Result};
    pub use crate::manager::{ReplannerManager, StopHandle};
    pub use crate::metrics::{EuclideanMetric, LengthPenaltyMetric, Metric, Ssm15066};
    pub use crate::replan::{rrt_plan, ReplanOutcome, Replanner};
    pub use crate::sampler::LocalInformedSampler;
    pub use crate::scene::{
        CollisionChecker, Obstacle, SceneChecker, SceneService, SceneSnapshot,
    };
    pub use crate::tree::{Edge, EdgeId, Node, NodeId, Path, Tree};
}
