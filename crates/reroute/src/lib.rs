//! # Reroute
//!
//! Online motion replanning for articulated robots: execute a joint-space
//! path while the scene changes, and repair it in bounded time instead of
//! stopping the robot.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use reroute::prelude::*;
//! use nalgebra::dvector;
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = Engine::builder()
//!         .bounds(dvector![-5.0, -5.0], dvector![5.0, 5.0])
//!         .start(dvector![0.0, 0.0])
//!         .goal(dvector![2.0, 0.0])
//!         .build()?;
//!
//!     let scene = engine.scene_handle();     // move obstacles mid-run
//!     let references = engine.references();  // joint setpoints per tick
//!     engine.run()?;                         // blocks until goal or stop
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use reroute_core::*;

mod engine;

pub use engine::{Engine, EngineBuilder};

/// Commonly used types.
pub mod prelude {
    pub use crate::engine::{Engine, EngineBuilder};
    pub use reroute_core::{
        config::{ManagerConfig, MarsParams, MarshaParams, ReplannerType},
        error::{RerouteError, Result},
        manager::{ReplannerManager, StopHandle},
        metrics::{EuclideanMetric, LengthPenaltyMetric, Metric},
        replan::{rrt_plan, Replanner},
        scene::{Obstacle, SceneChecker, SceneHandle, SceneSnapshot},
        tree::{Path, Tree},
    };

    // Re-export useful external types
    pub use anyhow;
    pub use tracing;
}
