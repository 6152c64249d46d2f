//! Crash test for the replanner manager.
//!
//! Runs a batch of queries against a synthetic 2-DoF scene: plan a path,
//! start the manager, drop an obstacle onto the executing path mid-run and
//! check that the robot still arrives. The replanner is picked by name the
//! way the original parameter files do ("DRRT*", "MARS", "MARSHA", ...).

use anyhow::Result;
use nalgebra::dvector;
use reroute::prelude::*;
use std::thread;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let replanner_type = std::env::args().nth(1).unwrap_or_else(|| "DRRT*".to_string());
    let replanner_type: ReplannerType =
        serde_json::from_str(&format!("\"{replanner_type}\"")).expect("unknown replanner type");

    let n_query = 3;
    let config = ManagerConfig {
        replanner_type,
        dt: 0.005,
        dt_replan: 0.2,
        collision_checker_thread_frequency: 50.0,
        goal_tol: 0.05,
        max_distance: 0.4,
        max_joint_speed: 3.0,
        mars: MarsParams {
            n_other_paths: 1,
            ..MarsParams::default()
        },
        marsha: MarshaParams {
            poi_names: vec!["tool".to_string()],
            unaware_obstacles: vec!["shelf".to_string()],
            ..MarshaParams::default()
        },
    };

    let mut start_conf = dvector![0.0, 0.0];
    let mut goal_conf = dvector![2.0, 0.0];
    let delta = (&goal_conf - &start_conf) / (n_query as f64).max(1.0);

    for query in 0..n_query {
        let distance = (&goal_conf - &start_conf).norm();
        println!("query {query}: start {start_conf:?} goal {goal_conf:?} distance {distance:.3}");

        let engine = Engine::builder()
            .config(config.clone())
            .bounds(dvector![-5.0, -5.0], dvector![5.0, 5.0])
            .start(start_conf.clone())
            .goal(goal_conf.clone())
            .plan_seed(query as u64 + 1)
            .build()?;

        let scene = engine.scene_handle();
        let references = engine.references();
        let stop = engine.stop_handle();
        let goal = goal_conf.clone();

        let runner = thread::spawn(move || engine.run());

        // Let the robot get going, then obstruct the second half of the path.
        thread::sleep(Duration::from_millis(100));
        let blocker = (&start_conf + &goal) * 0.7;
        scene.add_obstacle(Obstacle::new("intruder", blocker, 0.1));
        println!("  obstacle dropped on the path");

        let deadline = Instant::now() + Duration::from_secs(30);
        while !stop.is_stopped() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        stop.stop();
        runner.join().expect("engine thread panicked")?;

        let mut last = start_conf.clone();
        let mut ticks = 0usize;
        while let Ok(reference) = references.try_recv() {
            last = reference;
            ticks += 1;
        }
        let remaining = (&last - &goal).norm();
        println!("  {ticks} ticks, final reference {last:?}, distance to goal {remaining:.4}");
        if remaining > 0.1 {
            println!("  FAILED to reach the goal");
        }

        start_conf += &delta * 0.1;
        goal_conf -= &delta * 0.1;
    }

    Ok(())
}
