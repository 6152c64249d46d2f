//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Replanning strategy selector.
///
/// The set of strategies is closed. `Mprrt`, `Drrt` and `AnytimeDrrt` are
/// accepted for compatibility with existing parameter files and resolve to
/// the DRRT★ repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplannerType {
    /// Multiple parallel RRT repair (alias, resolves to DRRT★).
    #[serde(rename = "MPRRT")]
    Mprrt,
    /// Dynamic RRT repair (alias, resolves to DRRT★).
    #[serde(rename = "DRRT")]
    Drrt,
    /// Local informed RRT★ repair behind the obstruction.
    #[serde(rename = "DRRT*")]
    DrrtStar,
    /// Anytime dynamic RRT repair (alias, resolves to DRRT★).
    #[serde(rename = "anytimeDRRT")]
    AnytimeDrrt,
    /// Multi-path anytime repair over a bank of alternate paths.
    #[serde(rename = "MARS")]
    Mars,
    /// MARS with the SSM-weighted edge metric.
    #[serde(rename = "MARSHA")]
    Marsha,
}

impl ReplannerType {
    /// Whether this strategy consumes the alternate-path bank.
    pub fn uses_other_paths(&self) -> bool {
        matches!(self, ReplannerType::Mars | ReplannerType::Marsha)
    }
}

/// Parameters for the MARS family of replanners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarsParams {
    /// Size of the alternate-path bank.
    pub n_other_paths: usize,
    /// Search every alternate path exhaustively instead of stopping at the
    /// first admissible bridge. Forced off under MARSHA.
    pub full_net_search: bool,
}

impl Default for MarsParams {
    fn default() -> Self {
        Self {
            n_other_paths: 1,
            full_net_search: true,
        }
    }
}

/// Parameters for the speed-and-separation (SSM) metric used by MARSHA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarshaParams {
    /// Obstacle identifiers that do not contribute to the SSM term.
    /// They still participate in collision checking.
    #[serde(default)]
    pub unaware_obstacles: Vec<String>,
    /// Names of the points of interest on the kinematic chain.
    #[serde(default)]
    pub poi_names: Vec<String>,
    /// Root frame of the kinematic chain.
    pub base_frame: String,
    /// Tip frame of the kinematic chain.
    pub tool_frame: String,
    /// Sampling step along an edge when integrating the SSM factor.
    pub ssm_max_step_size: f64,
    /// Worker threads for the SSM evaluation (1 = sequential).
    pub ssm_threads: usize,
    /// Maximum Cartesian deceleration of the robot [m/s^2].
    pub max_cart_acc: f64,
    /// Robot reaction time [s].
    #[serde(rename = "Tr")]
    pub reaction_time: f64,
    /// Protective minimum separation distance [m].
    pub min_distance: f64,
    /// Assumed human approach velocity [m/s].
    pub v_h: f64,
}

impl Default for MarshaParams {
    fn default() -> Self {
        Self {
            unaware_obstacles: Vec::new(),
            poi_names: Vec::new(),
            base_frame: "base_link".to_string(),
            tool_frame: "tool0".to_string(),
            ssm_max_step_size: 0.05,
            ssm_threads: 1,
            max_cart_acc: 2.0,
            reaction_time: 0.15,
            min_distance: 0.2,
            v_h: 1.6,
        }
    }
}

/// Configuration for the replanner manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Replanning strategy.
    pub replanner_type: ReplannerType,
    /// Trajectory tick period [s].
    pub dt: f64,
    /// Replanner period [s]; the replanning deadline is `0.9 * dt_replan`.
    pub dt_replan: f64,
    /// Collision-check thread frequency [Hz].
    pub collision_checker_thread_frequency: f64,
    /// L2 distance to the goal at which execution terminates.
    pub goal_tol: f64,
    /// RRT step limit.
    pub max_distance: f64,
    /// Joint-space speed bound used by the trajectory tick [rad/s].
    pub max_joint_speed: f64,
    /// MARS parameters.
    #[serde(default)]
    pub mars: MarsParams,
    /// MARSHA parameters, required when `replanner_type` is `Marsha`.
    #[serde(default)]
    pub marsha: MarshaParams,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            replanner_type: ReplannerType::DrrtStar,
            dt: 0.01,
            dt_replan: 0.5,
            collision_checker_thread_frequency: 30.0,
            goal_tol: 1e-3,
            max_distance: 0.4,
            max_joint_speed: 3.0,
            mars: MarsParams::default(),
            marsha: MarshaParams::default(),
        }
    }
}

impl ManagerConfig {
    /// Time budget handed to the replanner on each wake-up.
    pub fn replan_budget(&self) -> f64 {
        0.9 * self.dt_replan
    }

    /// Load from a JSON file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parameter ranges the threads rely on.
    pub fn validate(&self) -> crate::Result<()> {
        if self.dt <= 0.0 || self.dt_replan <= 0.0 {
            return Err(crate::RerouteError::ConfigError(
                "dt and dt_replan must be positive".to_string(),
            ));
        }
        if self.collision_checker_thread_frequency <= 0.0 {
            return Err(crate::RerouteError::ConfigError(
                "collision_checker_thread_frequency must be positive".to_string(),
            ));
        }
        if self.max_distance <= 0.0 {
            return Err(crate::RerouteError::ConfigError(
                "max_distance must be positive".to_string(),
            ));
        }
        if self.max_joint_speed <= 0.0 {
            return Err(crate::RerouteError::ConfigError(
                "max_joint_speed must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.replan_budget() - 0.45).abs() < 1e-12);
    }

    #[test]
    fn replanner_type_round_trips_original_names() {
        for (name, ty) in [
            ("\"MPRRT\"", ReplannerType::Mprrt),
            ("\"DRRT\"", ReplannerType::Drrt),
            ("\"DRRT*\"", ReplannerType::DrrtStar),
            ("\"anytimeDRRT\"", ReplannerType::AnytimeDrrt),
            ("\"MARS\"", ReplannerType::Mars),
            ("\"MARSHA\"", ReplannerType::Marsha),
        ] {
            let parsed: ReplannerType = serde_json::from_str(name).unwrap();
            assert_eq!(parsed, ty);
            assert_eq!(serde_json::to_string(&ty).unwrap(), name);
        }
    }

    #[test]
    fn only_mars_family_uses_other_paths() {
        assert!(ReplannerType::Mars.uses_other_paths());
        assert!(ReplannerType::Marsha.uses_other_paths());
        assert!(!ReplannerType::DrrtStar.uses_other_paths());
        assert!(!ReplannerType::Drrt.uses_other_paths());
    }

    #[test]
    fn invalid_periods_rejected() {
        let mut config = ManagerConfig::default();
        config.dt = 0.0;
        assert!(config.validate().is_err());

        let mut config = ManagerConfig::default();
        config.collision_checker_thread_frequency = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn marsha_params_parse_original_keys() {
        let json = r#"{
            "unaware_obstacles": ["shelf"],
            "poi_names": ["link_5", "tool0"],
            "base_frame": "base_link",
            "tool_frame": "tool0",
            "ssm_max_step_size": 0.1,
            "ssm_threads": 4,
            "max_cart_acc": 1.5,
            "Tr": 0.2,
            "min_distance": 0.3,
            "v_h": 1.0
        }"#;
        let params: MarshaParams = serde_json::from_str(json).unwrap();
        assert_eq!(params.unaware_obstacles, vec!["shelf".to_string()]);
        assert_eq!(params.ssm_threads, 4);
        assert!((params.reaction_time - 0.2).abs() < 1e-12);
    }
}
