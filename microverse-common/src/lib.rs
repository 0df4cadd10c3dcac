pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    AgentConfig, AggressorConfig, BoundaryMode, DeformationConfig, OutputConfig, PlayerConfig,
    PlayerPath, SimulationConfig, SolverConfig, TimingConfig, WorldConfig,
};
pub use sim_params::{PlayerSnapshot, SimParams};
pub use snapshot::Snapshot;
pub use vecmath::{angle_to_vec, clamp, lerp, saturate, vec_to_angle, Vec2, EPSILON};
