//! Per-tick core of a 2D cell-agent simulation: spatial hashing, parallel
//! force integration, position-based overlap removal, and sequential
//! resolution of eat/latch events against a single player.

pub mod agents;
pub mod deformation;
pub mod events;
pub mod forces;
pub mod grid;
pub mod integrate;
pub mod player;
pub mod simulation;
pub mod solver;

pub use agents::{AgentBuffers, AgentState, AgentStateDump, Species};
pub use deformation::{Dent, DeformationTracker};
pub use events::{AgentEvent, EventQueues, ResolveReport};
pub use grid::SpatialGrid;
pub use player::Player;
pub use simulation::{CellSimulation, RenderInstance};
