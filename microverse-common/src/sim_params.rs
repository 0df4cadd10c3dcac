use serde::{Deserialize, Serialize};
use crate::vecmath::Vec2;

/// Read-only view of the player taken once per tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub enabled: bool,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    /// Signed field strength: positive pulls agents in, negative pushes them out.
    pub force: f32,
    pub range: f32,
}

/// Simulation parameters derived from the configuration, used frequently during simulation steps.
/// Built once, then only `player` and `tick` are refreshed between ticks; never mutated mid-tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    // World & Grid (world is centred on the origin)
    pub world_width: f32,
    pub world_height: f32,
    pub wrap_edges: bool,
    pub cell_size: f32,
    pub inv_cell_size: f32,
    pub cells_x: u32,
    pub cells_y: u32,
    pub num_cells: u32,

    // Time
    pub dt: f32,
    pub tick: u32, // Seeds per-agent noise

    // Agent force model
    pub radius: f32,
    pub mass: f32,
    pub same_attract: f32,
    pub diff_repel: f32,
    pub stiff_repel: f32,
    pub viscosity: f32,
    pub noise: f32,
    pub max_speed: f32,
    pub cohesion_cap: f32,
    pub separation_cap: f32,

    // Player interaction
    pub player: PlayerSnapshot,
    pub eat_radius: f32,
    pub growth_per_eat: f32,

    // Aggressor behaviour
    pub aggressor_enabled: bool,
    pub chase_force: f32,
    pub latch_radius: f32,
    pub latch_spring: f32,
    pub shake_break_speed: f32,
    pub damage_per_second: f32,
    pub max_latched: u32,
    pub latch_ttl: f32,

    // Overlap solver & deformation signal
    pub solver_iterations: u32,
    pub squash_decay: f32,
    pub squash_gain: f32,
    pub dent_amp_max: f32,
}

impl SimParams {
    pub fn half_extent(&self) -> Vec2 {
        Vec2::new(self.world_width * 0.5, self.world_height * 0.5)
    }
}
