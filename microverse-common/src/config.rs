use serde::{Deserialize, Serialize};
use anyhow::Result;
use crate::sim_params::{PlayerSnapshot, SimParams};
use crate::vecmath::Vec2;
use std::path::Path;

/// Smallest grid cell edge, regardless of agent radius.
const MIN_CELL_SIZE: f32 = 0.05;

/// Upper bound on grid cells; the header buffer is allocated up front.
pub const MAX_GRID_CELLS: u32 = 1 << 24;

/// How agents (and the player) behave at the edge of the world.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryMode {
    /// Reflect off the walls, clamped one radius inside the edge.
    #[default]
    Clamp,
    /// Periodic world: leaving one edge re-enters from the opposite one.
    Wrap,
}

// World extent, centred on the origin.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct WorldConfig {
    pub width: f32,
    pub height: f32,
    pub boundary: BoundaryMode,
}

impl Default for WorldConfig {
    fn default() -> Self {
        WorldConfig { width: 20.0, height: 11.25, boundary: BoundaryMode::Clamp }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct TimingConfig {
    pub sim_hz: f32,
    pub substeps: u32,
    pub total_frames: u32,
    pub record_interval_frames: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig { sim_hz: 60.0, substeps: 1, total_frames: 600, record_interval_frames: 60 }
    }
}

// Agent population and the coefficients of the inter-agent force model.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct AgentConfig {
    pub count: u32,
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
    /// Share of agents seeded as the edible species; the rest are aggressors.
    pub edible_fraction: f32,
    /// Fraction of the world extent used for initial placement.
    pub spawn_fill: f32,
    pub seed: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            count: 10_000,
            radius: 0.06,
            mass: 1.0,
            same_attract: 0.0,
            diff_repel: 0.8,
            stiff_repel: 3.0,
            viscosity: 0.15,
            noise: 0.25,
            max_speed: 3.0,
            cohesion_cap: 0.6,
            separation_cap: 0.8,
            edible_fraction: 0.8,
            spawn_fill: 0.8,
            seed: 12345,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerPath {
    /// Player stays where it was placed.
    #[default]
    Static,
    /// Player circles the origin at `speed` on a ring of `orbit_radius`.
    Orbit,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct PlayerConfig {
    pub enabled: bool,
    pub radius: f32,
    pub max_radius: f32,
    pub health: f32,
    /// `true` pulls agents toward the player, `false` pushes them away.
    pub attract: bool,
    pub force: f32,
    pub range: f32,
    pub eat_radius: f32,
    pub growth_per_eat: f32,
    pub start_x: f32,
    pub start_y: f32,
    // Scripted motion used by the headless driver
    pub path: PlayerPath,
    pub speed: f32,
    pub orbit_radius: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        PlayerConfig {
            enabled: true,
            radius: 0.2,
            max_radius: 0.8,
            health: 100.0,
            attract: false,
            force: 5.0,
            range: 1.0,
            eat_radius: 0.12,
            growth_per_eat: 0.01,
            start_x: 0.0,
            start_y: 0.0,
            path: PlayerPath::Static,
            speed: 6.0,
            orbit_radius: 3.0,
        }
    }
}

// Aggressor species (leukocytes): chase, latch and damage behaviour.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct AggressorConfig {
    pub enabled: bool,
    pub chase_force: f32,
    pub latch_radius: f32,
    pub latch_spring: f32,
    pub damage_per_second: f32,
    pub max_latched: u32,
    pub latch_ttl_seconds: f32,
    pub shake_break_speed: f32,
}

impl Default for AggressorConfig {
    fn default() -> Self {
        AggressorConfig {
            enabled: true,
            chase_force: 2.5,
            latch_radius: 0.10,
            latch_spring: 25.0,
            damage_per_second: 4.0,
            max_latched: 6,
            latch_ttl_seconds: 6.0,
            shake_break_speed: 2.0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct SolverConfig {
    pub iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig { iterations: 2 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct DeformationConfig {
    pub squash_decay: f32,
    pub squash_gain: f32,
    pub dent_amp_max: f32,
}

impl Default for DeformationConfig {
    fn default() -> Self {
        DeformationConfig { squash_decay: 0.90, squash_gain: 0.50, dent_amp_max: 0.45 }
    }
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub base_filename: String,
    pub save_positions: bool,
    pub save_stats: bool,
    pub save_positions_in_snapshot: bool,
    pub format: Option<String>, // Output format: "json", "bincode", "messagepack"
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            base_filename: default_base_filename(),
            save_positions: false,
            save_stats: true,
            save_positions_in_snapshot: false,
            format: None,
        }
    }
}

fn default_base_filename() -> String {
    "microverse".to_string()
}

/// Main simulation configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SimulationConfig {
    #[serde(default)]
    pub world: WorldConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub agents: AgentConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub aggressor: AggressorConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub deformation: DeformationConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl SimulationConfig {
    /// Loads the simulation configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        let config = Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))?;
        Ok(config)
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: SimulationConfig = toml::from_str(text)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the engine cannot run safely. Everything checked
    /// here would otherwise surface as NaNs or slot contention mid-tick.
    pub fn validate(&self) -> Result<()> {
        let a = &self.agents;
        let w = &self.world;
        if !(w.width.is_finite() && w.height.is_finite() && w.width > 0.0 && w.height > 0.0) {
            anyhow::bail!("world width and height must be finite and positive.");
        }
        if !(a.radius.is_finite() && a.radius > 0.0) {
            anyhow::bail!("agents.radius must be finite and positive.");
        }
        let (_, cells_x, cells_y) = self.grid_dims();
        match cells_x.checked_mul(cells_y) {
            Some(cells) if cells <= MAX_GRID_CELLS => {}
            _ => anyhow::bail!(
                "world {}x{} at cell size {} needs a {}x{} grid (limit {} cells).",
                w.width,
                w.height,
                (a.radius * 2.0).max(MIN_CELL_SIZE),
                cells_x,
                cells_y,
                MAX_GRID_CELLS
            ),
        }
        if a.count == 0 {
            anyhow::bail!("agents.count must be greater than 0.");
        }
        if !(a.mass.is_finite() && a.mass > 0.0) {
            anyhow::bail!("agents.mass must be positive.");
        }
        if !(0.0..=1.0).contains(&a.edible_fraction) {
            anyhow::bail!("agents.edible_fraction must lie in [0, 1].");
        }
        if !(0.0..=1.0).contains(&a.spawn_fill) {
            anyhow::bail!("agents.spawn_fill must lie in [0, 1].");
        }
        let coefficients = [
            ("same_attract", a.same_attract),
            ("diff_repel", a.diff_repel),
            ("stiff_repel", a.stiff_repel),
            ("viscosity", a.viscosity),
            ("noise", a.noise),
            ("max_speed", a.max_speed),
            ("cohesion_cap", a.cohesion_cap),
            ("separation_cap", a.separation_cap),
        ];
        for (name, value) in coefficients {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("agents.{} must be finite and non-negative (got {}).", name, value);
            }
        }
        if !(self.timing.sim_hz.is_finite() && self.timing.sim_hz > 0.0) {
            anyhow::bail!("timing.sim_hz must be finite and positive.");
        }
        let p = &self.player;
        if p.radius < 0.0 || p.max_radius < p.radius {
            anyhow::bail!("player radius must be non-negative and not exceed player.max_radius.");
        }
        if p.range < 0.0 || p.eat_radius < 0.0 || p.growth_per_eat < 0.0 {
            anyhow::bail!("player range, eat_radius and growth_per_eat must be non-negative.");
        }
        if self.aggressor.enabled {
            let max_latched = self.aggressor.max_latched;
            if max_latched == 0 || max_latched > a.count {
                anyhow::bail!(
                    "aggressor.max_latched must lie in 1..={} (got {}).",
                    a.count,
                    max_latched
                );
            }
            if !(self.aggressor.latch_ttl_seconds > 0.0) {
                anyhow::bail!("aggressor.latch_ttl_seconds must be positive.");
            }
        }
        let d = &self.deformation;
        if !(0.0..=1.0).contains(&d.squash_decay) || d.squash_gain < 0.0 || d.dent_amp_max < 0.0 {
            anyhow::bail!("deformation decay must lie in [0, 1]; gain and dent_amp_max must be non-negative.");
        }
        Ok(())
    }

    /// Fixed physics timestep in seconds.
    pub fn dt(&self) -> f32 {
        1.0 / self.timing.sim_hz.max(30.0)
    }

    /// Cell edge and cell counts per axis. Counts saturate at `u32::MAX` for
    /// extents `validate` rejects.
    fn grid_dims(&self) -> (f32, u32, u32) {
        let cell_size = (self.agents.radius * 2.0).max(MIN_CELL_SIZE);
        let inv_cell_size = 1.0 / cell_size;
        // Float-to-int `as` saturates, so oversized worlds cannot wrap here
        let cells_x = ((self.world.width * inv_cell_size).ceil() as u32).max(1);
        let cells_y = ((self.world.height * inv_cell_size).ceil() as u32).max(1);
        (cell_size, cells_x, cells_y)
    }

    /// Converts the configuration into simulation parameters used at runtime.
    /// The player snapshot starts from the configured spawn state; the engine
    /// refreshes it together with `tick` before every tick.
    pub fn get_sim_params(&self) -> SimParams {
        let radius = self.agents.radius;

        // Grid parameters
        let (cell_size, cells_x, cells_y) = self.grid_dims();
        let inv_cell_size = 1.0 / cell_size;

        let player_force = if self.player.attract { self.player.force } else { -self.player.force };

        SimParams {
            // World & Grid
            world_width: self.world.width,
            world_height: self.world.height,
            wrap_edges: self.world.boundary == BoundaryMode::Wrap,
            cell_size,
            inv_cell_size,
            cells_x,
            cells_y,
            num_cells: cells_x.saturating_mul(cells_y),
            // Time
            dt: self.dt(),
            tick: 0,
            // Agents
            radius,
            mass: self.agents.mass,
            same_attract: self.agents.same_attract,
            diff_repel: self.agents.diff_repel,
            stiff_repel: self.agents.stiff_repel,
            viscosity: self.agents.viscosity,
            noise: self.agents.noise,
            max_speed: self.agents.max_speed,
            cohesion_cap: self.agents.cohesion_cap,
            separation_cap: self.agents.separation_cap,
            // Player
            player: PlayerSnapshot {
                enabled: self.player.enabled,
                position: Vec2::new(self.player.start_x, self.player.start_y),
                velocity: Vec2::ZERO,
                radius: self.player.radius,
                force: player_force,
                range: self.player.range,
            },
            eat_radius: self.player.eat_radius,
            growth_per_eat: self.player.growth_per_eat,
            // Aggressor
            aggressor_enabled: self.aggressor.enabled,
            chase_force: self.aggressor.chase_force,
            latch_radius: self.aggressor.latch_radius,
            latch_spring: self.aggressor.latch_spring,
            shake_break_speed: self.aggressor.shake_break_speed,
            damage_per_second: self.aggressor.damage_per_second,
            max_latched: self.aggressor.max_latched,
            latch_ttl: self.aggressor.latch_ttl_seconds,
            // Solver & deformation
            solver_iterations: self.solver.iterations.max(1),
            squash_decay: self.deformation.squash_decay,
            squash_gain: self.deformation.squash_gain,
            dent_amp_max: self.deformation.dent_amp_max,
        }
    }
}
