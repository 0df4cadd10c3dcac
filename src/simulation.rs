use anyhow::Result;
use log::{debug, info, trace};
use microverse_common::{SimParams, SimulationConfig, Snapshot, Vec2};
use rand::distr::Uniform;
use rand::prelude::*;
use serde::{Deserialize, Serialize};

use crate::agents::{AgentBuffers, AgentState, Species};
use crate::deformation::{Dent, DeformationTracker, DENTS_PER_AGENT};
use crate::events::{resolve_events, EventQueues, ResolveReport};
use crate::grid::SpatialGrid;
use crate::integrate::{integrate_forces, remove_drift};
use crate::player::Player;
use crate::solver::{max_penetration, solve_overlaps};

/// Per-agent data a renderer needs for one non-Dead agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderInstance {
    pub index: u32,
    pub position: Vec2,
    pub color: [f32; 4],
    pub squash: f32,
    pub squash_normal: Vec2,
    pub dents: [Dent; DENTS_PER_AGENT],
}

const EDIBLE_COLOR: [f32; 4] = [1.0, 0.85, 0.2, 1.0];
const AGGRESSOR_COLOR: [f32; 4] = [0.95, 0.2, 0.2, 1.0];
const LATCHED_COLOR: [f32; 4] = [1.0, 0.4, 0.4, 1.0];

/// Owns every buffer of the cell simulation and runs the tick sequence.
pub struct CellSimulation {
    config: SimulationConfig,
    params: SimParams,
    agents: AgentBuffers,
    grid: SpatialGrid,
    deformation: DeformationTracker,
    events: EventQueues,
    player: Player,
    /// Monotonic tick counter; also seeds the per-agent noise.
    tick: u32,
    eaten_total: u64,
    last_report: ResolveReport,
    recorded_snapshots: Vec<Snapshot>,
}

impl CellSimulation {
    /// Validates the configuration, allocates every buffer and seeds the
    /// population from `config.agents.seed`.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.agents.seed);
        let (positions, species) = place_initial_agents(&config, &mut rng)?;
        Self::with_agents(config, &positions, &species)
    }

    /// Builds a simulation from explicit agent placements.
    pub fn with_agents(config: SimulationConfig, positions: &[Vec2], species: &[Species]) -> Result<Self> {
        config.validate()?;
        if positions.len() != config.agents.count as usize {
            anyhow::bail!(
                "Agent count ({}) does not match configured agents.count ({}).",
                positions.len(),
                config.agents.count
            );
        }
        let params = config.get_sim_params();
        let agents = AgentBuffers::new(positions, species)?;
        let grid = SpatialGrid::new(&params, agents.len());
        let deformation = DeformationTracker::new(agents.len());
        let player = Player::from_config(&config.player);

        info!(
            "Allocated {} agents on a {}x{} grid (cell {:.3}).",
            agents.len(),
            params.cells_x,
            params.cells_y,
            params.cell_size
        );

        Ok(Self {
            config,
            params,
            agents,
            grid,
            deformation,
            events: EventQueues::new(),
            player,
            tick: 0,
            eaten_total: 0,
            last_report: ResolveReport::default(),
            recorded_snapshots: Vec::new(),
        })
    }

    /// Advances the simulation by one tick of `dt`.
    ///
    /// Phase order is fixed: grid on current positions, integration, drift
    /// removal, overlap solve (with its own grid rebuild), buffer swap, then
    /// sequential event resolution.
    pub fn step(&mut self) -> Result<()> {
        // Freeze the per-tick parameter snapshot
        self.params.tick = self.tick;
        self.params.player = self.player.snapshot();

        // --- 1. Spatial grid on current positions ---
        self.grid.rebuild(&self.agents.pos_cur);

        // --- 2. Forces & integration (parallel) ---
        integrate_forces(&self.params, &self.grid, &mut self.agents, &mut self.events)?;

        // --- 3. Global drift removal ---
        let drift = remove_drift(&mut self.agents.vel_next, &self.agents.state);
        trace!("Tick {}: removed drift ({:.4}, {:.4}).", self.tick, drift.x, drift.y);

        // --- 4. Overlap solve + deformation signal ---
        solve_overlaps(&self.params, &mut self.grid, &mut self.agents, &mut self.deformation)?;

        // --- 5. Predicted becomes current ---
        self.agents.commit();

        // --- 6. Events (sequential) ---
        let report = resolve_events(&self.params, &mut self.agents, &mut self.player, &mut self.events);
        self.eaten_total += report.eaten as u64;
        self.last_report = report;

        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }

    /// Runs the configured number of sub-steps (at least one).
    pub fn step_frame(&mut self) -> Result<()> {
        for _ in 0..self.config.timing.substeps.max(1) {
            self.step()?;
        }
        Ok(())
    }

    /// Positions of all non-Dead agents.
    pub fn get_results(&self) -> Vec<(f32, f32)> {
        self.agents
            .pos_cur
            .iter()
            .zip(self.agents.state.iter())
            .filter(|&(_, &st)| st != AgentState::Dead)
            .map(|(p, _)| (p.x, p.y))
            .collect()
    }

    /// Render-facing view of every non-Dead agent.
    pub fn render_instances(&self) -> Vec<RenderInstance> {
        (0..self.agents.len())
            .filter(|&i| self.agents.state[i] != AgentState::Dead)
            .map(|i| {
                let color = match (self.agents.species[i], self.agents.state[i]) {
                    (Species::Aggressor, AgentState::Latched) => LATCHED_COLOR,
                    (Species::Aggressor, _) => AGGRESSOR_COLOR,
                    (Species::Edible, _) => EDIBLE_COLOR,
                };
                RenderInstance {
                    index: i as u32,
                    position: self.agents.pos_cur[i],
                    color,
                    squash: self.deformation.squash[i],
                    squash_normal: self.deformation.squash_normal[i],
                    dents: self.deformation.dents[i],
                }
            })
            .collect()
    }

    /// Collects population statistics and stores them as a Snapshot.
    pub fn record_snapshot(&mut self) -> Result<()> {
        let snapshot = self.snapshot();
        debug!(
            "Snapshot at tick {}: edible {}, aggressor {}, latched {}, eaten {}, player r {:.3} hp {:.1}, max overlap {:.4}",
            snapshot.tick,
            snapshot.alive_edible,
            snapshot.alive_aggressor,
            snapshot.latched,
            snapshot.eaten_total,
            snapshot.player_radius,
            snapshot.player_health,
            snapshot.max_penetration
        );
        self.recorded_snapshots.push(snapshot);
        Ok(())
    }

    /// Builds a statistics snapshot of the current state. Rebuilds the grid on
    /// current positions, which is safe between ticks.
    pub fn snapshot(&mut self) -> Snapshot {
        self.grid.rebuild(&self.agents.pos_cur);
        let deepest = max_penetration(&self.params, &self.grid, &self.agents.pos_cur, &self.agents.state);

        let (speed_sum, living) = self
            .agents
            .vel_cur
            .iter()
            .zip(self.agents.state.iter())
            .filter(|&(_, &st)| st != AgentState::Dead)
            .fold((0.0f32, 0u32), |(sum, n), (v, _)| (sum + v.length(), n + 1));

        Snapshot {
            tick: self.tick,
            time_s: self.tick as f32 * self.params.dt,
            alive_edible: self.agents.count_alive_species(Species::Edible) as u32,
            alive_aggressor: self.agents.count_alive_species(Species::Aggressor) as u32,
            latched: self.agents.count_state(AgentState::Latched) as u32,
            dead: self.agents.count_state(AgentState::Dead) as u32,
            eaten_total: self.eaten_total,
            player_radius: self.player.radius,
            player_health: self.player.health,
            mean_speed: if living > 0 { speed_sum / living as f32 } else { 0.0 },
            max_penetration: deepest,
            positions: if self.config.output.save_positions_in_snapshot { Some(self.get_results()) } else { None },
        }
    }

    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }

    pub fn current_alive_count(&self) -> usize {
        self.agents.len() - self.agents.count_state(AgentState::Dead)
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn agents(&self) -> &AgentBuffers {
        &self.agents
    }

    /// Mutable access for hosts that edit agent state between ticks.
    pub fn agents_mut(&mut self) -> &mut AgentBuffers {
        &mut self.agents
    }

    pub fn deformation(&self) -> &DeformationTracker {
        &self.deformation
    }

    pub fn player(&self) -> &Player {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut Player {
        &mut self.player
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn eaten_total(&self) -> u64 {
        self.eaten_total
    }

    pub fn last_report(&self) -> ResolveReport {
        self.last_report
    }
}

/// Seeds positions uniformly inside `spawn_fill` of the world (centred on
/// the origin) and assigns species by `edible_fraction`.
fn place_initial_agents(config: &SimulationConfig, rng: &mut StdRng) -> Result<(Vec<Vec2>, Vec<Species>)> {
    let count = config.agents.count as usize;
    let half_w = config.world.width * config.agents.spawn_fill * 0.5;
    let half_h = config.world.height * config.agents.spawn_fill * 0.5;
    let dist_x = Uniform::new_inclusive(-half_w, half_w)?;
    let dist_y = Uniform::new_inclusive(-half_h, half_h)?;

    let mut positions = Vec::with_capacity(count);
    let mut species = Vec::with_capacity(count);
    for _ in 0..count {
        positions.push(Vec2::new(rng.sample(dist_x), rng.sample(dist_y)));
        let s = if rng.random::<f32>() < config.agents.edible_fraction { Species::Edible } else { Species::Aggressor };
        species.push(s);
    }
    Ok((positions, species))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(count: u32) -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.agents.count = count;
        config.aggressor.max_latched = config.aggressor.max_latched.min(count);
        config.world.width = 6.0;
        config.world.height = 4.0;
        config
    }

    #[test]
    fn placement_is_seeded_and_inside_spawn_area() {
        let config = small_config(500);
        let a = CellSimulation::new(config.clone()).expect("valid");
        let b = CellSimulation::new(config.clone()).expect("valid");
        assert_eq!(a.agents().pos_cur, b.agents().pos_cur);
        assert_eq!(a.agents().species, b.agents().species);
        let half_w = config.world.width * config.agents.spawn_fill * 0.5;
        assert!(a.agents().pos_cur.iter().all(|p| p.x.abs() <= half_w + 1e-5));
        let edible = a.agents().count_alive_species(Species::Edible);
        assert!(edible > 300 && edible < 480, "edible count {}", edible);
    }

    #[test]
    fn explicit_agents_must_match_count() {
        let config = small_config(3);
        let result = CellSimulation::with_agents(config, &[Vec2::ZERO], &[Species::Edible]);
        assert!(result.is_err());
    }

    #[test]
    fn ticks_stay_finite_and_inside_the_world() {
        let mut sim = CellSimulation::new(small_config(800)).expect("valid");
        for _ in 0..20 {
            sim.step().expect("tick");
        }
        assert_eq!(sim.tick(), 20);
        let h = sim.params().half_extent();
        let r = sim.params().radius;
        for (i, p) in sim.agents().pos_cur.iter().enumerate() {
            assert!(p.is_finite() && sim.agents().vel_cur[i].is_finite());
            assert!(p.x.abs() <= h.x - r + 1e-4 && p.y.abs() <= h.y - r + 1e-4);
        }
        assert_eq!(sim.agents().len(), 800);
    }

    #[test]
    fn identical_runs_are_deterministic() {
        let config = small_config(400);
        let mut a = CellSimulation::new(config.clone()).expect("valid");
        let mut b = CellSimulation::new(config).expect("valid");
        for _ in 0..10 {
            a.step().expect("tick");
            b.step().expect("tick");
        }
        assert_eq!(a.agents().export_state(), b.agents().export_state());
        assert_eq!(a.player().health, b.player().health);
    }

    #[test]
    fn step_frame_runs_every_substep() {
        let mut config = small_config(50);
        config.timing.substeps = 3;
        let mut sim = CellSimulation::new(config).expect("valid");
        sim.step_frame().expect("frame");
        assert_eq!(sim.tick(), 3);
    }

    #[test]
    fn render_and_snapshot_skip_dead_agents() {
        let mut config = small_config(4);
        config.output.save_positions_in_snapshot = true;
        let positions = [Vec2::new(-2.0, 0.0), Vec2::new(-1.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(2.0, 0.0)];
        let species = [Species::Edible, Species::Aggressor, Species::Edible, Species::Aggressor];
        let mut sim = CellSimulation::with_agents(config, &positions, &species).expect("valid");
        sim.agents_mut().kill(0);
        let instances = sim.render_instances();
        assert_eq!(instances.len(), 3);
        assert!(instances.iter().all(|inst| inst.index != 0));
        assert_eq!(instances[0].color, AGGRESSOR_COLOR);

        sim.record_snapshot().expect("snapshot");
        let snap = &sim.get_recorded_snapshots()[0];
        assert_eq!(snap.dead, 1);
        assert_eq!(snap.alive_edible, 1);
        assert_eq!(snap.positions.as_ref().map(|p| p.len()), Some(3));
        assert_eq!(snap.max_penetration, 0.0);
    }
}
