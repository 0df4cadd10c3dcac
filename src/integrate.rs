use anyhow::Result;
use microverse_common::{SimParams, Vec2, EPSILON};
use rayon::prelude::*;

use crate::agents::{AgentBuffers, AgentState, Species};
use crate::events::{AgentEvent, EventQueues};
use crate::forces;
use crate::grid::SpatialGrid;
use crate::player::{latch_spring, player_field, within_reach};

/// Velocity factor applied to a component that hits a clamped wall.
const WALL_RESTITUTION: f32 = -0.9;

/// Folds a coordinate once across a periodic extent centred on zero.
#[inline(always)]
pub fn wrap_coord(x: f32, range: f32) -> f32 {
    let half = range * 0.5;
    if x < -half {
        x + range
    } else if x > half {
        x - range
    } else {
        x
    }
}

/// Position-only boundary: wrap, or clamp one `radius` inside the walls.
#[inline(always)]
pub fn apply_position_boundary(p: Vec2, radius: f32, params: &SimParams) -> Vec2 {
    if params.wrap_edges {
        Vec2::new(wrap_coord(p.x, params.world_width), wrap_coord(p.y, params.world_height))
    } else {
        let h = params.half_extent();
        // max/min rather than clamp: a radius wider than the world must not panic
        Vec2::new(
            p.x.max(-h.x + radius).min(h.x - radius),
            p.y.max(-h.y + radius).min(h.y - radius),
        )
    }
}

/// Boundary with reflection: clamped components get their velocity inverted and damped.
#[inline(always)]
fn apply_reflecting_boundary(p: &mut Vec2, v: &mut Vec2, radius: f32, params: &SimParams) {
    if params.wrap_edges {
        *p = apply_position_boundary(*p, radius, params);
        return;
    }
    let h = params.half_extent();
    if p.x < -h.x + radius {
        p.x = -h.x + radius;
        v.x *= WALL_RESTITUTION;
    }
    if p.x > h.x - radius {
        p.x = h.x - radius;
        v.x *= WALL_RESTITUTION;
    }
    if p.y < -h.y + radius {
        p.y = -h.y + radius;
        v.y *= WALL_RESTITUTION;
    }
    if p.y > h.y - radius {
        p.y = h.y - radius;
        v.y *= WALL_RESTITUTION;
    }
}

/// Read-only inputs of the integration pass, shared by every worker.
struct PassInputs<'a> {
    params: &'a SimParams,
    grid: &'a SpatialGrid,
    pos: &'a [Vec2],
    vel: &'a [Vec2],
    species: &'a [Species],
    state: &'a [AgentState],
    latch_offset: &'a [Vec2],
}

/// Predicted state of one agent plus the event it raised, if any.
struct Integrated {
    position: Vec2,
    velocity: Vec2,
    event: Option<AgentEvent>,
}

fn integrate_agent(i: usize, inputs: &PassInputs<'_>) -> Integrated {
    let params = inputs.params;
    let p0 = inputs.pos[i];
    let st = inputs.state[i];

    if st == AgentState::Dead {
        return Integrated { position: p0, velocity: Vec2::ZERO, event: None };
    }

    let sp = inputs.species[i];
    let r = params.radius;
    let target = r * 2.0;
    // Banded weights start past 1.2x contact and saturate at 3x contact
    let dead_coh = target * 1.2;
    let max_coh = target * 3.0;
    let coh_span = (max_coh - dead_coh).max(EPSILON);

    let mut f = Vec2::ZERO;
    let mut sum_same = Vec2::ZERO;
    let mut count_same = 0u32;
    let mut sum_diff = Vec2::ZERO;
    let mut count_diff = 0u32;

    // --- 1. Neighbor forces ---
    inputs.grid.for_each_neighbor(p0, |j| {
        let j = j as usize;
        if j == i || inputs.state[j] == AgentState::Dead {
            return;
        }
        let d = inputs.pos[j] - p0;
        let dist = d.length() + EPSILON;
        let n = d / dist;

        f += forces::repulsion(n, target - dist, params.stiff_repel);

        if inputs.species[j] == sp {
            if params.same_attract > 0.0 {
                let w = microverse_common::saturate((dist - dead_coh) / coh_span);
                sum_same += n * w;
                if w > 0.0 {
                    count_same += 1;
                }
            }
        } else if params.diff_repel > 0.0 {
            let w = microverse_common::saturate((target - dist) / target);
            sum_diff += n * w;
            if w > 0.0 {
                count_diff += 1;
            }
        }
    });
    f += forces::cohesion(sum_same, count_same, params.same_attract, params.cohesion_cap);
    f += forces::separation(sum_diff, count_diff, params.diff_repel, params.separation_cap);

    // --- 2. Player interaction ---
    let player = &params.player;
    let mut event = None;
    if player.enabled {
        f += player_field(p0, player, params.stiff_repel);

        if sp.is_edible() && st == AgentState::Alive {
            let reach = player.radius + r + params.eat_radius;
            if within_reach(p0, player.position, reach) {
                return Integrated { position: p0, velocity: Vec2::ZERO, event: Some(AgentEvent::Eaten(i as u32)) };
            }
        }

        if sp.is_aggressor() && params.aggressor_enabled {
            let dp = player.position - p0;
            let dist = dp.length() + EPSILON;
            f += (dp / dist) * params.chase_force;

            if st == AgentState::Latched {
                f += latch_spring(p0, player.position, inputs.latch_offset[i], params.latch_spring);
                if player.velocity.length() >= params.shake_break_speed {
                    event = Some(AgentEvent::UnlatchRequest(i as u32));
                }
            } else if dist <= player.radius + r + params.latch_radius {
                event = Some(AgentEvent::LatchRequest(i as u32));
            }
        }
    }

    // --- 3. Drag and noise ---
    let mut v = inputs.vel[i];
    f += forces::viscosity(v, params.viscosity);
    f += forces::seeded_noise(i as u32, params.tick) * params.noise;

    // --- 4. Semi-implicit Euler ---
    v += f * (params.dt / params.mass.max(1e-3));
    v = v.clamp_length(params.max_speed);
    let mut p = p0 + v * params.dt;

    apply_reflecting_boundary(&mut p, &mut v, r, params);

    Integrated { position: p, velocity: v, event }
}

/// Parallel force/integration pass. Reads the current buffers and the grid
/// built on them, writes predicted position/velocity, and queues events.
pub fn integrate_forces(
    params: &SimParams,
    grid: &SpatialGrid,
    agents: &mut AgentBuffers,
    events: &mut EventQueues,
) -> Result<()> {
    let n = agents.len();
    if agents.pos_next.len() != n || agents.vel_next.len() != n || grid.indices().len() != n {
        anyhow::bail!("Buffer length mismatch before integration (agents: {}).", n);
    }

    let AgentBuffers { pos_cur, vel_cur, pos_next, vel_next, species, state, latch_offset, .. } = agents;
    let inputs = PassInputs {
        params,
        grid,
        pos: pos_cur,
        vel: vel_cur,
        species,
        state,
        latch_offset,
    };

    // Each worker fills its own shard; rayon merges them in index order.
    let emitted: Vec<AgentEvent> = pos_next
        .par_iter_mut()
        .zip(vel_next.par_iter_mut())
        .enumerate()
        .filter_map(|(i, (pos_out, vel_out))| {
            let out = integrate_agent(i, &inputs);
            *pos_out = out.position;
            *vel_out = out.velocity;
            out.event
        })
        .collect();

    events.extend(emitted);
    Ok(())
}

/// Removes the mean velocity of all non-Dead agents from their predicted
/// velocities. Returns the removed mean.
pub fn remove_drift(velocities: &mut [Vec2], states: &[AgentState]) -> Vec2 {
    let (sum, count) = velocities
        .iter()
        .zip(states)
        .filter(|&(_, &st)| st != AgentState::Dead)
        .fold((Vec2::ZERO, 0u32), |(sum, count), (&v, _)| (sum + v, count + 1));
    let mean = sum / count.max(1) as f32;
    for (v, &st) in velocities.iter_mut().zip(states) {
        if st != AgentState::Dead {
            *v -= mean;
        }
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use microverse_common::SimulationConfig;

    fn quiet_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.agents.noise = 0.0;
        config.agents.viscosity = 0.0;
        config.agents.diff_repel = 0.0;
        config.agents.same_attract = 0.0;
        config.player.enabled = false;
        config
    }

    fn run_pass(params: &SimParams, agents: &mut AgentBuffers) -> EventQueues {
        let mut grid = SpatialGrid::new(params, agents.len());
        grid.rebuild(&agents.pos_cur);
        let mut events = EventQueues::new();
        integrate_forces(params, &grid, agents, &mut events).expect("buffers sized");
        events
    }

    #[test]
    fn wrap_folds_to_opposite_edge() {
        assert!((wrap_coord(10.5, 20.0) + 9.5).abs() < 1e-5);
        assert!((wrap_coord(-10.5, 20.0) - 9.5).abs() < 1e-5);
        assert_eq!(wrap_coord(3.0, 20.0), 3.0);
    }

    #[test]
    fn dead_agents_stay_put_with_zero_velocity() {
        let params = quiet_config().get_sim_params();
        let mut agents = AgentBuffers::new(&[Vec2::new(1.0, 1.0)], &[Species::Edible]).expect("sized");
        agents.vel_cur[0] = Vec2::new(1.0, 0.0);
        agents.state[0] = AgentState::Dead;
        run_pass(&params, &mut agents);
        assert_eq!(agents.pos_next[0], Vec2::new(1.0, 1.0));
        assert_eq!(agents.vel_next[0], Vec2::ZERO);
    }

    #[test]
    fn overlapping_pair_is_pushed_apart() {
        let params = quiet_config().get_sim_params();
        let r = params.radius;
        let mut agents = AgentBuffers::new(
            &[Vec2::new(-0.5 * r, 0.0), Vec2::new(0.5 * r, 0.0)],
            &[Species::Edible, Species::Edible],
        )
        .expect("sized");
        run_pass(&params, &mut agents);
        assert!(agents.vel_next[0].x < 0.0);
        assert!(agents.vel_next[1].x > 0.0);
    }

    #[test]
    fn speed_is_clamped() {
        let mut config = quiet_config();
        config.agents.max_speed = 0.5;
        config.agents.stiff_repel = 1.0e6;
        let params = config.get_sim_params();
        let mut agents = AgentBuffers::new(
            &[Vec2::new(0.0, 0.0), Vec2::new(0.01, 0.0)],
            &[Species::Edible, Species::Edible],
        )
        .expect("sized");
        run_pass(&params, &mut agents);
        for v in &agents.vel_next {
            assert!(v.length() <= 0.5 + 1e-5);
        }
    }

    #[test]
    fn clamped_wall_reflects_velocity() {
        let params = quiet_config().get_sim_params();
        let h = params.half_extent();
        let mut agents = AgentBuffers::new(&[Vec2::new(h.x - params.radius, 0.0)], &[Species::Edible]).expect("sized");
        agents.vel_cur[0] = Vec2::new(2.0, 0.0);
        run_pass(&params, &mut agents);
        assert!((agents.pos_next[0].x - (h.x - params.radius)).abs() < 1e-5);
        assert!(agents.vel_next[0].x < 0.0);
    }

    #[test]
    fn edible_in_reach_emits_eaten_and_stops() {
        let mut config = quiet_config();
        config.player.enabled = true;
        let params = config.get_sim_params();
        let mut agents = AgentBuffers::new(&[Vec2::new(0.1, 0.0)], &[Species::Edible]).expect("sized");
        agents.vel_cur[0] = Vec2::new(1.0, 1.0);
        let events = run_pass(&params, &mut agents);
        assert_eq!(events.eaten(), &[0]);
        assert_eq!(agents.vel_next[0], Vec2::ZERO);
        assert_eq!(agents.pos_next[0], Vec2::new(0.1, 0.0));
    }

    #[test]
    fn aggressor_requests_latch_and_shaking_requests_unlatch() {
        let mut config = quiet_config();
        config.player.enabled = true;
        let mut params = config.get_sim_params();
        let reach = params.player.radius + params.radius + params.latch_radius * 0.5;
        let mut agents = AgentBuffers::new(
            &[Vec2::new(reach, 0.0), Vec2::new(-reach, 0.0)],
            &[Species::Aggressor, Species::Aggressor],
        )
        .expect("sized");
        agents.state[1] = AgentState::Latched;
        params.player.velocity = Vec2::new(params.shake_break_speed + 1.0, 0.0);
        let events = run_pass(&params, &mut agents);
        assert_eq!(events.latch_requests(), &[0]);
        assert_eq!(events.unlatch_requests(), &[1]);
    }

    #[test]
    fn drift_removal_zeroes_mean_of_living_agents() {
        let mut vel = vec![Vec2::new(1.0, 0.0), Vec2::new(3.0, 2.0), Vec2::ZERO];
        let states = [AgentState::Alive, AgentState::Latched, AgentState::Dead];
        let mean = remove_drift(&mut vel, &states);
        assert_eq!(mean, Vec2::new(2.0, 1.0));
        let sum = vel[0] + vel[1];
        assert!(sum.length() < 1e-6);
        assert_eq!(vel[2], Vec2::ZERO);
    }
}
