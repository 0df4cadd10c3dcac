use anyhow::Result;
use log::trace;
use microverse_common::{SimParams, Vec2, EPSILON};
use rayon::prelude::*;

use crate::agents::{AgentBuffers, AgentState};
use crate::deformation::{accumulate_dent, DeformationTracker};
use crate::grid::SpatialGrid;
use crate::integrate::apply_position_boundary;

/// One Jacobi iteration: every agent reads neighbors from `snapshot` and
/// writes its own corrected position into `working`. Each agent moves half
/// the penetration depth; the neighbor is trusted to move the other half.
fn project_iteration(
    params: &SimParams,
    grid: &SpatialGrid,
    snapshot: &[Vec2],
    working: &mut [Vec2],
    states: &[AgentState],
    dent_hist: &mut [[f32; crate::deformation::DENT_BINS]],
) {
    let target = params.radius * 2.0;
    let amp_scale = 1.0 / params.radius;

    working
        .par_iter_mut()
        .zip(dent_hist.par_iter_mut())
        .enumerate()
        .for_each(|(i, (out, hist))| {
            let p0 = snapshot[i];
            if states[i] == AgentState::Dead {
                *out = p0;
                return;
            }
            let mut p = p0;
            grid.for_each_neighbor(p0, |j| {
                let j = j as usize;
                if j == i || states[j] == AgentState::Dead {
                    return;
                }
                let d = p0 - snapshot[j];
                let dist = d.length() + EPSILON;
                let pen = target - dist;
                if pen > 0.0 {
                    p += (d / dist) * (pen * 0.5);
                }
            });
            accumulate_dent(hist, p0, p, amp_scale);
            *out = p;
        });
}

/// Position-based overlap removal on the predicted positions.
///
/// Copies `pos_next` into `pos_snap`, rebuilds the grid once on that
/// snapshot, then runs `params.solver_iterations` ping-pong iterations. The
/// final positions end up in `pos_snap`. Velocities are never touched.
pub fn solve_overlaps(
    params: &SimParams,
    grid: &mut SpatialGrid,
    agents: &mut AgentBuffers,
    tracker: &mut DeformationTracker,
) -> Result<()> {
    let n = agents.len();
    if agents.pos_snap.len() != n || agents.pos_next.len() != n || tracker.dent_hist.len() != n {
        anyhow::bail!("Buffer length mismatch before overlap solve (agents: {}).", n);
    }

    agents.pos_snap.copy_from_slice(&agents.pos_next);
    tracker.begin_tick(&agents.pos_snap);
    grid.rebuild(&agents.pos_snap);

    let iterations = params.solver_iterations.max(1);
    for it in 0..iterations {
        project_iteration(
            params,
            grid,
            &agents.pos_snap,
            &mut agents.pos_next,
            &agents.state,
            &mut tracker.dent_hist,
        );
        // Ping-pong: this iteration's output is the next one's snapshot
        std::mem::swap(&mut agents.pos_snap, &mut agents.pos_next);
        trace!("Overlap iteration {} of {} done.", it + 1, iterations);
    }

    let radius = params.radius;
    agents
        .pos_snap
        .par_iter_mut()
        .for_each(|p| *p = apply_position_boundary(*p, radius, params));

    tracker.finalize(&agents.pos_snap, &agents.state, params);
    Ok(())
}

/// Deepest remaining overlap between non-Dead agents. `grid` must have
/// been rebuilt on `positions`.
pub fn max_penetration(params: &SimParams, grid: &SpatialGrid, positions: &[Vec2], states: &[AgentState]) -> f32 {
    let target = params.radius * 2.0;
    (0..positions.len())
        .into_par_iter()
        .filter(|&i| states[i] != AgentState::Dead)
        .map(|i| {
            let mut deepest = 0.0f32;
            grid.for_each_neighbor(positions[i], |j| {
                let j = j as usize;
                if j != i && states[j] != AgentState::Dead {
                    deepest = deepest.max(target - positions[i].distance(positions[j]));
                }
            });
            deepest
        })
        .reduce(|| 0.0, f32::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Species;
    use microverse_common::SimulationConfig;
    use rand::prelude::*;

    /// Sum of pairwise overlaps between non-Dead agents (each pair counted twice).
    fn total_penetration(params: &SimParams, grid: &SpatialGrid, positions: &[Vec2], states: &[AgentState]) -> f32 {
        let target = params.radius * 2.0;
        (0..positions.len())
            .into_par_iter()
            .filter(|&i| states[i] != AgentState::Dead)
            .map(|i| {
                let mut total = 0.0f32;
                grid.for_each_neighbor(positions[i], |j| {
                    let j = j as usize;
                    if j != i && states[j] != AgentState::Dead {
                        total += (target - positions[i].distance(positions[j])).max(0.0);
                    }
                });
                total
            })
            .sum()
    }

    fn params_with_iterations(iterations: u32) -> SimParams {
        let mut config = SimulationConfig::default();
        config.solver.iterations = iterations;
        config.get_sim_params()
    }

    fn solve(params: &SimParams, positions: &[Vec2]) -> (AgentBuffers, DeformationTracker) {
        let species = vec![Species::Edible; positions.len()];
        let mut agents = AgentBuffers::new(positions, &species).expect("sized");
        agents.pos_next.copy_from_slice(positions);
        let mut grid = SpatialGrid::new(params, positions.len());
        let mut tracker = DeformationTracker::new(positions.len());
        solve_overlaps(params, &mut grid, &mut agents, &mut tracker).expect("sized");
        (agents, tracker)
    }

    #[test]
    fn single_iteration_moves_each_agent_half_the_penetration() {
        let params = params_with_iterations(1);
        let r = params.radius;
        // Centres r apart: penetration is r
        let a = Vec2::new(-0.5 * r, 0.0);
        let b = Vec2::new(0.5 * r, 0.0);
        let (agents, tracker) = solve(&params, &[a, b]);

        let moved_a = agents.pos_snap[0] - a;
        let moved_b = agents.pos_snap[1] - b;
        assert!((moved_a.x + 0.5 * r).abs() < 1e-4);
        assert!((moved_b.x - 0.5 * r).abs() < 1e-4);
        assert!(moved_a.y.abs() < 1e-6 && moved_b.y.abs() < 1e-6);
        // Pushed along -x lands in bin 4, +x in bin 0
        assert!(tracker.dent_hist[0][4] > 0.0);
        assert!(tracker.dent_hist[1][0] > 0.0);
        assert!(tracker.squash[0] > 0.0);
    }

    #[test]
    fn solver_leaves_separated_agents_alone() {
        let params = params_with_iterations(3);
        let positions = [Vec2::new(0.0, 0.0), Vec2::new(params.radius * 3.0, 0.0)];
        let (agents, tracker) = solve(&params, &positions);
        assert_eq!(agents.pos_snap.to_vec(), positions.to_vec());
        assert_eq!(tracker.squash, vec![0.0, 0.0]);
    }

    #[test]
    fn dead_agents_are_neither_moved_nor_obstacles() {
        let params = params_with_iterations(2);
        let r = params.radius;
        let positions = [Vec2::new(0.0, 0.0), Vec2::new(0.5 * r, 0.0)];
        let species = [Species::Edible, Species::Edible];
        let mut agents = AgentBuffers::new(&positions, &species).expect("sized");
        agents.state[1] = AgentState::Dead;
        let mut grid = SpatialGrid::new(&params, 2);
        let mut tracker = DeformationTracker::new(2);
        solve_overlaps(&params, &mut grid, &mut agents, &mut tracker).expect("sized");
        assert_eq!(agents.pos_snap.to_vec(), positions.to_vec());
    }

    #[test]
    fn more_iterations_reduce_total_overlap() {
        let mut rng = StdRng::seed_from_u64(7);
        let base = params_with_iterations(1);
        let r = base.radius;
        // 250 agents in a 3x3 square: about a third of the area covered
        let positions: Vec<Vec2> = (0..250)
            .map(|_| Vec2::new(rng.random_range(-1.5..1.5), rng.random_range(-1.5..1.5)))
            .collect();
        let states = vec![AgentState::Alive; positions.len()];

        let mut residual = Vec::new();
        for k in [1u32, 2, 4, 8] {
            let params = params_with_iterations(k);
            let (agents, _) = solve(&params, &positions);
            let mut grid = SpatialGrid::new(&params, positions.len());
            grid.rebuild(&agents.pos_snap);
            residual.push(total_penetration(&params, &grid, &agents.pos_snap, &states));
        }
        let mut grid = SpatialGrid::new(&base, positions.len());
        grid.rebuild(&positions);
        let initial = total_penetration(&base, &grid, &positions, &states);

        assert!(residual[0] < initial);
        for pair in residual.windows(2) {
            assert!(pair[1] <= pair[0] * 1.05 + r * 1e-3, "residuals {:?}", residual);
        }
        assert!(residual[3] < residual[0]);
    }
}
