//! Event hand-off from the parallel integration pass to the sequential
//! resolver, and the resolver itself.

use log::debug;
use microverse_common::{angle_to_vec, SimParams};

use crate::agents::{AgentBuffers, AgentState};
use crate::player::Player;

/// Request emitted by one agent during the integration pass. Each agent
/// emits at most one per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentEvent {
    Eaten(u32),
    LatchRequest(u32),
    UnlatchRequest(u32),
}

/// The three per-tick queues. Workers collect into per-thread shards which
/// rayon merges in agent-index order; the queues are filled only after the
/// integration barrier and drained to empty every tick.
#[derive(Debug, Default)]
pub struct EventQueues {
    eaten: Vec<u32>,
    latch_requests: Vec<u32>,
    unlatch_requests: Vec<u32>,
}

impl EventQueues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Eaten(i) => self.eaten.push(i),
            AgentEvent::LatchRequest(i) => self.latch_requests.push(i),
            AgentEvent::UnlatchRequest(i) => self.unlatch_requests.push(i),
        }
    }

    pub fn extend<I: IntoIterator<Item = AgentEvent>>(&mut self, events: I) {
        for event in events {
            self.push(event);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.eaten.is_empty() && self.latch_requests.is_empty() && self.unlatch_requests.is_empty()
    }

    pub fn eaten(&self) -> &[u32] {
        &self.eaten
    }

    pub fn latch_requests(&self) -> &[u32] {
        &self.latch_requests
    }

    pub fn unlatch_requests(&self) -> &[u32] {
        &self.unlatch_requests
    }
}

/// What the resolver changed during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveReport {
    pub eaten: u32,
    pub latched: u32,
    pub unlatched: u32,
    pub expired: u32,
}

/// Drains all queues and applies the resulting state transitions, then runs
/// latch upkeep (damage and TTL). Events whose index is out of range or whose
/// agent is no longer in the expected state are dropped silently.
pub fn resolve_events(
    params: &SimParams,
    agents: &mut AgentBuffers,
    player: &mut Player,
    queues: &mut EventQueues,
) -> ResolveReport {
    let mut report = ResolveReport::default();

    // Eaten: Alive edible -> Dead, player grows
    for idx in queues.eaten.drain(..) {
        if !agents.is_valid_index(idx) {
            continue;
        }
        let i = idx as usize;
        if agents.state[i] == AgentState::Alive && agents.species[i].is_edible() {
            agents.kill(i);
            report.eaten += 1;
        }
    }
    player.grow(report.eaten, params.growth_per_eat);

    // Latch requests: Alive aggressor -> Latched, up to the concurrent cap.
    // The cap counts every Latched agent; the anchor slot is this tick's
    // acceptance order.
    let mut latched_now = agents.count_state(AgentState::Latched) as u32;
    let slots = params.max_latched.max(1);
    let attach_radius = player.radius + params.radius * 1.2;
    for idx in queues.latch_requests.drain(..) {
        if latched_now >= params.max_latched {
            continue;
        }
        if !agents.is_valid_index(idx) {
            continue;
        }
        let i = idx as usize;
        if agents.state[i] == AgentState::Alive && agents.species[i].is_aggressor() {
            let slot = report.latched % slots;
            let angle = std::f32::consts::TAU * slot as f32 / slots as f32;
            agents.state[i] = AgentState::Latched;
            agents.latch_offset[i] = angle_to_vec(angle) * attach_radius;
            agents.latch_ttl[i] = params.latch_ttl;
            latched_now += 1;
            report.latched += 1;
        }
    }

    // Unlatch requests: Latched -> Alive
    for idx in queues.unlatch_requests.drain(..) {
        if agents.is_valid_index(idx) && agents.state[idx as usize] == AgentState::Latched {
            agents.state[idx as usize] = AgentState::Alive;
            report.unlatched += 1;
        }
    }

    // Latch upkeep: damage the player, age the latch
    if player.enabled {
        let dt = params.dt;
        for i in 0..agents.len() {
            if agents.state[i] != AgentState::Latched || !agents.species[i].is_aggressor() {
                continue;
            }
            player.take_damage(params.damage_per_second * dt);
            agents.latch_ttl[i] -= dt;
            if agents.latch_ttl[i] <= 0.0 {
                agents.kill(i);
                report.expired += 1;
            }
        }
    }

    if report != ResolveReport::default() {
        debug!(
            "Tick {}: eaten {}, latched {}, unlatched {}, expired {}.",
            params.tick, report.eaten, report.latched, report.unlatched, report.expired
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::Species;
    use microverse_common::{SimulationConfig, Vec2};

    fn setup(species: &[Species]) -> (SimParams, AgentBuffers, Player) {
        let config = SimulationConfig::default();
        let params = config.get_sim_params();
        let positions = vec![Vec2::ZERO; species.len()];
        let agents = AgentBuffers::new(&positions, species).expect("lengths match");
        let player = Player::from_config(&config.player);
        (params, agents, player)
    }

    #[test]
    fn eaten_events_kill_edible_agents_once() {
        let (params, mut agents, mut player) = setup(&[Species::Edible, Species::Aggressor]);
        let start_radius = player.radius;
        let mut queues = EventQueues::new();
        queues.extend([AgentEvent::Eaten(0), AgentEvent::Eaten(0), AgentEvent::Eaten(1), AgentEvent::Eaten(99)]);
        let report = resolve_events(&params, &mut agents, &mut player, &mut queues);
        assert_eq!(report.eaten, 1);
        assert_eq!(agents.state[0], AgentState::Dead);
        assert_eq!(agents.state[1], AgentState::Alive);
        assert!((player.radius - (start_radius + params.growth_per_eat)).abs() < 1e-6);
        assert!(queues.is_empty());
    }

    #[test]
    fn latch_acceptance_respects_cap_including_existing_latches() {
        let species = vec![Species::Aggressor; 10];
        let (mut params, mut agents, mut player) = setup(&species);
        params.max_latched = 3;
        agents.state[9] = AgentState::Latched;
        agents.latch_ttl[9] = 5.0;
        let mut queues = EventQueues::new();
        queues.extend((0..8).map(AgentEvent::LatchRequest));
        let report = resolve_events(&params, &mut agents, &mut player, &mut queues);
        assert_eq!(report.latched, 2);
        assert_eq!(agents.count_state(AgentState::Latched), 3);
    }

    #[test]
    fn accepted_latch_gets_offset_and_ttl() {
        let (params, mut agents, mut player) = setup(&[Species::Aggressor, Species::Edible]);
        let mut queues = EventQueues::new();
        queues.extend([AgentEvent::LatchRequest(0), AgentEvent::LatchRequest(1)]);
        resolve_events(&params, &mut agents, &mut player, &mut queues);
        assert_eq!(agents.state[0], AgentState::Latched);
        assert_eq!(agents.state[1], AgentState::Alive);
        let expected = player.radius + params.radius * 1.2;
        assert!((agents.latch_offset[0].length() - expected).abs() < 1e-5);
        // One upkeep step already ran
        assert!((agents.latch_ttl[0] - (params.latch_ttl - params.dt)).abs() < 1e-5);
    }

    #[test]
    fn latch_slots_follow_acceptance_order_within_the_tick() {
        let (mut params, mut agents, mut player) = setup(&[Species::Aggressor; 4]);
        params.max_latched = 4;
        let attach = player.radius + params.radius * 1.2;
        // Agent 1 latched on an earlier tick, anchored at slot 1
        agents.state[1] = AgentState::Latched;
        agents.latch_ttl[1] = 5.0;
        agents.latch_offset[1] = angle_to_vec(std::f32::consts::TAU / 4.0) * attach;

        let mut queues = EventQueues::new();
        queues.extend([AgentEvent::LatchRequest(0), AgentEvent::LatchRequest(2)]);
        let report = resolve_events(&params, &mut agents, &mut player, &mut queues);

        assert_eq!(report.latched, 2);
        assert!((agents.latch_offset[0] - Vec2::new(attach, 0.0)).length() < 1e-5);
        let second = angle_to_vec(std::f32::consts::TAU / 4.0) * attach;
        assert!((agents.latch_offset[2] - second).length() < 1e-5);
    }

    #[test]
    fn unlatch_only_affects_latched_agents() {
        let (params, mut agents, mut player) = setup(&[Species::Aggressor, Species::Aggressor]);
        agents.state[0] = AgentState::Latched;
        agents.latch_ttl[0] = 1.0;
        let mut queues = EventQueues::new();
        queues.extend([AgentEvent::UnlatchRequest(0), AgentEvent::UnlatchRequest(1)]);
        let report = resolve_events(&params, &mut agents, &mut player, &mut queues);
        assert_eq!(report.unlatched, 1);
        assert_eq!(agents.state, vec![AgentState::Alive, AgentState::Alive]);
    }

    #[test]
    fn upkeep_damages_player_and_expires_latches() {
        let (params, mut agents, mut player) = setup(&[Species::Aggressor, Species::Aggressor]);
        agents.state[0] = AgentState::Latched;
        agents.latch_ttl[0] = params.dt * 0.5;
        agents.state[1] = AgentState::Latched;
        agents.latch_ttl[1] = 10.0;
        let health = player.health;
        let mut queues = EventQueues::new();
        let report = resolve_events(&params, &mut agents, &mut player, &mut queues);
        assert_eq!(report.expired, 1);
        assert_eq!(agents.state[0], AgentState::Dead);
        assert_eq!(agents.state[1], AgentState::Latched);
        let expected = health - 2.0 * params.damage_per_second * params.dt;
        assert!((player.health - expected).abs() < 1e-4);
    }
}
