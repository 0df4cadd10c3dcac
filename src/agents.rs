use anyhow::Result;
use microverse_common::Vec2;
use serde::{Deserialize, Serialize};

/// Agent species, fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Species {
    /// Ordinary cell the player can eat.
    Edible = 0,
    /// Leukocyte: chases, latches onto and damages the player.
    Aggressor = 1,
}

impl Species {
    pub fn is_edible(self) -> bool {
        self == Species::Edible
    }

    pub fn is_aggressor(self) -> bool {
        self == Species::Aggressor
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AgentState {
    Alive = 0,
    /// Tombstone: keeps its slot forever but takes part in nothing.
    Dead = 1,
    /// Aggressor anchored to the player; only valid for `Species::Aggressor`.
    Latched = 2,
}

/// Serializable copy of the authoritative per-agent buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStateDump {
    pub positions: Vec<Vec2>,
    pub velocities: Vec<Vec2>,
    pub species: Vec<Species>,
    pub states: Vec<AgentState>,
    pub latch_offsets: Vec<Vec2>,
    pub latch_ttls: Vec<f32>,
}

/// Holds the agent state vectors (SoA, indexed by agent id).
#[derive(Debug)] // Large state shouldn't be cloned casually
pub struct AgentBuffers {
    // --- Ping-Pong Buffers ---
    // Current tick's input
    pub pos_cur: Vec<Vec2>,
    pub vel_cur: Vec<Vec2>,
    // Integrator output (predicted), then the solver's working buffer
    pub pos_next: Vec<Vec2>,
    pub vel_next: Vec<Vec2>,
    // Solver snapshot; holds the final positions after the last iteration
    pub pos_snap: Vec<Vec2>,

    pub species: Vec<Species>,
    pub state: Vec<AgentState>,

    // Valid only while Latched
    pub latch_offset: Vec<Vec2>,
    pub latch_ttl: Vec<f32>,
}

impl AgentBuffers {
    /// Allocates every buffer once; all agents start Alive at rest.
    pub fn new(positions: &[Vec2], species: &[Species]) -> Result<Self> {
        if positions.len() != species.len() {
            anyhow::bail!(
                "Position count ({}) does not match species count ({}).",
                positions.len(),
                species.len()
            );
        }
        let n = positions.len();
        Ok(Self {
            pos_cur: positions.to_vec(),
            vel_cur: vec![Vec2::ZERO; n],
            pos_next: positions.to_vec(),
            vel_next: vec![Vec2::ZERO; n],
            pos_snap: positions.to_vec(),
            species: species.to_vec(),
            state: vec![AgentState::Alive; n],
            latch_offset: vec![Vec2::ZERO; n],
            latch_ttl: vec![0.0; n],
        })
    }

    pub fn len(&self) -> usize {
        self.pos_cur.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos_cur.is_empty()
    }

    pub fn is_valid_index(&self, idx: u32) -> bool {
        (idx as usize) < self.len()
    }

    /// Makes the solver's final positions and the drift-corrected velocities
    /// current. Pure handle swaps, no copies.
    pub fn commit(&mut self) {
        std::mem::swap(&mut self.pos_cur, &mut self.pos_snap);
        std::mem::swap(&mut self.vel_cur, &mut self.vel_next);
    }

    pub fn count_state(&self, state: AgentState) -> usize {
        self.state.iter().filter(|&&s| s == state).count()
    }

    pub fn count_alive_species(&self, species: Species) -> usize {
        self.state
            .iter()
            .zip(self.species.iter())
            .filter(|&(&st, &sp)| st != AgentState::Dead && sp == species)
            .count()
    }

    /// Transitions an agent to the Dead tombstone.
    pub fn kill(&mut self, idx: usize) {
        self.state[idx] = AgentState::Dead;
        self.vel_cur[idx] = Vec2::ZERO;
        self.latch_ttl[idx] = 0.0;
    }

    pub fn export_state(&self) -> AgentStateDump {
        AgentStateDump {
            positions: self.pos_cur.clone(),
            velocities: self.vel_cur.clone(),
            species: self.species.clone(),
            states: self.state.clone(),
            latch_offsets: self.latch_offset.clone(),
            latch_ttls: self.latch_ttl.clone(),
        }
    }

    /// Restores a dump taken from a population of the same size, in place.
    pub fn restore_state(&mut self, dump: &AgentStateDump) -> Result<()> {
        let n = self.len();
        let lengths = [
            dump.positions.len(),
            dump.velocities.len(),
            dump.species.len(),
            dump.states.len(),
            dump.latch_offsets.len(),
            dump.latch_ttls.len(),
        ];
        if lengths.iter().any(|&len| len != n) {
            anyhow::bail!("Agent state dump lengths {:?} do not match population size {}.", lengths, n);
        }
        self.pos_cur.copy_from_slice(&dump.positions);
        self.vel_cur.copy_from_slice(&dump.velocities);
        self.species.copy_from_slice(&dump.species);
        self.state.copy_from_slice(&dump.states);
        self.latch_offset.copy_from_slice(&dump.latch_offsets);
        self.latch_ttl.copy_from_slice(&dump.latch_ttls);
        Ok(())
    }
}
