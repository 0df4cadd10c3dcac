//! Render-facing squash/dent signal derived from the overlap solver's
//! corrections. Nothing in the simulation reads it back.

use microverse_common::{angle_to_vec, lerp, saturate, vec_to_angle, SimParams, Vec2, EPSILON};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::agents::AgentState;

pub const DENT_BINS: usize = 8;
pub const DENTS_PER_AGENT: usize = 4;

/// One dent: unit direction of a histogram bin and its clamped amplitude.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Dent {
    pub direction: Vec2,
    pub amplitude: f32,
}

/// Adds one solver iteration's net displacement of an agent to its histogram.
#[inline(always)]
pub fn accumulate_dent(hist: &mut [f32; DENT_BINS], before: Vec2, after: Vec2, amp_scale: f32) {
    let d = after - before;
    let len = d.length();
    if len <= EPSILON {
        return;
    }
    let mut angle = vec_to_angle(d);
    if angle < 0.0 {
        angle += std::f32::consts::TAU;
    }
    let bin = ((angle * (DENT_BINS as f32 / std::f32::consts::TAU)).floor() as i32).clamp(0, DENT_BINS as i32 - 1);
    hist[bin as usize] += len * amp_scale;
}

/// Picks the four strongest bins. Ties keep the lower bin index first.
pub fn select_top_dents(hist: &[f32; DENT_BINS], amp_max: f32) -> [Dent; DENTS_PER_AGENT] {
    let mut order: [usize; DENT_BINS] = [0, 1, 2, 3, 4, 5, 6, 7];
    // Stable sort: equal magnitudes keep ascending bin order
    order.sort_by(|&a, &b| hist[b].total_cmp(&hist[a]));

    let mut dents = [Dent::default(); DENTS_PER_AGENT];
    for (dent, &bin) in dents.iter_mut().zip(order.iter()) {
        *dent = Dent {
            direction: angle_to_vec(std::f32::consts::TAU / DENT_BINS as f32 * bin as f32),
            amplitude: hist[bin].max(0.0).min(amp_max),
        };
    }
    dents
}

/// Per-agent deformation state, preallocated once.
#[derive(Debug, Clone)]
pub struct DeformationTracker {
    predicted: Vec<Vec2>,
    pub squash: Vec<f32>,
    pub squash_normal: Vec<Vec2>,
    pub dent_hist: Vec<[f32; DENT_BINS]>,
    pub dents: Vec<[Dent; DENTS_PER_AGENT]>,
}

impl DeformationTracker {
    pub fn new(agent_count: usize) -> Self {
        Self {
            predicted: vec![Vec2::ZERO; agent_count],
            squash: vec![0.0; agent_count],
            squash_normal: vec![Vec2::ZERO; agent_count],
            dent_hist: vec![[0.0; DENT_BINS]; agent_count],
            dents: vec![[Dent::default(); DENTS_PER_AGENT]; agent_count],
        }
    }

    /// Remembers the pre-solver predicted positions and clears the histograms.
    pub fn begin_tick(&mut self, predicted: &[Vec2]) {
        self.predicted.copy_from_slice(predicted);
        self.dent_hist.par_iter_mut().for_each(|hist| *hist = [0.0; DENT_BINS]);
    }

    /// Derives squash from the total solver displacement and selects dents.
    /// Dead agents keep their last values.
    pub fn finalize(&mut self, final_positions: &[Vec2], states: &[AgentState], params: &SimParams) {
        let radius = params.radius;
        let decay = params.squash_decay;
        let gain = params.squash_gain;
        let amp_max = params.dent_amp_max;
        let predicted = &self.predicted;

        self.squash
            .par_iter_mut()
            .zip(self.squash_normal.par_iter_mut())
            .zip(self.dents.par_iter_mut())
            .zip(self.dent_hist.par_iter())
            .enumerate()
            .for_each(|(i, (((squash, normal), dents), hist))| {
                if states[i] == AgentState::Dead {
                    return;
                }
                let d = final_positions[i] - predicted[i];
                let len = d.length();
                let amp = saturate(len / (radius + EPSILON));
                if len > EPSILON {
                    *normal = d / len;
                }
                *squash = lerp(*squash * decay, amp, gain);
                *dents = select_top_dents(hist, amp_max);
            });
    }
}
