//! Stateless force terms shared by the integration pass.

use microverse_common::{Vec2, EPSILON};

/// Penetration repulsion along `-n` (pushing away from the neighbor `n` points to).
#[inline(always)]
pub fn repulsion(n: Vec2, penetration: f32, stiffness: f32) -> Vec2 {
    if penetration > 0.0 {
        -n * (penetration * stiffness)
    } else {
        Vec2::ZERO
    }
}

#[inline(always)]
fn capped_average(sum: Vec2, count: u32, weight: f32, cap: f32) -> Vec2 {
    let avg = (sum / count as f32) * weight;
    let m = avg.length();
    if m > cap {
        avg * (cap / (m + EPSILON))
    } else {
        avg
    }
}

/// Pull toward the mean direction of same-species neighbors, magnitude-capped.
#[inline(always)]
pub fn cohesion(sum_of_normals: Vec2, count: u32, weight: f32, cap: f32) -> Vec2 {
    if count == 0 || weight <= 0.0 {
        return Vec2::ZERO;
    }
    capped_average(sum_of_normals, count, weight, cap)
}

/// Push away from the mean direction of other-species neighbors, magnitude-capped.
#[inline(always)]
pub fn separation(sum_of_normals: Vec2, count: u32, weight: f32, cap: f32) -> Vec2 {
    if count == 0 || weight <= 0.0 {
        return Vec2::ZERO;
    }
    capped_average(sum_of_normals, count, -weight, cap)
}

#[inline(always)]
pub fn viscosity(velocity: Vec2, coefficient: f32) -> Vec2 {
    velocity * -coefficient
}

/// Integer avalanche hash used for order-independent noise.
#[inline(always)]
pub fn hash(mut x: u32) -> u32 {
    x ^= 2_747_636_419;
    x = x.wrapping_mul(2_654_435_769);
    x ^= x >> 16;
    x = x.wrapping_mul(2_654_435_769);
    x ^= x >> 16;
    x = x.wrapping_mul(2_654_435_769);
    x
}

/// Uniform float in `[0, 1)` from the low 24 bits of `hash(x)`.
#[inline(always)]
pub fn unit_float(x: u32) -> f32 {
    (hash(x) & 0x00FF_FFFF) as f32 / 16_777_216.0
}

/// Random direction scaled by a length in `[-0.5, 0.5)`.
pub fn rand_circle(a: u32, b: u32) -> Vec2 {
    let angle = std::f32::consts::TAU * unit_float(a);
    let r = unit_float(b) - 0.5;
    Vec2::new(angle.cos(), angle.sin()) * r
}

/// Noise sample for `agent` at `tick`. Depends only on the two inputs, so
/// parallel execution order never changes the result.
pub fn seeded_noise(agent: u32, tick: u32) -> Vec2 {
    let s1 = agent.wrapping_mul(741_103_597) ^ tick.wrapping_mul(1_597_334_677);
    let s2 = agent.wrapping_mul(312_680_891) ^ tick.wrapping_mul(747_796_405);
    rand_circle(s1, s2)
}
