use microverse_common::{angle_to_vec, PlayerConfig, PlayerPath, PlayerSnapshot, SimParams, Vec2, EPSILON};

use crate::integrate::apply_position_boundary;

/// The single externally controlled entity. The host moves it; the engine
/// reads it once per tick and writes back growth and damage.
#[derive(Debug, Clone)]
pub struct Player {
    pub enabled: bool,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
    pub max_radius: f32,
    pub health: f32,
    force: f32,
    range: f32,
}

impl Player {
    pub fn from_config(config: &PlayerConfig) -> Self {
        Self {
            enabled: config.enabled,
            position: Vec2::new(config.start_x, config.start_y),
            velocity: Vec2::ZERO,
            radius: config.radius,
            max_radius: config.max_radius,
            health: config.health,
            force: if config.attract { config.force } else { -config.force },
            range: config.range,
        }
    }

    /// Read-only copy handed to the parallel phases.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            enabled: self.enabled,
            position: self.position,
            velocity: self.velocity,
            radius: self.radius,
            force: self.force,
            range: self.range,
        }
    }

    /// Grows the radius for `eaten` cells, capped at `max_radius`.
    pub fn grow(&mut self, eaten: u32, growth_per_eat: f32) {
        if eaten > 0 {
            self.radius = (self.radius + growth_per_eat * eaten as f32).min(self.max_radius);
        }
    }

    pub fn take_damage(&mut self, amount: f32) {
        self.health = (self.health - amount).max(0.0);
    }

    /// Moves the player along its scripted path for a headless run. The
    /// velocity is what the shake-break test sees; on the orbit it is the
    /// ring tangent at `speed`, never a jump from the spawn point.
    pub fn follow_path(&mut self, config: &PlayerConfig, params: &SimParams, elapsed_s: f32) {
        if !self.enabled {
            return;
        }
        match config.path {
            PlayerPath::Static => {
                self.velocity = Vec2::ZERO;
            }
            PlayerPath::Orbit => {
                let ring = config.orbit_radius.max(EPSILON);
                let omega = config.speed / ring;
                let angle = omega * elapsed_s;
                self.position = angle_to_vec(angle) * ring;
                self.velocity = Vec2::new(-angle.sin(), angle.cos()) * config.speed;
            }
        }
        self.position = apply_position_boundary(self.position, self.radius, params);
    }
}

/// Range-limited player field: contact repulsion plus a push/pull term that
/// fades linearly to zero at `player.range`.
#[inline(always)]
pub fn player_field(p: Vec2, player: &PlayerSnapshot, stiffness: f32) -> Vec2 {
    let dp = player.position - p;
    let dist = dp.length() + EPSILON;
    if dist > player.range {
        return Vec2::ZERO;
    }
    let n = dp / dist;
    let mut f = Vec2::ZERO;
    let pen = player.radius - dist;
    if pen > 0.0 {
        f += -n * (pen * stiffness * 0.8);
    }
    let denom = (player.range - player.radius).max(1e-5);
    let w = microverse_common::saturate((player.range - dist) / denom);
    f += n * (player.force * w);
    f
}

/// Whether an agent at `p` is inside the player's eat reach.
#[inline(always)]
pub fn within_reach(p: Vec2, player_position: Vec2, reach: f32) -> bool {
    (player_position - p).length() <= reach
}

/// Spring pulling a latched agent toward its anchor on the player.
#[inline(always)]
pub fn latch_spring(p: Vec2, player_position: Vec2, latch_offset: Vec2, k: f32) -> Vec2 {
    (player_position + latch_offset - p) * k
}

#[cfg(test)]
mod tests {
    use super::*;
    use microverse_common::SimulationConfig;

    fn snapshot_at_origin(force: f32) -> PlayerSnapshot {
        PlayerSnapshot {
            enabled: true,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            radius: 0.2,
            force,
            range: 1.0,
        }
    }

    #[test]
    fn field_vanishes_outside_range() {
        let player = snapshot_at_origin(-5.0);
        assert_eq!(player_field(Vec2::new(1.5, 0.0), &player, 3.0), Vec2::ZERO);
    }

    #[test]
    fn negative_force_pushes_agents_out() {
        let player = snapshot_at_origin(-5.0);
        let f = player_field(Vec2::new(0.5, 0.0), &player, 3.0);
        assert!(f.x > 0.0);
        let pull = snapshot_at_origin(5.0);
        assert!(player_field(Vec2::new(0.5, 0.0), &pull, 0.0).x < 0.0);
    }

    #[test]
    fn growth_is_capped() {
        let mut player = Player::from_config(&PlayerConfig::default());
        player.grow(3, 0.01);
        assert!((player.radius - 0.23).abs() < 1e-6);
        player.grow(1000, 0.01);
        assert_eq!(player.radius, player.max_radius);
    }

    #[test]
    fn damage_floors_at_zero() {
        let mut player = Player::from_config(&PlayerConfig::default());
        player.take_damage(250.0);
        assert_eq!(player.health, 0.0);
    }

    #[test]
    fn orbit_path_reports_velocity() {
        let mut config = SimulationConfig::default();
        config.player.path = PlayerPath::Orbit;
        config.player.orbit_radius = 2.0;
        let params = config.get_sim_params();
        let mut player = Player::from_config(&config.player);
        player.follow_path(&config.player, &params, 1.0 / 60.0);
        assert!((player.position.length() - 2.0).abs() < 1e-4);
        assert!((player.velocity.length() - config.player.speed).abs() < 1e-4);
        // Tangent to the ring
        assert!((player.velocity.x * player.position.x + player.velocity.y * player.position.y).abs() < 1e-3);
    }

    #[test]
    fn first_orbit_frame_has_no_velocity_spike() {
        let mut config = SimulationConfig::default();
        config.player.path = PlayerPath::Orbit;
        config.player.speed = 1.0;
        config.player.orbit_radius = 3.0;
        let params = config.get_sim_params();
        // Spawned at the origin, three units inside the ring
        let mut player = Player::from_config(&config.player);
        player.follow_path(&config.player, &params, 1.0 / 60.0);
        assert!(player.velocity.length() < params.shake_break_speed);
        assert!((player.velocity.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn latch_spring_points_at_anchor() {
        let f = latch_spring(Vec2::ZERO, Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0), 2.0);
        assert_eq!(f, Vec2::new(2.0, 2.0));
    }
}
