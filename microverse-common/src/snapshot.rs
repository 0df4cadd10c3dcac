use serde::{Serialize, Deserialize};

/// Population statistics of the cell simulation at a specific tick.
#[derive(Debug, Clone, Serialize, Deserialize)] // Derive traits for easy saving/loading
pub struct Snapshot {
    /// Tick counter at which the snapshot was taken.
    pub tick: u32,
    /// Simulated time in seconds (`tick * dt`).
    pub time_s: f32,
    pub alive_edible: u32,
    pub alive_aggressor: u32,
    pub latched: u32,
    /// Tombstoned slots (eaten cells and expired aggressors).
    pub dead: u32,
    /// Edible cells eaten by the player since initialization.
    pub eaten_total: u64,
    pub player_radius: f32,
    pub player_health: f32,
    /// Mean speed over non-Dead agents.
    pub mean_speed: f32,
    /// Largest pairwise overlap still present between non-Dead agents.
    pub max_penetration: f32,
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "positions": null
    pub positions: Option<Vec<(f32, f32)>>,
}
