use anyhow::Result;
use clap::Parser;
use log::{debug, error, info, trace, warn};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use microverse_common::{SimulationConfig, Snapshot};
use microverse_engine::CellSimulation;

/// Headless driver: runs the cell simulation with a scripted player and
/// writes population statistics.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(default_value = "config.toml")]
    config: PathBuf,

    /// Override `timing.total_frames`.
    #[arg(short, long)]
    frames: Option<u32>,
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting Microverse Engine (CPU Parallel)...");

    // --- Load Configuration ---
    let mut config = SimulationConfig::load(&args.config)?;
    if let Some(frames) = args.frames {
        config.timing.total_frames = frames;
    }

    info!("Using {} Rayon threads.", rayon::current_num_threads());

    // --- Initialize Simulation ---
    let mut sim = CellSimulation::new(config)?;
    info!("Simulation initialized with {} agents.", sim.current_alive_count());
    debug!("Simulation Parameters: {:#?}", sim.params());

    // --- Frame Loop ---
    let total_frames = sim.config().timing.total_frames;
    let substeps = sim.config().timing.substeps.max(1);
    let mut record_interval = sim.config().timing.record_interval_frames;
    if record_interval == 0 {
        warn!("record_interval_frames is 0. Recording every frame.");
        record_interval = 1;
    }
    let frame_dt = sim.params().dt * substeps as f32;
    let player_config = sim.config().player.clone();
    info!(
        "Running {} frames of {} tick(s), dt {:.5} s; snapshot every {} frames.",
        total_frames, substeps, sim.params().dt, record_interval
    );

    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    // --- Initial Snapshot ---
    if let Err(e) = sim.record_snapshot() {
        error!("Error recording initial snapshot: {}", e);
        anyhow::bail!("Failed to record initial snapshot.");
    }

    for frame in 0..total_frames {
        let frame_start = Instant::now();

        // Host moves the player, then the engine reads it once per tick
        let elapsed_s = (frame + 1) as f32 * frame_dt;
        let params = sim.params().clone();
        sim.player_mut().follow_path(&player_config, &params, elapsed_s);

        if let Err(e) = sim.step_frame() {
            error!("Error during frame {}: {}", frame + 1, e);
            anyhow::bail!("Simulation frame failed.");
        }
        let frame_duration = frame_start.elapsed();

        let now = Instant::now();
        let should_print_status = now.duration_since(previous_print_time).as_secs_f64() >= 5.0;
        let is_record_frame = (frame + 1) % record_interval == 0;
        let is_last_frame = frame + 1 == total_frames;

        if should_print_status || is_record_frame || is_last_frame {
            info!(
                "Frame [{}/{}] (t={:.2} s) | Alive: {} | Eaten: {} | Player r {:.3} hp {:.1} | Frame Time: {:6.2} ms",
                frame + 1,
                total_frames,
                elapsed_s,
                sim.current_alive_count(),
                sim.eaten_total(),
                sim.player().radius,
                sim.player().health,
                frame_duration.as_secs_f64() * 1000.0
            );
            previous_print_time = now;

            if is_record_frame || is_last_frame {
                if let Err(e) = sim.record_snapshot() {
                    error!("Error recording snapshot at frame {}: {}", frame + 1, e);
                    anyhow::bail!("Failed to record snapshot.");
                }
            }
        } else {
            trace!("Frame [{}/{}] completed in {:.2} ms", frame + 1, total_frames, frame_duration.as_secs_f64() * 1000.0);
        }
    }

    let total_duration = start_time.elapsed();
    info!("Simulation finished in {:.3} seconds.", total_duration.as_secs_f64());

    // --- Save Recorded Data ---
    let base = sim.config().output.base_filename.clone();
    if sim.config().output.save_stats {
        let output_format = sim.config().output.format.as_deref().unwrap_or("json");
        write_snapshots(&base, output_format, sim.get_recorded_snapshots());
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    // Final positions of living agents, separate from the snapshots
    if sim.config().output.save_positions {
        let final_positions = sim.get_results();
        let filename = format!("{}_final_positions.csv", base);

        match csv::Writer::from_path(&filename) {
            Ok(mut writer) => {
                writer.write_record(["x", "y"])?;
                for (x, y) in final_positions {
                    writer.write_record(&[format!("{:.4}", x), format!("{:.4}", y)])?;
                }
                writer.flush()?;
                info!("Final positions saved to {}", filename);
            }
            Err(e) => error!("Error saving CSV file '{}': {}", filename, e),
        }
    } else {
        info!("Skipping saving final positions as per config.");
    }

    info!("Simulation Complete.");
    Ok(())
}

/// Writes all snapshots in the requested format. Unknown formats fall back
/// to JSON; write failures are logged, not fatal.
fn write_snapshots(base: &str, format: &str, snapshots: &[Snapshot]) {
    match format {
        "bincode" => {
            let filename = format!("{}_snapshots.bin", base);
            match File::create(&filename) {
                Ok(file) => match bincode::serialize_into(file, snapshots) {
                    Ok(_) => info!("All snapshots saved to {} (binary format)", filename),
                    Err(e) => error!("Error serializing snapshots to bincode: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
        "messagepack" => {
            let filename = format!("{}_snapshots.msgpack", base);
            match &mut File::create(&filename) {
                Ok(file) => match rmp_serde::encode::write(file, snapshots) {
                    Ok(_) => info!("All snapshots saved to {} (MessagePack format)", filename),
                    Err(e) => error!("Error serializing snapshots to MessagePack: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
        other => {
            if other != "json" {
                warn!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_snapshots.json", base);
            match File::create(&filename) {
                Ok(mut file) => match serde_json::to_string(snapshots) {
                    Ok(json_string) => {
                        if let Err(e) = file.write_all(json_string.as_bytes()) {
                            error!("Error writing snapshot JSON to file '{}': {}", filename, e);
                        } else {
                            info!("All snapshots saved to {}", filename);
                        }
                    }
                    Err(e) => error!("Error serializing snapshots to JSON: {}", e),
                },
                Err(e) => error!("Error creating snapshot file '{}': {}", filename, e),
            }
        }
    }
}
