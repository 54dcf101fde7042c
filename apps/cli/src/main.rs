use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;

use analysis::{compute_cruise_profile, profile_summary};
use fleet_mock::{generate_fleet, stuttgart_behaviors, stuttgart_route};
use iox::{export_run_log, import_telemetry_csv, RunLog};
use model::{CruiseProfile, RouteModel, SimulationState, TelemetryPoint};
use sim::{snapshot_channel, SimClock, SmootherConfig, SpeedSmoother};

#[derive(Parser)]
#[command(name = "cruise", about = "Derive a per-segment cruise profile and replay it")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Derive the profile and run the clocked simulation to the end of
    /// the route.
    Run {
        /// Number of mock vehicles to generate (ignored with --telemetry).
        #[arg(long, default_value_t = 1000)]
        vehicles: usize,
        /// Load a telemetry batch from CSV instead of generating one.
        #[arg(long)]
        telemetry: Option<PathBuf>,
        /// Tick interval in milliseconds.
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
        /// Playback speed multiplier (clamped to the configured range).
        #[arg(long, default_value_t = 1.0)]
        multiplier: f64,
        /// Safety cap on tick count, e.g. for profiles with uncovered
        /// segments where progress stalls at speed 0.
        #[arg(long, default_value_t = 10_000)]
        max_ticks: usize,
        /// Seed for mock generation; random when omitted.
        #[arg(long)]
        seed: Option<u64>,
        /// Write the run log (profile + snapshot history) as JSON.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Derive and print the profile from a telemetry CSV, no simulation.
    Profile {
        telemetry: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    match Cli::parse().command {
        Command::Run {
            vehicles,
            telemetry,
            interval_ms,
            multiplier,
            max_ticks,
            seed,
            out,
        } => run(vehicles, telemetry, interval_ms, multiplier, max_ticks, seed, out),
        Command::Profile { telemetry } => {
            let route = stuttgart_route();
            let points = import_telemetry_csv(&telemetry)?;
            log::info!("loaded {} telemetry points", points.len());
            let profile = compute_cruise_profile(&points, &route);
            print_profile(&profile);
            println!("{}", serde_json::to_string_pretty(&profile_summary(&profile))?);
            Ok(())
        }
    }
}

fn run(
    vehicles: usize,
    telemetry: Option<PathBuf>,
    interval_ms: u64,
    multiplier: f64,
    max_ticks: usize,
    seed: Option<u64>,
    out: Option<PathBuf>,
) -> Result<()> {
    let route = stuttgart_route();
    let points = load_or_generate(telemetry, vehicles, seed, &route)?;
    log::info!("aggregating {} telemetry points", points.len());

    let profile = compute_cruise_profile(&points, &route);
    print_profile(&profile);

    let config = SmootherConfig {
        tick_interval_ms: interval_ms,
        ..SmootherConfig::default()
    };
    let interval = config.tick_interval();
    let route = Arc::new(route);
    let profile_arc = Arc::new(profile.clone());
    let smoother = Arc::new(Mutex::new(SpeedSmoother::new(
        Arc::clone(&route),
        profile_arc,
        config,
    )?));

    let (tx, rx) = snapshot_channel();
    let mut clock = SimClock::start(Arc::clone(&smoother), interval, multiplier, tx);

    let terminal_segment = route.len().saturating_sub(1);
    let mut history: Vec<SimulationState> = Vec::new();
    let recv_timeout = interval * 10 + Duration::from_secs(1);
    for _ in 0..max_ticks {
        let snap = match rx.recv_timeout(recv_timeout) {
            Ok(snap) => snap,
            Err(_) => break,
        };
        if history.last().map(|s: &SimulationState| s.segment_index) != Some(snap.segment_index) {
            log::info!(
                "segment {} at {:.1} km/h (next target {:.1})",
                snap.segment_index,
                snap.current_speed,
                snap.next_speed_target
            );
        }
        let done = snap.segment_index >= terminal_segment;
        history.push(snap);
        if done {
            break;
        }
    }
    clock.stop();

    match history.last() {
        Some(last) if last.segment_index >= terminal_segment => println!(
            "reached the final waypoint after {} ticks at ({:.4}, {:.4})",
            history.len(),
            last.position.lat,
            last.position.lng
        ),
        _ => println!("stopped after {} ticks without reaching the end", history.len()),
    }

    if let Some(path) = out {
        let run_log = RunLog::new(profile, history);
        export_run_log(&run_log, &path)?;
        println!("run log written to {}", path.display());
    }
    Ok(())
}

fn load_or_generate(
    telemetry: Option<PathBuf>,
    vehicles: usize,
    seed: Option<u64>,
    route: &RouteModel,
) -> Result<Vec<TelemetryPoint>> {
    if let Some(path) = telemetry {
        return import_telemetry_csv(&path);
    }
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_os_rng(),
    };
    let start_ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as f64;
    Ok(generate_fleet(
        &mut rng,
        vehicles,
        route,
        &stuttgart_behaviors(),
        start_ts,
    ))
}

fn print_profile(profile: &CruiseProfile) {
    println!("segment  avg km/h  samples  band");
    for seg in &profile.segments {
        println!(
            "{:>7}  {:>8.1}  {:>7}  {}",
            seg.segment_index,
            seg.avg_speed,
            seg.sample_count,
            speed_band(seg.avg_speed)
        );
    }
}

// Same thresholds the map UI uses for segment coloring.
fn speed_band(speed: f64) -> &'static str {
    if speed < 55.0 {
        "green"
    } else if speed < 60.0 {
        "yellow"
    } else {
        "red"
    }
}
