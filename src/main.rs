use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration, Instant};

use terrain_tracker::sampling::ConfigurationListener;
use terrain_tracker::sensors::{self, IntervalListener, Scenario, SyntheticTrack};
use terrain_tracker::{TerrainEvent, TrackerConfig, TrackingSession};

#[derive(Parser, Debug)]
#[command(name = "terrain_tracker")]
#[command(about = "On-foot altitude, grade and terrain tracking with adaptive location sampling", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "60")]
    duration: u64,

    /// Synthetic movement to simulate
    #[arg(long, value_enum, default_value = "walk")]
    scenario: Scenario,

    /// JSON config overriding defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Battery fraction to report to the sampling controller
    #[arg(long, default_value = "1.0")]
    battery: f64,

    /// Inertial sample rate [Hz]
    #[arg(long, default_value = "25")]
    rate: f64,

    /// Output directory
    #[arg(long, default_value = "terrain_tracker_sessions")]
    output_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("[{}] Terrain Tracker starting", ts_now());
    println!("  Duration: {} seconds (0=continuous)", args.duration);
    println!("  Scenario: {:?}", args.scenario);
    println!("  Output Dir: {}", args.output_dir.display());

    std::fs::create_dir_all(&args.output_dir)?;

    let config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };
    let feed_capacity = config.session.feed_capacity;
    let session = Arc::new(TrackingSession::new(config)?);

    let (interval_listener, update_interval) =
        IntervalListener::new(session.sampling_configuration().await.update_interval_secs);
    let interval_listener: Arc<dyn ConfigurationListener> = Arc::new(interval_listener);
    session.register_listener(&interval_listener).await;
    session.update_power(args.battery, false).await;

    let (inertial_tx, inertial_rx) = mpsc::channel(feed_capacity);
    let (location_tx, location_rx) = mpsc::channel(feed_capacity);
    let (barometer_tx, barometer_rx) = mpsc::channel(feed_capacity);
    session.attach_inertial_feed(inertial_rx)?;
    session.attach_location_feed(location_rx)?;
    session.attach_barometer_feed(barometer_rx)?;

    let track = SyntheticTrack::new(args.scenario);
    let start = Instant::now();
    let _inertial = tokio::spawn(sensors::inertial_loop(inertial_tx, track, args.rate, start));
    let _location = tokio::spawn(sensors::location_loop(location_tx, track, start, update_interval));
    let _barometer = tokio::spawn(sensors::barometer_loop(barometer_tx, track, start));

    let mut events = Box::pin(session.subscribe());
    let printer = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match event {
                TerrainEvent::Factor(update) => println!(
                    "[{}] terrain {} ({:.0}%) factor {:.3}",
                    ts_now(),
                    update.terrain.name(),
                    update.confidence * 100.0,
                    update.terrain_factor
                ),
                TerrainEvent::DetectionDegraded { reason, .. } => {
                    println!("[{}] detection degraded: {}", ts_now(), reason)
                }
            }
        }
    });

    session.start()?;

    let status_path = args.output_dir.join("live_status.json");
    let mut status_tick = interval(Duration::from_secs(2));
    let deadline = (args.duration > 0).then(|| start + Duration::from_secs(args.duration));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("[{}] Interrupted, stopping...", ts_now());
                break;
            }
            _ = status_tick.tick() => {
                let summary = session.telemetry().await;
                log::info!("{}", summary.describe());
                log::debug!("{}", session.health_status());
                if let Err(e) = summary.save(&status_path) {
                    log::warn!("Could not write {}: {}", status_path.display(), e);
                }
                if deadline.map_or(false, |d| Instant::now() >= d) {
                    println!("[{}] Duration reached, stopping...", ts_now());
                    break;
                }
            }
        }
    }

    session.stop().await;
    let _ = printer.await;

    let summary = session.telemetry().await;
    let final_path = args.output_dir.join(format!("session_{}_final.json", ts_now_clean()));
    summary.save(&final_path)?;
    println!("[{}] Final summary written to {}", ts_now(), final_path.display());

    println!("\n=== Final Stats ===");
    println!("Distance: {:.1} m", summary.distance_m);
    println!("Elevation gain/loss: {:.1} / {:.1} m", summary.elevation_gain_m, summary.elevation_loss_m);
    if let Some(terrain) = summary.terrain {
        println!("Terrain: {} ({:.0}%)", terrain.name(), summary.terrain_confidence * 100.0);
    }
    println!(
        "Sampling: {:?}, est. drain {:.1}%/h",
        summary.sampling_preset, summary.estimated_drain_pct_per_hour
    );

    drop(interval_listener);
    Ok(())
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}

fn ts_now_clean() -> String {
    Utc::now().format("%Y%m%d_%H%M%S").to_string()
}
