use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::json;

use terrain_tracker::sensors::{Scenario, SyntheticTrack};
use terrain_tracker::types::{BarometerSample, LocationFix, SensorSample};
use terrain_tracker::{TrackerConfig, TrackingSession};

#[derive(Parser, Debug)]
struct Args {
    /// Path to a session_*.json[.gz] recording
    #[arg(long, conflicts_with_all = ["golden_dir", "synthesize"])]
    log: Option<PathBuf>,

    /// Directory of recordings to batch replay (processes *.json[.gz])
    #[arg(long, conflicts_with = "synthesize")]
    golden_dir: Option<PathBuf>,

    /// Write a synthetic recording of this scenario instead of replaying
    #[arg(long, value_enum, requires = "out")]
    synthesize: Option<Scenario>,

    /// Length of the synthetic recording [s]
    #[arg(long, default_value = "180")]
    seconds: f64,

    /// Destination for --synthesize (gzip when it ends in .gz)
    #[arg(long)]
    out: Option<PathBuf>,

    /// JSON config overriding defaults
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Serialize, Deserialize)]
struct Reading {
    timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inertial: Option<SensorSample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<LocationFix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    barometer: Option<BarometerSample>,
}

#[derive(Serialize, Deserialize)]
struct LogFile {
    readings: Vec<Reading>,
}

fn is_gz(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

fn load_log(path: &Path) -> anyhow::Result<LogFile> {
    let file = File::open(path)?;
    if is_gz(path) {
        let gz = GzDecoder::new(file);
        let reader = BufReader::new(gz);
        Ok(serde_json::from_reader(reader)?)
    } else {
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}

fn write_log(path: &Path, log: &LogFile) -> anyhow::Result<()> {
    let file = File::create(path)?;
    if is_gz(path) {
        let mut gz = GzEncoder::new(BufWriter::new(file), Compression::default());
        serde_json::to_writer(&mut gz, log)?;
        gz.finish()?;
    } else {
        serde_json::to_writer(BufWriter::new(file), log)?;
    }
    Ok(())
}

/// 25 Hz inertial, 1 Hz barometer and location
fn synthesize(scenario: Scenario, seconds: f64) -> LogFile {
    let track = SyntheticTrack::new(scenario);
    let steps = (seconds * 25.0) as usize;
    let readings = (0..steps)
        .map(|i| {
            let t = i as f64 / 25.0;
            let whole_second = i % 25 == 0;
            Reading {
                timestamp: t,
                inertial: Some(track.inertial(t)),
                location: whole_second.then(|| track.location(t)),
                barometer: whole_second.then(|| track.barometer(t)),
            }
        })
        .collect();
    LogFile { readings }
}

async fn run_once(path: &Path, config: &TrackerConfig) -> anyhow::Result<serde_json::Value> {
    let log = load_log(path).with_context(|| format!("loading {}", path.display()))?;
    let session = TrackingSession::new(config.clone())?;
    let cycle = config.session.detection_interval_secs;

    let mut next_cycle: Option<f64> = None;
    let mut emitted = 0u64;
    let mut max_confidence: f64 = 0.0;
    let mut sampling_changes = 0u64;
    let mut degenerate = 0u64;

    for r in &log.readings {
        if let Some(sample) = r.inertial {
            session.ingest_inertial(sample).await;
        }
        if let Some(sample) = r.barometer {
            session.ingest_barometer(sample).await;
        }
        if let Some(fix) = r.location {
            let outcome = session.ingest_location(fix).await;
            if outcome.sampling_change.is_some() {
                sampling_changes += 1;
            }
            if outcome.smoother == terrain_tracker::filters::SmootherUpdate::Degenerate {
                degenerate += 1;
            }
        }

        // Detection on recorded time, not wall-clock
        let due = *next_cycle.get_or_insert(r.timestamp + cycle);
        if r.timestamp >= due {
            if let Some(update) = session.run_detection_cycle().await {
                emitted += 1;
                println!(
                    "[t={:.1}s] terrain {} ({:.0}%) factor {:.3}",
                    r.timestamp,
                    update.terrain.name(),
                    update.confidence * 100.0,
                    update.terrain_factor
                );
            }
            if let Some(result) = session.last_classifier_result().await {
                max_confidence = max_confidence.max(result.classification.confidence);
            }
            next_cycle = Some(due + cycle);
        }
    }

    let summary = session.telemetry().await;
    session.stop().await;

    Ok(json!({
        "log": path.display().to_string(),
        "readings": log.readings.len(),
        "terrain_updates": emitted,
        "max_classifier_confidence": max_confidence,
        "sampling_changes": sampling_changes,
        "degenerate_fixes": degenerate,
        "summary": summary,
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    if let Some(scenario) = args.synthesize {
        let out = args.out.context("--out is required with --synthesize")?;
        let log = synthesize(scenario, args.seconds);
        write_log(&out, &log)?;
        println!("Wrote {} readings to {}", log.readings.len(), out.display());
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => TrackerConfig::from_json_file(path)?,
        None => TrackerConfig::default(),
    };

    let paths: Vec<PathBuf> = if let Some(dir) = &args.golden_dir {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(".json") || name.ends_with(".json.gz")
            })
            .collect();
        entries.sort();
        entries
    } else if let Some(log) = &args.log {
        vec![log.clone()]
    } else {
        anyhow::bail!("pass --log, --golden-dir or --synthesize");
    };

    let mut results = Vec::new();
    for path in &paths {
        match run_once(path, &config).await {
            Ok(result) => results.push(result),
            Err(e) => eprintln!("Failed to replay {}: {:#}", path.display(), e),
        }
    }

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}
