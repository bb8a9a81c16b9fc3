//! hawkeye_replay - end-to-end synthetic run of the match-analysis pipeline
//!
//! Drives the synthetic camera and detector for a fixed time, then writes the
//! last detection feed and the pipeline counters as JSON.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::json;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hawkeye_pipeline::config::AuthorizationMode;
use hawkeye_pipeline::detect::DetectorRegistry;
use hawkeye_pipeline::{DeviceOrientation, Pipeline, PipelineConfig, StaticAuthorization};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Duration of the run in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Capture rate of the synthetic camera.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Synthetic device to capture from (stub://back or stub://front).
    #[arg(long, default_value = "stub://back")]
    device: String,
    /// Detector to run.
    #[arg(long, default_value = "synthetic")]
    detector: String,
    /// Device orientation applied for the whole run.
    #[arg(long, value_parser = parse_orientation, default_value = "portrait")]
    orientation: DeviceOrientation,
    /// Disable tracking (detections only).
    #[arg(long)]
    no_tracking: bool,
    /// Write JSON here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }
    if !args.device.starts_with("stub://") {
        return Err(anyhow!("replay only drives synthetic devices (stub://...)"));
    }

    let mut config = PipelineConfig::defaults();
    config.capture.device = args.device.clone();
    config.capture.width = 320;
    config.capture.height = 180;
    config.capture.target_fps = args.fps;
    config.inference.detector = args.detector.clone();
    config.tracking.enabled = !args.no_tracking;
    config.authorization = AuthorizationMode::Granted;

    stage("build pipeline");
    let detector = DetectorRegistry::with_builtin().create(&config.inference.detector)?;
    let pipeline = Pipeline::new(&config, detector, Arc::new(StaticAuthorization::granted()))?;
    pipeline.set_orientation(args.orientation);

    stage("run");
    pipeline.start().context("start synthetic session")?;
    let deadline = Instant::now() + Duration::from_secs(args.seconds);
    let mut feeds = pipeline.hub().subscribe_detections();
    let mut feeds_seen = 0u64;
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if feeds.next_timeout(remaining.min(Duration::from_millis(250))).is_some() {
            feeds_seen += 1;
        }
    }
    pipeline.stop();
    pipeline.wait_idle(Duration::from_secs(1));

    stage("report");
    let report = json!({
        "config": config,
        "feeds_observed": feeds_seen,
        "latest": pipeline.hub().latest_detections().as_deref(),
        "stats": pipeline.stats(),
    });
    let text = serde_json::to_string_pretty(&report)?;
    match args.out {
        Some(path) => {
            fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
            stage(&format!("wrote {}", path.display()));
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn stage(msg: &str) {
    eprintln!("hawkeye_replay: {}", msg);
}

fn parse_orientation(value: &str) -> Result<DeviceOrientation> {
    match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
        "portrait" => Ok(DeviceOrientation::Portrait),
        "portrait_upside_down" | "upside_down" => Ok(DeviceOrientation::PortraitUpsideDown),
        "landscape_left" => Ok(DeviceOrientation::LandscapeLeft),
        "landscape_right" => Ok(DeviceOrientation::LandscapeRight),
        "face_up" => Ok(DeviceOrientation::FaceUp),
        "face_down" => Ok(DeviceOrientation::FaceDown),
        other => Err(anyhow!("unknown orientation {:?}", other)),
    }
}
