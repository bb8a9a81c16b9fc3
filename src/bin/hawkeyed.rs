//! hawkeyed - live match-analysis daemon
//!
//! This daemon:
//! 1. Loads configuration (--config / HAWKEYE_CONFIG file, then env overrides)
//! 2. Creates the configured detector and authorization provider
//! 3. Starts the camera session and the preview/inference lanes
//! 4. Logs pipeline health every few seconds
//! 5. Stops the session cleanly on Ctrl-C

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, RecvTimeoutError};
use std::path::PathBuf;
use std::time::Duration;

use hawkeye_pipeline::detect::DetectorRegistry;
use hawkeye_pipeline::ingest;
use hawkeye_pipeline::{Pipeline, PipelineConfig, SessionError};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (.toml or .json).
    #[arg(long, env = "HAWKEYE_CONFIG")]
    config: Option<PathBuf>,
    /// Print the capture devices this build can use and exit.
    #[arg(long)]
    list_devices: bool,
    /// Print the built-in detector names and exit.
    #[arg(long)]
    list_detectors: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.list_devices {
        for device in ingest::available_devices() {
            println!("{}\t{:?}", device.selector, device.position);
        }
        return Ok(());
    }
    if args.list_detectors {
        let registry = DetectorRegistry::with_builtin();
        let mut names = registry.list();
        names.sort();
        for name in names {
            println!("{}", name);
        }
        return Ok(());
    }

    let config = PipelineConfig::load_from(args.config.as_deref())?;
    log::info!(
        "hawkeyed {} device={} {}x{}@{} detector={}",
        env!("CARGO_PKG_VERSION"),
        config.capture.device,
        config.capture.width,
        config.capture.height,
        config.capture.target_fps,
        config.inference.detector
    );

    let pipeline = Pipeline::from_config(&config)?;
    match pipeline.start() {
        Ok(()) => {}
        Err(SessionError::AuthorizationDenied) => {
            return Err(anyhow!(
                "camera access denied for {}; grant access and restart",
                config.capture.device
            ));
        }
        Err(err) => return Err(err).context("start camera session"),
    }

    let (tx, rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    log::info!("hawkeyed running; Ctrl-C to stop");
    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let stats = pipeline.stats();
                log::info!(
                    "health phase={:?} frames={} capture_errors={} inference={}/{} failed={} discarded={}",
                    stats.session.phase,
                    stats.source.frames_captured,
                    stats.source.capture_errors,
                    stats.inference.completed,
                    stats.source.inference.offered,
                    stats.inference.failed,
                    stats.inference.discarded
                );
                if let Some(feed) = pipeline.hub().latest_detections() {
                    log::debug!(
                        "latest feed seq={} detections={} tracks={}",
                        feed.batch.sequence,
                        feed.batch.len(),
                        feed.tracks.len()
                    );
                }
            }
        }
    }

    log::info!("shutdown signal received, stopping session...");
    pipeline.stop();
    let stats = pipeline.stats();
    log::info!(
        "hawkeyed stopped after {} frames ({} published detection feeds)",
        stats.source.frames_captured,
        stats.inference.published
    );
    Ok(())
}
