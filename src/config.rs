use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::ingest::{self, CaptureSettings};
use crate::track::TrackerConfig;

const FALLBACK_DEVICE: &str = "stub://back";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_DETECTOR: &str = "synthetic";
const DEFAULT_MIN_CONFIDENCE: f32 = 0.25;
const DEFAULT_MAX_DISPLACEMENT: f32 = 0.1;
const DEFAULT_MAX_MISSED_BATCHES: u32 = 5;
const DEFAULT_STALE_AFTER_MS: u64 = 2_000;
const DEFAULT_PREVIEW_MAX_WIDTH: u32 = 960;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    capture: Option<CaptureConfigFile>,
    inference: Option<InferenceConfigFile>,
    tracking: Option<TrackingConfigFile>,
    preview: Option<PreviewConfigFile>,
    authorization: Option<AuthorizationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct InferenceConfigFile {
    detector: Option<String>,
    min_confidence: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    enabled: Option<bool>,
    max_displacement: Option<f32>,
    max_missed_batches: Option<u32>,
    stale_after_ms: Option<u64>,
    home_on_left: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct PreviewConfigFile {
    max_width: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct AuthorizationConfigFile {
    mode: Option<String>,
}

/// How the daemon decides whether it may use the camera.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationMode {
    /// Check the device node's permissions.
    Device,
    Granted,
    Denied,
    /// Not determined until requested; the request is granted.
    Prompt,
}

impl FromStr for AuthorizationMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "device" => Ok(AuthorizationMode::Device),
            "granted" => Ok(AuthorizationMode::Granted),
            "denied" => Ok(AuthorizationMode::Denied),
            "prompt" => Ok(AuthorizationMode::Prompt),
            other => Err(anyhow!(
                "unknown authorization mode {:?} (expected device, granted, denied or prompt)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    pub capture: CaptureConfig,
    pub inference: InferenceConfig,
    pub tracking: TrackingConfig,
    pub preview: PreviewConfig,
    pub authorization: AuthorizationMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InferenceConfig {
    pub detector: String,
    pub min_confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackingConfig {
    pub enabled: bool,
    pub max_displacement: f32,
    pub max_missed_batches: u32,
    pub stale_after: Duration,
    pub home_on_left: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PreviewConfig {
    /// Zero disables downscaling.
    pub max_width: u32,
}

impl PipelineConfig {
    /// File at `$HAWKEYE_CONFIG` (if set), then defaults, then env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HAWKEYE_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty());
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Same layering as `load`, with an explicit file path.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Built-in defaults, no file and no environment.
    pub fn defaults() -> Self {
        let file = PipelineConfigFile::default();
        Self {
            capture: capture_from(file.capture),
            inference: InferenceConfig {
                detector: DEFAULT_DETECTOR.to_string(),
                min_confidence: DEFAULT_MIN_CONFIDENCE,
            },
            tracking: tracking_from(file.tracking),
            preview: PreviewConfig {
                max_width: DEFAULT_PREVIEW_MAX_WIDTH,
            },
            authorization: AuthorizationMode::Device,
        }
    }

    fn from_file(file: PipelineConfigFile) -> Result<Self> {
        let capture = capture_from(file.capture);
        let inference = InferenceConfig {
            detector: file
                .inference
                .as_ref()
                .and_then(|inf| inf.detector.clone())
                .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
            min_confidence: file
                .inference
                .as_ref()
                .and_then(|inf| inf.min_confidence)
                .unwrap_or(DEFAULT_MIN_CONFIDENCE),
        };
        let tracking = tracking_from(file.tracking);
        let preview = PreviewConfig {
            max_width: file
                .preview
                .and_then(|p| p.max_width)
                .unwrap_or(DEFAULT_PREVIEW_MAX_WIDTH),
        };
        let authorization = match file.authorization.and_then(|a| a.mode) {
            Some(mode) => mode.parse()?,
            None => AuthorizationMode::Device,
        };
        Ok(Self {
            capture,
            inference,
            tracking,
            preview,
            authorization,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(device) = std::env::var("HAWKEYE_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = device.trim().to_string();
            }
        }
        if let Ok(fps) = std::env::var("HAWKEYE_TARGET_FPS") {
            self.capture.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("HAWKEYE_TARGET_FPS must be an integer"))?;
        }
        if let Ok(confidence) = std::env::var("HAWKEYE_MIN_CONFIDENCE") {
            self.inference.min_confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("HAWKEYE_MIN_CONFIDENCE must be a number"))?;
        }
        if let Ok(tracking) = std::env::var("HAWKEYE_TRACKING") {
            self.tracking.enabled = parse_bool(&tracking)
                .ok_or_else(|| anyhow!("HAWKEYE_TRACKING must be true/false"))?;
        }
        if let Ok(stale) = std::env::var("HAWKEYE_STALE_AFTER_MS") {
            let ms: u64 = stale
                .trim()
                .parse()
                .map_err(|_| anyhow!("HAWKEYE_STALE_AFTER_MS must be an integer number of milliseconds"))?;
            self.tracking.stale_after = Duration::from_millis(ms);
        }
        if let Ok(mode) = std::env::var("HAWKEYE_AUTHORIZATION") {
            if !mode.trim().is_empty() {
                self.authorization = mode.parse()?;
            }
        }
        if let Ok(detector) = std::env::var("HAWKEYE_DETECTOR") {
            if !detector.trim().is_empty() {
                self.inference.detector = detector.trim().to_string();
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("capture width and height must be greater than zero"));
        }
        if self.capture.target_fps == 0 {
            return Err(anyhow!("capture target_fps must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.inference.min_confidence) {
            return Err(anyhow!("inference min_confidence must be within [0, 1]"));
        }
        let d = self.tracking.max_displacement;
        if !(d > 0.0 && d <= 1.0) {
            return Err(anyhow!("tracking max_displacement must be within (0, 1]"));
        }
        if self.tracking.stale_after.is_zero() {
            return Err(anyhow!("tracking stale_after_ms must be greater than zero"));
        }
        Ok(())
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            width: self.capture.width,
            height: self.capture.height,
            target_fps: self.capture.target_fps,
        }
    }

    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            max_displacement: self.tracking.max_displacement,
            max_missed_batches: self.tracking.max_missed_batches,
            stale_after: self.tracking.stale_after,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

fn capture_from(file: Option<CaptureConfigFile>) -> CaptureConfig {
    let file = file.unwrap_or_default();
    CaptureConfig {
        device: file.device.unwrap_or_else(default_selector),
        width: file.width.unwrap_or(DEFAULT_WIDTH),
        height: file.height.unwrap_or(DEFAULT_HEIGHT),
        target_fps: file.target_fps.unwrap_or(DEFAULT_TARGET_FPS),
    }
}

fn tracking_from(file: Option<TrackingConfigFile>) -> TrackingConfig {
    let file = file.unwrap_or_default();
    TrackingConfig {
        enabled: file.enabled.unwrap_or(true),
        max_displacement: file.max_displacement.unwrap_or(DEFAULT_MAX_DISPLACEMENT),
        max_missed_batches: file.max_missed_batches.unwrap_or(DEFAULT_MAX_MISSED_BATCHES),
        stale_after: Duration::from_millis(file.stale_after_ms.unwrap_or(DEFAULT_STALE_AFTER_MS)),
        home_on_left: file.home_on_left.unwrap_or(true),
    }
}

fn default_selector() -> String {
    let devices = ingest::available_devices();
    ingest::default_device(&devices)
        .map(|d| d.selector.clone())
        .unwrap_or_else(|| FALLBACK_DEVICE.to_string())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
