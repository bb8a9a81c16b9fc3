//! Hawkeye match-analysis pipeline
//!
//! Real-time visual analysis for a live camera: frames are acquired
//! continuously, run through an object detector, converted into display
//! coordinates and (optionally) linked across frames into tracked players,
//! ball and referee. Consumers read two independent latest-value feeds: the
//! preview image and the detection/track set.
//!
//! # Architecture
//!
//! The pipeline keeps four guarantees by construction:
//!
//! 1. **Capture never waits**: the blocking detector runs on its own lane;
//!    a busy lane skips frames instead of queueing them.
//! 2. **No backlog**: every feed holds exactly one value; readers see the
//!    newest result or nothing.
//! 3. **One coordinate convention downstream**: detector boxes are converted
//!    from model space to display space before anything else sees them.
//! 4. **Stable identities**: a tracked object keeps its id across noise,
//!    occlusion and short gaps; expired ids are never reused.
//!
//! # Module Structure
//!
//! - `frame`, `geometry`, `normalize`: frame data and coordinate conversion
//! - `ingest`: capture devices and the frame source
//! - `lane`: per-consumer worker threads with drop-when-busy hand-off
//! - `detect`: detector trait, backends, label decoding
//! - `inference`, `preview`: the two lane handlers
//! - `track`: multi-object tracking and team assignment
//! - `hub`: latest-value feeds with change notification
//! - `session`, `authorization`: camera session lifecycle
//! - `config`, `pipeline`: configuration and assembly

pub mod authorization;
pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod hub;
pub mod inference;
pub mod ingest;
pub mod lane;
pub mod normalize;
pub mod pipeline;
pub mod preview;
pub mod session;
pub mod track;

pub use authorization::{AuthorizationProvider, AuthorizationStatus, StaticAuthorization};
pub use config::PipelineConfig;
pub use detect::{Detection, DetectionBatch, Detector, Label, RawDetection, TeamSide};
pub use frame::{DeviceOrientation, Frame, FrameView, Orientation, PixelFormat, Rotation};
pub use geometry::{BoundingBox, Point, Vector};
pub use hub::{DetectionFeed, DistributionHub, Preview, Subscription};
pub use ingest::{CaptureDevice, CaptureSettings, DeviceDescriptor, LensPosition};
pub use pipeline::{Pipeline, PipelineStats};
pub use session::{CameraSessionState, SessionController, SessionError, SessionPhase};
pub use track::{TrackState, TrackedObject, Tracker, TrackerConfig};
