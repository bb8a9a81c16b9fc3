//! Multi-object tracking.
//!
//! Detections only describe one frame. The tracker links them across frames
//! into `TrackedObject`s with stable ids, trajectories and velocities, and
//! retires objects that stop being seen. Team sides are layered on top by a
//! `TeamAssigner`.

mod team;
mod tracker;

pub use team::{PitchHalfAssigner, TeamAssigner};
pub use tracker::{
    TrackSnapshot, TrackState, TrackUpdate, TrackedObject, Tracker, TrackerConfig,
    TrajectoryPoint,
};
