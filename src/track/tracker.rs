use std::time::Duration;

use serde::Serialize;

use super::team::TeamAssigner;
use crate::detect::{Detection, Label, TeamSide};
use crate::geometry::{BoundingBox, Point, Vector};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Largest centre movement (display units) still treated as the same object.
    pub max_displacement: f32,
    /// Consecutive missed batches tolerated before a stale track expires.
    pub max_missed_batches: u32,
    /// Time since last sighting after which a track expires.
    pub stale_after: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_displacement: 0.1,
            max_missed_batches: 5,
            stale_after: Duration::from_secs(2),
        }
    }
}

/// Lifecycle of a live track. Expired tracks are removed, so there is no
/// `Expired` variant to observe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    New,
    Active,
    Stale,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct TrajectoryPoint {
    pub position: Point,
    pub timestamp: Duration,
}

#[derive(Clone, Debug)]
pub struct TrackedObject {
    id: u64,
    label: Label,
    team: Option<TeamSide>,
    state: TrackState,
    bbox: BoundingBox,
    confidence: f32,
    trajectory: Vec<TrajectoryPoint>,
    /// Running sum of trajectory positions, kept in f64 so long tracks do not drift.
    position_sum: (f64, f64),
    missed: u32,
}

impl TrackedObject {
    fn spawn(id: u64, detection: &Detection, timestamp: Duration) -> Self {
        let center = detection.bbox.center();
        Self {
            id,
            label: detection.label,
            team: None,
            state: TrackState::New,
            bbox: detection.bbox,
            confidence: detection.confidence,
            trajectory: vec![TrajectoryPoint {
                position: center,
                timestamp,
            }],
            position_sum: (center.x as f64, center.y as f64),
            missed: 0,
        }
    }

    fn observe(&mut self, detection: &Detection, timestamp: Duration) {
        self.bbox = detection.bbox;
        self.confidence = detection.confidence;
        let center = detection.bbox.center();
        self.trajectory.push(TrajectoryPoint {
            position: center,
            timestamp,
        });
        self.position_sum.0 += center.x as f64;
        self.position_sum.1 += center.y as f64;
        self.missed = 0;
        self.state = TrackState::Active;
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> Label {
        self.label
    }

    pub fn team(&self) -> Option<TeamSide> {
        self.team
    }

    pub fn state(&self) -> TrackState {
        self.state
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Confidence of the latest matched detection.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn trajectory(&self) -> &[TrajectoryPoint] {
        &self.trajectory
    }

    /// Last known centre.
    pub fn position(&self) -> Point {
        self.trajectory
            .last()
            .map(|p| p.position)
            .unwrap_or_else(|| self.bbox.center())
    }

    /// Mean centre over the whole trajectory, in constant time.
    pub fn mean_position(&self) -> Point {
        let n = self.trajectory.len().max(1) as f64;
        Point {
            x: (self.position_sum.0 / n) as f32,
            y: (self.position_sum.1 / n) as f32,
        }
    }

    pub fn last_seen(&self) -> Duration {
        self.trajectory
            .last()
            .map(|p| p.timestamp)
            .unwrap_or_default()
    }

    /// Displacement between the last two sightings per second.
    pub fn velocity(&self) -> Vector {
        match self.trajectory.as_slice() {
            [.., a, b] => Vector::between(
                &a.position,
                &b.position,
                b.timestamp.saturating_sub(a.timestamp).as_secs_f32(),
            ),
            _ => Vector::ZERO,
        }
    }

    /// First-to-last displacement per second.
    pub fn average_velocity(&self) -> Vector {
        match (self.trajectory.first(), self.trajectory.last()) {
            (Some(a), Some(b)) if self.trajectory.len() > 1 => Vector::between(
                &a.position,
                &b.position,
                b.timestamp.saturating_sub(a.timestamp).as_secs_f32(),
            ),
            _ => Vector::ZERO,
        }
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            id: self.id,
            label: self.label,
            team: self.team,
            state: self.state,
            bbox: self.bbox,
            position: self.position(),
            velocity: self.velocity(),
            average_velocity: self.average_velocity(),
            last_seen: self.last_seen(),
            trajectory_len: self.trajectory.len(),
        }
    }
}

/// Serializable copy of a track, published with each detection feed.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackSnapshot {
    pub id: u64,
    pub label: Label,
    pub team: Option<TeamSide>,
    pub state: TrackState,
    pub bbox: BoundingBox,
    pub position: Point,
    pub velocity: Vector,
    pub average_velocity: Vector,
    pub last_seen: Duration,
    pub trajectory_len: usize,
}

/// What one `update` did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrackUpdate {
    /// Track id for each input detection, in input order.
    pub assignments: Vec<u64>,
    pub matched: Vec<u64>,
    pub spawned: Vec<u64>,
    pub went_stale: Vec<u64>,
    pub expired: Vec<u64>,
}

/// Correlates detection batches into persistent tracks.
///
/// The tracker is the only writer of its tracks. Ids start at 1 and are
/// never reused, even after a track expires.
pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<TrackedObject>,
    next_id: u64,
    assigner: Option<Box<dyn TeamAssigner>>,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            assigner: None,
        }
    }

    pub fn with_team_assigner(mut self, assigner: Box<dyn TeamAssigner>) -> Self {
        self.assigner = Some(assigner);
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Fold one batch (display space) into the track set.
    pub fn update(&mut self, detections: &[Detection], timestamp: Duration) -> TrackUpdate {
        let mut report = TrackUpdate {
            assignments: vec![0; detections.len()],
            ..TrackUpdate::default()
        };

        // Candidate pairs within range, same label.
        let mut pairs = Vec::new();
        for (ti, track) in self.tracks.iter().enumerate() {
            let from = track.position();
            for (di, det) in detections.iter().enumerate() {
                if det.label != track.label {
                    continue;
                }
                let distance = from.distance_to(&det.bbox.center());
                if distance <= self.config.max_displacement {
                    pairs.push((distance, det.confidence, ti, di));
                }
            }
        }
        pairs.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then(b.1.total_cmp(&a.1))
                .then(a.2.cmp(&b.2))
                .then(a.3.cmp(&b.3))
        });

        let mut track_taken = vec![false; self.tracks.len()];
        let mut det_taken = vec![false; detections.len()];
        for (_, _, ti, di) in pairs {
            if track_taken[ti] || det_taken[di] {
                continue;
            }
            track_taken[ti] = true;
            det_taken[di] = true;
            let track = &mut self.tracks[ti];
            track.observe(&detections[di], timestamp);
            report.assignments[di] = track.id;
            report.matched.push(track.id);
        }

        // Existing tracks nobody claimed.
        for (ti, track) in self.tracks.iter_mut().enumerate() {
            if track_taken[ti] {
                continue;
            }
            track.missed += 1;
            if track.state != TrackState::Stale {
                track.state = TrackState::Stale;
                report.went_stale.push(track.id);
            }
        }

        let config = self.config;
        self.tracks.retain(|track| {
            let expired = track.state == TrackState::Stale
                && (track.missed > config.max_missed_batches
                    || timestamp.saturating_sub(track.last_seen()) > config.stale_after);
            if expired {
                report.expired.push(track.id);
            }
            !expired
        });

        for (di, det) in detections.iter().enumerate() {
            if det_taken[di] {
                continue;
            }
            let id = self.next_id;
            self.next_id += 1;
            self.tracks.push(TrackedObject::spawn(id, det, timestamp));
            report.assignments[di] = id;
            report.spawned.push(id);
        }

        if let Some(assigner) = self.assigner.as_ref() {
            for track in self.tracks.iter_mut() {
                track.team = assigner.assign(track);
            }
        }

        log::debug!(
            "Tracker: {} matched, {} spawned, {} stale, {} expired, {} live",
            report.matched.len(),
            report.spawned.len(),
            report.went_stale.len(),
            report.expired.len(),
            self.tracks.len()
        );
        report
    }

    pub fn get(&self, id: u64) -> Option<&TrackedObject> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackedObject> {
        self.tracks.iter()
    }

    pub fn snapshots(&self) -> Vec<TrackSnapshot> {
        self.tracks.iter().map(TrackedObject::snapshot).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drop every live track. Ids keep counting up.
    pub fn clear(&mut self) {
        self.tracks.clear();
    }
}
