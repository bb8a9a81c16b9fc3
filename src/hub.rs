//! Latest-value distribution to consumers.
//!
//! Two independent feeds, preview and detections, each a single slot. A
//! publish replaces the previous value; reading clones an `Arc` and never
//! removes anything. Consumers that want to be told about changes hold a
//! `Subscription` and wait for a version newer than the last one they saw.
//! Nobody ever receives a backlog.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use image::RgbImage;
use serde::Serialize;

use crate::detect::DetectionBatch;
use crate::frame::Orientation;
use crate::track::TrackSnapshot;

// ----------------------------------------------------------------------------
// Feed payloads
// ----------------------------------------------------------------------------

/// Decoded preview image for one frame.
#[derive(Clone, Debug)]
pub struct Preview {
    pub timestamp: Duration,
    pub sequence: u64,
    pub orientation: Orientation,
    pub image: RgbImage,
}

/// Detections (and live tracks, when tracking is on) for one processed frame.
#[derive(Clone, Debug, Default, Serialize)]
pub struct DetectionFeed {
    #[serde(flatten)]
    pub batch: DetectionBatch,
    pub tracks: Vec<TrackSnapshot>,
}

impl DetectionFeed {
    pub fn timestamp(&self) -> Duration {
        self.batch.timestamp
    }
}

// ----------------------------------------------------------------------------
// Single-value slot
// ----------------------------------------------------------------------------

/// One value plus a version counter. The lock is held for a pointer swap or
/// clone only.
pub struct LatestSlot<T> {
    value: Mutex<Option<Arc<T>>>,
    version: AtomicU64,
    changed: Condvar,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            version: AtomicU64::new(0),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<T>>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the value. Returns the new version.
    pub fn publish(&self, value: Arc<T>) -> u64 {
        self.publish_if(value, |_| true).unwrap_or(0)
    }

    /// Replace the value if `accept` approves of the current one.
    pub fn publish_if<F>(&self, value: Arc<T>, accept: F) -> Option<u64>
    where
        F: FnOnce(Option<&T>) -> bool,
    {
        let mut slot = self.lock();
        if !accept(slot.as_deref()) {
            return None;
        }
        *slot = Some(value);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        drop(slot);
        self.changed.notify_all();
        Some(version)
    }

    pub fn latest(&self) -> Option<Arc<T>> {
        self.lock().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Block until the version exceeds `seen` or the timeout elapses.
    fn wait_newer(&self, seen: u64, timeout: Duration) -> Option<(u64, Arc<T>)> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.lock();
        loop {
            let version = self.version.load(Ordering::Acquire);
            if version > seen {
                return slot.clone().map(|value| (version, value));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            slot = match self.changed.wait_timeout(slot, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Change notification for one feed.
pub struct Subscription<T> {
    slot: Arc<LatestSlot<T>>,
    seen: u64,
}

impl<T> Subscription<T> {
    fn new(slot: Arc<LatestSlot<T>>) -> Self {
        Self { slot, seen: 0 }
    }

    /// Newest value if it changed since the last call, without blocking.
    pub fn try_next(&mut self) -> Option<Arc<T>> {
        self.next_timeout(Duration::ZERO)
    }

    /// Wait for a value newer than the last one returned. Intermediate
    /// values published meanwhile are skipped.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Arc<T>> {
        let (version, value) = self.slot.wait_newer(self.seen, timeout)?;
        self.seen = version;
        Some(value)
    }

    pub fn seen_version(&self) -> u64 {
        self.seen
    }
}

// ----------------------------------------------------------------------------
// Hub
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// Older than the feed already published.
    Stale,
    /// The caller's admission check failed.
    Refused,
}

#[derive(Default)]
pub struct DistributionHub {
    preview: Arc<LatestSlot<Preview>>,
    detections: Arc<LatestSlot<DetectionFeed>>,
    stale_rejected: AtomicU64,
}

impl DistributionHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_preview(&self, preview: Preview) {
        self.preview.publish(Arc::new(preview));
    }

    /// Publish a preview only if `admit` still holds when the slot is locked.
    pub fn publish_preview_if<F>(&self, preview: Preview, admit: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        self.preview
            .publish_if(Arc::new(preview), |_| admit())
            .is_some()
    }

    /// Publish a detection feed. Feeds older than the current one are
    /// rejected so readers never step backwards in time.
    pub fn publish_detections(&self, feed: DetectionFeed) -> bool {
        self.publish_detections_if(feed, || true) == PublishOutcome::Published
    }

    /// Publish only if `admit` still holds when the slot is locked.
    pub fn publish_detections_if<F>(&self, feed: DetectionFeed, admit: F) -> PublishOutcome
    where
        F: FnOnce() -> bool,
    {
        let timestamp = feed.timestamp();
        let mut outcome = PublishOutcome::Refused;
        self.detections.publish_if(Arc::new(feed), |current| {
            if !admit() {
                return false;
            }
            if current.is_some_and(|c| c.timestamp() > timestamp) {
                outcome = PublishOutcome::Stale;
                return false;
            }
            outcome = PublishOutcome::Published;
            true
        });
        if outcome == PublishOutcome::Stale {
            self.stale_rejected.fetch_add(1, Ordering::Relaxed);
            log::debug!("DistributionHub: rejected detection feed at {:?}", timestamp);
        }
        outcome
    }

    pub fn latest_preview(&self) -> Option<Arc<Preview>> {
        self.preview.latest()
    }

    pub fn latest_detections(&self) -> Option<Arc<DetectionFeed>> {
        self.detections.latest()
    }

    pub fn subscribe_preview(&self) -> Subscription<Preview> {
        Subscription::new(Arc::clone(&self.preview))
    }

    pub fn subscribe_detections(&self) -> Subscription<DetectionFeed> {
        Subscription::new(Arc::clone(&self.detections))
    }

    pub fn stale_rejected(&self) -> u64 {
        self.stale_rejected.load(Ordering::Relaxed)
    }
}
