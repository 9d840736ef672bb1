use crate::trigger::TriggerEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Why the post-roll phase ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostRollOutcome {
    /// The full post-roll frame count was written
    Complete,
    /// No more frames arrived before the post-roll deadline
    DeadlineElapsed,
    /// The live feed closed, usually because capture stopped
    FeedClosed,
}

/// A finished clip, as handed to whatever catalogs clips
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipResult {
    pub clip_id: Uuid,
    pub path: PathBuf,
    pub frame_count: u64,
    pub pre_roll_frames: u64,
    pub post_roll_frames: u64,
    pub bytes_written: u64,
    /// `frame_count / fps`
    pub duration: Duration,
    pub fps: u32,
    pub post_roll_outcome: PostRollOutcome,
    pub started_at: DateTime<Utc>,
    pub trigger: TriggerEvent,
}

impl ClipResult {
    /// True when the post-roll ended before reaching its target
    pub fn is_truncated(&self) -> bool {
        self.post_roll_outcome != PostRollOutcome::Complete
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// Clip duration at the nominal frame rate
pub(crate) fn clip_duration(frame_count: u64, fps: u32) -> Duration {
    if fps == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(frame_count as f64 / fps as f64)
}
