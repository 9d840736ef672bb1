//! Video sinks receiving assembled clips.
//!
//! A [`VideoSink`] opens one [`ClipWriter`] per clip. The writer receives
//! frames strictly in capture order and is consumed by either
//! [`ClipWriter::finish`] or [`ClipWriter::abort`]. Writers that are dropped
//! without either must release whatever they hold and leave no partial
//! output behind.

mod frame_log;
mod memory;

#[cfg(all(feature = "video_encoding", target_os = "linux"))]
mod encoder;

pub use frame_log::{FrameLogReader, FrameLogRecord, FrameLogSink, FRAME_LOG_EXTENSION};
pub use memory::{MemoryClip, MemorySink};

#[cfg(all(feature = "video_encoding", target_os = "linux"))]
pub use encoder::GstVideoSink;

use crate::config::ClipConfig;
use crate::error::{EventclipError, Result, SinkError};
use crate::frame::FrameData;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a sink needs to know to open a writer for one clip
#[derive(Debug, Clone)]
pub struct ClipSpec {
    pub clip_id: Uuid,
    /// File name without extension, e.g. `event_20240101_120000_000_person_detected`
    pub file_stem: String,
    pub directory: PathBuf,
    pub fps: u32,
    pub resolution: (u32, u32),
    /// Pre-roll frames plus the post-roll target
    pub expected_frames: usize,
}

impl ClipSpec {
    pub fn path_with_extension(&self, extension: &str) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.file_stem, extension))
    }
}

/// What a writer reports once the clip is finalized
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSummary {
    pub path: PathBuf,
    pub frame_count: u64,
    pub bytes_written: u64,
}

/// Factory for per-clip writers
#[async_trait]
pub trait VideoSink: Send + Sync {
    /// Human-readable name for logging and error messages
    fn name(&self) -> &str;

    async fn open(&self, spec: &ClipSpec) -> std::result::Result<Box<dyn ClipWriter>, SinkError>;
}

/// Writer for a single clip
#[async_trait]
pub trait ClipWriter: Send {
    async fn write(&mut self, frame: &FrameData) -> std::result::Result<(), SinkError>;

    /// Flush and close, producing the finished clip
    async fn finish(self: Box<Self>) -> std::result::Result<SinkSummary, SinkError>;

    /// Discard the clip and release resources
    async fn abort(self: Box<Self>);

    fn frames_written(&self) -> u64;
}

/// Build the sink selected by configuration
pub fn from_config(config: &ClipConfig) -> Result<Arc<dyn VideoSink>> {
    match config.sink.as_str() {
        "frame_log" => Ok(Arc::new(FrameLogSink::new())),
        "memory" => Ok(Arc::new(MemorySink::new())),
        #[cfg(all(feature = "video_encoding", target_os = "linux"))]
        "gstreamer" => Ok(Arc::new(GstVideoSink::new())),
        other => Err(EventclipError::component(
            "sink",
            format!("Unsupported video sink '{}'", other),
        )),
    }
}
