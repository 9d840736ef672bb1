use super::{ClipSpec, ClipWriter, SinkSummary, VideoSink};
use crate::error::SinkError;
use crate::frame::FrameData;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// A clip kept in memory by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct MemoryClip {
    pub clip_id: Uuid,
    pub file_stem: String,
    pub fps: u32,
    pub frames: Vec<FrameData>,
}

impl MemoryClip {
    pub fn frame_ids(&self) -> Vec<u64> {
        self.frames.iter().map(|f| f.id).collect()
    }
}

#[derive(Default)]
struct Shared {
    clips: Mutex<Vec<MemoryClip>>,
    aborted: AtomicU64,
}

/// Sink that keeps finished clips in memory.
///
/// Used when no output files are wanted and by tests. Writes can be slowed
/// down or made to fail after a number of frames.
#[derive(Clone, Default)]
pub struct MemorySink {
    shared: Arc<Shared>,
    fail_after: Option<u64>,
    write_delay: Duration,
    finish_delay: Duration,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the write of frame number `n + 1` of every clip
    pub fn fail_after(mut self, frames: u64) -> Self {
        self.fail_after = Some(frames);
        self
    }

    /// Sleep this long in every write
    pub fn write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    /// Sleep this long before a clip is stored by `finish`
    pub fn finish_delay(mut self, delay: Duration) -> Self {
        self.finish_delay = delay;
        self
    }

    /// Finished clips, in completion order
    pub fn clips(&self) -> Vec<MemoryClip> {
        self.shared.clips.lock().clone()
    }

    pub fn clip(&self, clip_id: Uuid) -> Option<MemoryClip> {
        self.shared
            .clips
            .lock()
            .iter()
            .find(|c| c.clip_id == clip_id)
            .cloned()
    }

    /// Writers that were aborted or dropped without finishing
    pub fn aborted_count(&self) -> u64 {
        self.shared.aborted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl VideoSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn open(&self, spec: &ClipSpec) -> Result<Box<dyn ClipWriter>, SinkError> {
        Ok(Box::new(MemoryWriter {
            shared: Arc::clone(&self.shared),
            clip: Some(MemoryClip {
                clip_id: spec.clip_id,
                file_stem: spec.file_stem.clone(),
                fps: spec.fps,
                frames: Vec::with_capacity(spec.expected_frames),
            }),
            bytes_written: 0,
            fail_after: self.fail_after,
            write_delay: self.write_delay,
            finish_delay: self.finish_delay,
        }))
    }
}

struct MemoryWriter {
    shared: Arc<Shared>,
    clip: Option<MemoryClip>,
    bytes_written: u64,
    fail_after: Option<u64>,
    write_delay: Duration,
    finish_delay: Duration,
}

#[async_trait]
impl ClipWriter for MemoryWriter {
    async fn write(&mut self, frame: &FrameData) -> Result<(), SinkError> {
        if !self.write_delay.is_zero() {
            tokio::time::sleep(self.write_delay).await;
        }

        let written = self.frames_written();
        if self.fail_after.is_some_and(|limit| written >= limit) {
            return Err(SinkError::Write {
                sink: "memory".to_string(),
                frame_id: frame.id,
                details: "simulated write failure".to_string(),
            });
        }

        let clip = self.clip.as_mut().ok_or_else(|| SinkError::Write {
            sink: "memory".to_string(),
            frame_id: frame.id,
            details: "writer already closed".to_string(),
        })?;
        clip.frames.push(frame.clone());
        self.bytes_written += frame.data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<SinkSummary, SinkError> {
        if !self.finish_delay.is_zero() {
            tokio::time::sleep(self.finish_delay).await;
        }

        let clip = self.clip.take().ok_or_else(|| SinkError::Finalize {
            sink: "memory".to_string(),
            details: "writer already closed".to_string(),
        })?;

        let summary = SinkSummary {
            path: format!("memory://{}", clip.file_stem).into(),
            frame_count: clip.frames.len() as u64,
            bytes_written: self.bytes_written,
        };
        debug!(
            "Stored clip {} in memory ({} frames)",
            clip.clip_id, summary.frame_count
        );
        self.shared.clips.lock().push(clip);
        Ok(summary)
    }

    async fn abort(self: Box<Self>) {
        // Drop does the bookkeeping
    }

    fn frames_written(&self) -> u64 {
        self.clip.as_ref().map(|c| c.frames.len() as u64).unwrap_or(0)
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if self.clip.is_some() {
            self.shared.aborted.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use std::time::{Instant, SystemTime};

    fn spec() -> ClipSpec {
        ClipSpec {
            clip_id: Uuid::new_v4(),
            file_stem: "event_memory".to_string(),
            directory: "unused".into(),
            fps: 10,
            resolution: (320, 240),
            expected_frames: 4,
        }
    }

    fn frame(id: u64) -> FrameData {
        FrameData::new(
            id,
            Instant::now(),
            SystemTime::now(),
            vec![0u8; 16],
            320,
            240,
            FrameFormat::Mjpeg,
        )
    }

    #[tokio::test]
    async fn test_finish_stores_clip() {
        let sink = MemorySink::new();
        let spec = spec();
        let mut writer = sink.open(&spec).await.unwrap();
        writer.write(&frame(1)).await.unwrap();
        writer.write(&frame(2)).await.unwrap();
        let summary = writer.finish().await.unwrap();

        assert_eq!(summary.frame_count, 2);
        assert_eq!(summary.bytes_written, 32);
        assert_eq!(sink.clip(spec.clip_id).unwrap().frame_ids(), vec![1, 2]);
        assert_eq!(sink.aborted_count(), 0);
    }

    #[tokio::test]
    async fn test_fail_after() {
        let sink = MemorySink::new().fail_after(1);
        let mut writer = sink.open(&spec()).await.unwrap();
        writer.write(&frame(1)).await.unwrap();
        assert!(matches!(
            writer.write(&frame(2)).await,
            Err(SinkError::Write { frame_id: 2, .. })
        ));
        writer.abort().await;

        assert!(sink.clips().is_empty());
        assert_eq!(sink.aborted_count(), 1);
    }
}
