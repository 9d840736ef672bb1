use super::{ClipSpec, ClipWriter, SinkSummary, VideoSink};
use crate::error::SinkError;
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSrc;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const SINK_NAME: &str = "gstreamer";
const EOS_TIMEOUT_SECS: u64 = 30;

/// Encodes MJPEG clips to H.264 MP4 through a GStreamer pipeline
#[derive(Debug, Default)]
pub struct GstVideoSink;

impl GstVideoSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoSink for GstVideoSink {
    fn name(&self) -> &str {
        SINK_NAME
    }

    async fn open(&self, spec: &ClipSpec) -> Result<Box<dyn ClipWriter>, SinkError> {
        let final_path = spec.path_with_extension("mp4");
        let part_path = final_path.with_extension("mp4.part");
        let open_error = |details: String| SinkError::Open {
            sink: SINK_NAME.to_string(),
            path: final_path.display().to_string(),
            details,
        };

        tokio::fs::create_dir_all(&spec.directory)
            .await
            .map_err(|e| open_error(format!("Failed to create clip directory: {}", e)))?;

        gstreamer::init().map_err(|e| open_error(format!("Failed to initialize GStreamer: {}", e)))?;

        let pipeline_desc = format!(
            "appsrc name=src format=time is-live=false caps=image/jpeg,framerate={}/1 ! \
             jpegparse ! \
             jpegdec ! \
             videoconvert ! video/x-raw,format=I420 ! \
             x264enc speed-preset=medium bitrate=10000 key-int-max=60 ! \
             video/x-h264,stream-format=byte-stream,alignment=au,profile=high ! \
             h264parse config-interval=1 ! \
             mp4mux faststart=true ! \
             filesink location={}",
            spec.fps.max(1),
            part_path.to_string_lossy()
        );
        debug!("Clip {} pipeline: {}", spec.clip_id, pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| open_error(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| open_error("Failed to downcast to Pipeline".to_string()))?;

        let appsrc = pipeline
            .by_name("src")
            .ok_or_else(|| open_error("Failed to get appsrc element".to_string()))?
            .downcast::<AppSrc>()
            .map_err(|_| open_error("Failed to downcast to AppSrc".to_string()))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| open_error(format!("Failed to start pipeline: {}", e)))?;

        info!(
            "Started encoding pipeline for clip {} at {}",
            spec.clip_id,
            final_path.display()
        );

        Ok(Box::new(GstClipWriter {
            pipeline,
            appsrc,
            frame_duration_ns: 1_000_000_000 / spec.fps.max(1) as u64,
            frames_written: 0,
            bytes_pushed: 0,
            part_path,
            final_path,
            finished: false,
        }))
    }
}

struct GstClipWriter {
    pipeline: Pipeline,
    appsrc: AppSrc,
    frame_duration_ns: u64,
    frames_written: u64,
    bytes_pushed: u64,
    part_path: PathBuf,
    final_path: PathBuf,
    finished: bool,
}

impl GstClipWriter {
    fn finalize_error(details: String) -> SinkError {
        SinkError::Finalize {
            sink: SINK_NAME.to_string(),
            details,
        }
    }

    fn stop_pipeline(&self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop encoding pipeline: {}", e);
        }
    }
}

#[async_trait]
impl ClipWriter for GstClipWriter {
    async fn write(&mut self, frame: &FrameData) -> Result<(), SinkError> {
        let write_error = |details: String| SinkError::Write {
            sink: SINK_NAME.to_string(),
            frame_id: frame.id,
            details,
        };

        if frame.format != FrameFormat::Mjpeg {
            return Err(write_error(format!(
                "Unsupported frame format {:?}, expected MJPEG",
                frame.format
            )));
        }

        // Timestamps follow the nominal rate so duration matches frames / fps
        let mut buffer = gstreamer::Buffer::from_mut_slice(frame.data.as_ref().clone());
        {
            let buffer_ref = buffer.make_mut();
            buffer_ref.set_pts(gstreamer::ClockTime::from_nseconds(
                self.frames_written * self.frame_duration_ns,
            ));
            buffer_ref.set_duration(gstreamer::ClockTime::from_nseconds(self.frame_duration_ns));
        }

        self.appsrc
            .push_buffer(buffer)
            .map_err(|e| write_error(format!("Failed to push buffer: {:?}", e)))?;

        self.frames_written += 1;
        self.bytes_pushed += frame.data.len() as u64;
        if self.frames_written % 30 == 0 {
            debug!("Encoded {} frames", self.frames_written);
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<SinkSummary, SinkError> {
        self.appsrc
            .end_of_stream()
            .map_err(|e| Self::finalize_error(format!("Failed to signal EOS: {:?}", e)))?;

        let pipeline = self.pipeline.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let bus = pipeline
                .bus()
                .ok_or_else(|| "Pipeline has no bus".to_string())?;
            for msg in bus.iter_timed(gstreamer::ClockTime::from_seconds(EOS_TIMEOUT_SECS)) {
                match msg.view() {
                    gstreamer::MessageView::Eos(..) => return Ok(()),
                    gstreamer::MessageView::Error(err) => {
                        return Err(format!(
                            "Video encoding error: {} ({})",
                            err.error(),
                            err.debug().unwrap_or_default()
                        ))
                    }
                    _ => {}
                }
            }
            Err("Timed out waiting for end of stream".to_string())
        })
        .await
        .map_err(|e| Self::finalize_error(format!("Encoder task failed: {}", e)))?;

        self.stop_pipeline();
        outcome.map_err(Self::finalize_error)?;

        tokio::fs::rename(&self.part_path, &self.final_path)
            .await
            .map_err(|e| Self::finalize_error(format!("Failed to move clip into place: {}", e)))?;
        self.finished = true;

        let bytes_written = tokio::fs::metadata(&self.final_path)
            .await
            .map(|m| m.len())
            .unwrap_or(self.bytes_pushed);

        info!(
            "Video encoding completed: {} ({} frames)",
            self.final_path.display(),
            self.frames_written
        );

        Ok(SinkSummary {
            path: self.final_path.clone(),
            frame_count: self.frames_written,
            bytes_written,
        })
    }

    async fn abort(mut self: Box<Self>) {
        self.stop_pipeline();
        if let Err(e) = tokio::fs::remove_file(&self.part_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove partial clip {}: {}",
                    self.part_path.display(),
                    e
                );
            }
        }
        self.finished = true;
    }

    fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl Drop for GstClipWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.stop_pipeline();
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}
