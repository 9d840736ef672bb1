use super::{FrameSource, SourceFrame};
use crate::config::SourceConfig;
use crate::error::{EventclipError, Result, SourceError};
use crate::frame::FrameFormat;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use gstreamer_video::{VideoFormat, VideoInfo};
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// How long a single read waits for the pipeline before reporting a transient failure
const PULL_TIMEOUT_MS: u64 = 500;

/// V4L2 camera read through a GStreamer `appsink`
pub struct GstFrameSource {
    config: SourceConfig,
    format: FrameFormat,
    name: String,
    pipeline: Option<Pipeline>,
    appsink: Option<AppSink>,
}

impl GstFrameSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let format = FrameFormat::from_fourcc(&config.format).ok_or_else(|| {
            EventclipError::component(
                "source",
                format!("Unsupported capture format '{}'", config.format),
            )
        })?;
        let name = format!("v4l2:/dev/video{}", config.device_index);
        Ok(Self {
            config,
            format,
            name,
            pipeline: None,
            appsink: None,
        })
    }

    /// Caps media type for the configured capture format
    fn media_caps(&self) -> String {
        match self.format {
            FrameFormat::Mjpeg => "image/jpeg".to_string(),
            FrameFormat::Yuyv => format!("video/x-raw,format={}", VideoFormat::Yuy2.to_str()),
            FrameFormat::Rgb24 => format!("video/x-raw,format={}", VideoFormat::Rgb.to_str()),
        }
    }

    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device=/dev/video{} io-mode=mmap do-timestamp=true ! \
             {},width={},height={},framerate={}/1 ! \
             queue max-size-buffers=4 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=4 drop=true emit-signals=false",
            self.config.device_index,
            self.media_caps(),
            width,
            height,
            self.config.fps
        )
    }

    /// Frame dimensions from the sample caps, falling back to configuration
    fn frame_dimensions(&self, caps: Option<&gstreamer::CapsRef>) -> (u32, u32) {
        let Some(caps) = caps else {
            return self.config.resolution;
        };

        if self.format.is_compressed() {
            caps.structure(0)
                .and_then(|s| Some((s.get::<i32>("width").ok()?, s.get::<i32>("height").ok()?)))
                .map(|(w, h)| (w as u32, h as u32))
                .unwrap_or(self.config.resolution)
        } else {
            match VideoInfo::from_caps(caps) {
                Ok(info) => (info.width(), info.height()),
                Err(e) => {
                    warn!("Unreadable raw video caps on {}: {}", self.name, e);
                    self.config.resolution
                }
            }
        }
    }

    fn unavailable(&self, details: String) -> SourceError {
        SourceError::unavailable(&self.name, details)
    }
}

#[async_trait]
impl FrameSource for GstFrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> std::result::Result<(), SourceError> {
        gstreamer::init().map_err(|e| self.unavailable(format!("Failed to initialize GStreamer: {}", e)))?;

        let pipeline_desc = self.build_pipeline_string();
        info!("Creating GStreamer capture pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| self.unavailable(format!("Failed to create pipeline: {}", e)))?
            .downcast::<Pipeline>()
            .map_err(|_| self.unavailable("Failed to downcast to Pipeline".to_string()))?;

        let appsink = pipeline
            .by_name("sink")
            .ok_or_else(|| self.unavailable("Failed to get appsink element".to_string()))?
            .downcast::<AppSink>()
            .map_err(|_| self.unavailable("Failed to downcast to AppSink".to_string()))?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| self.unavailable(format!("Failed to start pipeline: {}", e)))?;

        info!("GStreamer capture pipeline started for {}", self.name);
        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    async fn read_frame(&mut self) -> std::result::Result<SourceFrame, SourceError> {
        let appsink = self.appsink.clone().ok_or_else(|| SourceError::Closed {
            source_name: self.name.clone(),
        })?;

        let sample = tokio::task::spawn_blocking(move || {
            appsink.try_pull_sample(gstreamer::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
        })
        .await
        .map_err(|e| SourceError::transient(&self.name, format!("Pull task failed: {}", e)))?
        .ok_or_else(|| SourceError::transient(&self.name, "No sample within pull timeout"))?;

        let buffer = sample
            .buffer()
            .ok_or_else(|| SourceError::transient(&self.name, "No buffer in sample"))?;

        let (width, height) = self.frame_dimensions(sample.caps());

        let map = buffer
            .map_readable()
            .map_err(|e| SourceError::transient(&self.name, format!("Failed to map buffer: {}", e)))?;

        if let Some(expected) = self.format.frame_size(width, height) {
            if map.len() < expected {
                return Err(SourceError::transient(
                    &self.name,
                    format!("Short {:?} frame: {} of {} bytes", self.format, map.len(), expected),
                ));
            }
        }

        trace!(
            "Captured {:?} frame ({}x{}, {} bytes)",
            self.format,
            width,
            height,
            map.len()
        );

        Ok(SourceFrame {
            data: map.as_slice().to_vec(),
            width,
            height,
            format: self.format,
            timestamp: Some(SystemTime::now()),
        })
    }

    async fn close(&mut self) {
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop GStreamer capture pipeline: {}", e);
            } else {
                debug!("GStreamer capture pipeline stopped");
            }
        }
    }
}
