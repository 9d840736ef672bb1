use super::core::CaptureLoop;
use crate::config::{CaptureConfig, EventclipConfig};
use crate::error::{EventclipError, Result};
use crate::ring_buffer::RingBuffer;
use crate::source::{self, FrameSource};
use std::sync::Arc;

/// Builder for [`CaptureLoop`]
pub struct CaptureLoopBuilder {
    source: Option<Box<dyn FrameSource>>,
    ring_buffer: Option<Arc<RingBuffer>>,
    fps: u32,
    config: CaptureConfig,
}

impl CaptureLoopBuilder {
    pub fn new() -> Self {
        Self {
            source: None,
            ring_buffer: None,
            fps: 20,
            config: CaptureConfig::default(),
        }
    }

    pub fn source(mut self, source: Box<dyn FrameSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn ring_buffer(mut self, ring_buffer: Arc<RingBuffer>) -> Self {
        self.ring_buffer = Some(ring_buffer);
        self
    }

    pub fn fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    pub fn config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<CaptureLoop> {
        let source = self
            .source
            .ok_or_else(|| EventclipError::system("Frame source must be specified"))?;
        let ring_buffer = self
            .ring_buffer
            .ok_or_else(|| EventclipError::system("Ring buffer must be specified"))?;

        if self.fps == 0 {
            return Err(EventclipError::system("Capture fps must be greater than 0"));
        }

        Ok(CaptureLoop::new(source, ring_buffer, self.fps, self.config))
    }
}

impl Default for CaptureLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureLoop {
    /// Build a capture loop with the source named in configuration
    pub fn from_config(config: &EventclipConfig, ring_buffer: Arc<RingBuffer>) -> Result<Self> {
        CaptureLoopBuilder::new()
            .source(source::from_config(&config.source)?)
            .ring_buffer(ring_buffer)
            .fps(config.source.fps)
            .config(config.capture.clone())
            .build()
    }
}
