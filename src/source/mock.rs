use super::{FrameSource, SourceFrame};
use crate::error::SourceError;
use crate::frame::FrameFormat;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace};

/// Synthetic frame source producing small MJPEG-shaped payloads, or
/// full-size patterned frames for the raw formats.
///
/// Useful for running without hardware and for tests: it can be told to fail
/// specific reads, to refuse to open, or to take a fixed time per read.
pub struct MockFrameSource {
    name: String,
    width: u32,
    height: u32,
    format: FrameFormat,
    read_delay: Duration,
    fail_open: bool,
    failures: VecDeque<bool>,
    fail_every: Option<u64>,
    is_open: bool,
    reads: u64,
}

impl MockFrameSource {
    pub fn builder() -> MockFrameSourceBuilder {
        MockFrameSourceBuilder::new()
    }

    /// Number of read attempts so far, successful or not
    pub fn reads(&self) -> u64 {
        self.reads
    }

    fn payload(&self, sequence: u64) -> Vec<u8> {
        let pattern_byte = (sequence % 256) as u8;
        if let Some(size) = self.format.frame_size(self.width, self.height) {
            return vec![pattern_byte; size];
        }

        let mut data = vec![
            0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01, 0x01, 0x01,
            0x00, 0x48, 0x00, 0x48, 0x00, 0x00,
        ];

        let pattern_size = 1000 + (sequence % 500) as usize;
        data.extend(vec![pattern_byte; pattern_size]);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn open(&mut self) -> Result<(), SourceError> {
        if self.fail_open {
            return Err(SourceError::unavailable(&self.name, "mock device refused to open"));
        }
        self.is_open = true;
        info!(
            "Mock frame source '{}' opened ({}x{} {:?})",
            self.name, self.width, self.height, self.format
        );
        Ok(())
    }

    async fn read_frame(&mut self) -> Result<SourceFrame, SourceError> {
        if !self.is_open {
            return Err(SourceError::Closed {
                source_name: self.name.clone(),
            });
        }

        let sequence = self.reads;
        self.reads += 1;

        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }

        let scripted_failure = self.failures.pop_front().unwrap_or(false);
        let periodic_failure = self
            .fail_every
            .map(|n| n > 0 && (sequence + 1) % n == 0)
            .unwrap_or(false);

        if scripted_failure || periodic_failure {
            debug!("Mock frame source '{}' failing read {}", self.name, sequence);
            return Err(SourceError::transient(&self.name, "simulated read failure"));
        }

        let data = self.payload(sequence);
        trace!(
            "Generated mock {:?} frame {} ({}x{}, {} bytes)",
            self.format,
            sequence,
            self.width,
            self.height,
            data.len()
        );

        Ok(SourceFrame {
            data,
            width: self.width,
            height: self.height,
            format: self.format,
            timestamp: Some(SystemTime::now()),
        })
    }

    async fn close(&mut self) {
        if self.is_open {
            self.is_open = false;
            info!("Mock frame source '{}' closed", self.name);
        }
    }
}

/// Builder for [`MockFrameSource`]
pub struct MockFrameSourceBuilder {
    name: String,
    width: u32,
    height: u32,
    format: FrameFormat,
    read_delay: Duration,
    fail_open: bool,
    failures: VecDeque<bool>,
    fail_every: Option<u64>,
}

impl MockFrameSourceBuilder {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            width: 640,
            height: 480,
            format: FrameFormat::Mjpeg,
            read_delay: Duration::ZERO,
            fail_open: false,
            failures: VecDeque::new(),
            fail_every: None,
        }
    }

    pub fn name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = name.into();
        self
    }

    pub fn resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn format(mut self, format: FrameFormat) -> Self {
        self.format = format;
        self
    }

    /// Time each read takes before returning
    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    /// Make `open` fail with [`SourceError::Unavailable`]
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Script the outcome of the first reads: `true` fails that read
    pub fn script_failures<I: IntoIterator<Item = bool>>(mut self, pattern: I) -> Self {
        self.failures = pattern.into_iter().collect();
        self
    }

    /// Fail every `n`th read
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn build(self) -> MockFrameSource {
        MockFrameSource {
            name: self.name,
            width: self.width,
            height: self.height,
            format: self.format,
            read_delay: self.read_delay,
            fail_open: self.fail_open,
            failures: self.failures,
            fail_every: self.fail_every,
            is_open: false,
            reads: 0,
        }
    }
}

impl Default for MockFrameSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}
