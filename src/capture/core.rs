use super::health::{CaptureStats, HealthCheckResult};
use crate::config::CaptureConfig;
use crate::error::{EventclipError, Result, SourceError};
use crate::frame::FrameData;
use crate::ring_buffer::RingBuffer;
use crate::source::FrameSource;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Result of [`CaptureLoop::start`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    Started,
    AlreadyRunning,
}

/// Result of [`CaptureLoop::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    Stopped,
    NotRunning,
}

/// Counters shared between the handle and the producer task
#[derive(Debug, Default)]
struct SharedCounters {
    /// Last assigned frame id; ids keep increasing across restarts
    frame_counter: AtomicU64,
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    /// Wall clock of the newest frame in unix millis, 0 when none yet
    last_frame_unix_ms: AtomicU64,
}

struct RunningTask {
    cancellation_token: CancellationToken,
    handle: JoinHandle<Box<dyn FrameSource>>,
}

struct LoopState {
    /// Parked here while stopped, owned by the producer while running
    source: Option<Box<dyn FrameSource>>,
    running: Option<RunningTask>,
}

/// Single producer pulling frames from a [`FrameSource`] into a
/// [`RingBuffer`].
pub struct CaptureLoop {
    ring_buffer: Arc<RingBuffer>,
    config: CaptureConfig,
    fps: u32,
    state: Mutex<LoopState>,
    is_running: Arc<AtomicBool>,
    counters: Arc<SharedCounters>,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        ring_buffer: Arc<RingBuffer>,
        fps: u32,
        config: CaptureConfig,
    ) -> Self {
        info!(
            "Initializing capture loop for source '{}' at {} fps",
            source.name(),
            fps
        );

        Self {
            ring_buffer,
            config,
            fps: fps.max(1),
            state: Mutex::new(LoopState {
                source: Some(source),
                running: None,
            }),
            is_running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(SharedCounters::default()),
        }
    }

    /// Open the source and start producing frames
    pub async fn start(&self) -> Result<StartStatus> {
        let mut state = self.state.lock().await;
        if state.running.is_some() {
            warn!("Capture loop is already running");
            return Ok(StartStatus::AlreadyRunning);
        }

        let mut source = state.source.take().ok_or_else(|| {
            EventclipError::Source(SourceError::unavailable(
                "capture",
                "frame source was lost when the previous run failed to stop",
            ))
        })?;

        info!("Starting capture loop");
        if let Err(e) = source.open().await {
            error!("Failed to open frame source '{}': {}", source.name(), e);
            state.source = Some(source);
            let unavailable = if matches!(e, SourceError::Unavailable { .. }) {
                e
            } else {
                SourceError::unavailable("capture", e.to_string())
            };
            return Err(unavailable.into());
        }

        self.ring_buffer.open_feed();
        self.counters.consecutive_failures.store(0, Ordering::Relaxed);

        let cancellation_token = CancellationToken::new();
        let producer = Producer {
            ring_buffer: Arc::clone(&self.ring_buffer),
            counters: Arc::clone(&self.counters),
            frame_interval: Duration::from_secs(1) / self.fps,
            retry_backoff: self.config.retry_backoff(),
            max_backoff: self.config.max_backoff(),
            cancellation_token: cancellation_token.clone(),
        };

        let handle = tokio::spawn(producer.run(source));
        state.running = Some(RunningTask {
            cancellation_token,
            handle,
        });
        self.is_running.store(true, Ordering::Relaxed);

        info!("Capture loop started");
        Ok(StartStatus::Started)
    }

    /// Stop producing, release the source and close the live feed
    pub async fn stop(&self) -> Result<StopStatus> {
        let mut state = self.state.lock().await;
        let Some(running) = state.running.take() else {
            debug!("Capture loop is not running");
            return Ok(StopStatus::NotRunning);
        };

        info!("Stopping capture loop");
        running.cancellation_token.cancel();
        self.is_running.store(false, Ordering::Relaxed);

        let mut handle = running.handle;
        match timeout(self.config.stop_timeout(), &mut handle).await {
            Ok(Ok(mut source)) => {
                source.close().await;
                state.source = Some(source);
                info!("Capture task completed");
            }
            Ok(Err(e)) => {
                error!("Capture task failed: {}", e);
            }
            Err(_) => {
                warn!(
                    "Capture task did not complete within {:?}; aborting it",
                    self.config.stop_timeout()
                );
                handle.abort();
            }
        }

        self.ring_buffer.close_feed();
        info!("Capture loop stopped");
        Ok(StopStatus::Stopped)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// Frames captured since creation
    pub fn frame_count(&self) -> u64 {
        self.counters.frames_captured.load(Ordering::Relaxed)
    }

    pub fn ring_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring_buffer)
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn stats(&self) -> CaptureStats {
        let last_frame_ms = self.counters.last_frame_unix_ms.load(Ordering::Relaxed);
        CaptureStats {
            is_running: self.is_running(),
            frames_captured: self.frame_count(),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
            consecutive_failures: self.counters.consecutive_failures.load(Ordering::Relaxed),
            last_frame_at: (last_frame_ms > 0)
                .then(|| UNIX_EPOCH + Duration::from_millis(last_frame_ms)),
            buffered_frames: self.ring_buffer.len(),
            buffer_capacity: self.ring_buffer.capacity(),
        }
    }

    /// Wait for the capture loop to start producing frames
    pub async fn wait_for_frames(&self, timeout_duration: Duration) -> Result<()> {
        info!(
            "Waiting for capture frames (timeout: {:?})",
            timeout_duration
        );

        let result = timeout(timeout_duration, async {
            loop {
                if let Some(frame) = self.ring_buffer.latest() {
                    info!(
                        "First frame received: {} ({}x{})",
                        frame.id, frame.width, frame.height
                    );
                    return;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await;

        result.map_err(|_| EventclipError::system("Timeout waiting for capture frames"))
    }

    /// Perform health check on the capture loop
    pub fn health_check(&self) -> HealthCheckResult {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();
        let stats = self.stats();

        if !stats.is_running {
            issues.push("Capture loop is not running".to_string());
        }

        if stats.consecutive_failures >= self.config.failure_unhealthy_threshold {
            issues.push(format!(
                "{} consecutive frame read failures",
                stats.consecutive_failures
            ));
        } else if stats.consecutive_failures >= self.config.failure_warning_threshold {
            warnings.push(format!(
                "{} consecutive frame read failures",
                stats.consecutive_failures
            ));
        }

        if stats.is_running {
            match stats.last_frame_at {
                Some(last) => {
                    let age = SystemTime::now()
                        .duration_since(last)
                        .unwrap_or(Duration::ZERO);
                    if age >= self.config.stale_frame_warning() {
                        warnings.push(format!("No new frames for {} ms", age.as_millis()));
                    }
                }
                None => warnings.push("No frames captured yet".to_string()),
            }
        }

        if stats.buffered_frames == 0 && stats.frames_captured > 0 {
            warnings.push("Ring buffer is empty".to_string());
        }

        HealthCheckResult::from_findings(issues, warnings)
    }
}

/// The producer task's view of the loop
struct Producer {
    ring_buffer: Arc<RingBuffer>,
    counters: Arc<SharedCounters>,
    frame_interval: Duration,
    retry_backoff: Duration,
    max_backoff: Duration,
    cancellation_token: CancellationToken,
}

impl Producer {
    /// Runs until cancelled, then hands the source back
    async fn run(self, mut source: Box<dyn FrameSource>) -> Box<dyn FrameSource> {
        info!("Capture producer started for source '{}'", source.name());
        let mut backoff = self.retry_backoff;

        loop {
            let read_started = Instant::now();

            let read = tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                read = source.read_frame() => read,
            };

            let wait = match read {
                Ok(frame) => {
                    let id = self.counters.frame_counter.fetch_add(1, Ordering::Relaxed) + 1;
                    let timestamp = frame.timestamp.unwrap_or_else(SystemTime::now);
                    let data_len = frame.data.len();
                    let frame_data = FrameData::new(
                        id,
                        Instant::now(),
                        timestamp,
                        frame.data,
                        frame.width,
                        frame.height,
                        frame.format,
                    );

                    trace!(
                        "Captured frame {} ({}x{}, {} bytes)",
                        id,
                        frame_data.width,
                        frame_data.height,
                        data_len
                    );
                    let unix_ms = timestamp
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_millis() as u64)
                        .unwrap_or(0);
                    self.counters
                        .last_frame_unix_ms
                        .store(unix_ms, Ordering::Relaxed);
                    self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                    self.counters.consecutive_failures.store(0, Ordering::Relaxed);
                    backoff = self.retry_backoff;

                    self.ring_buffer.push(frame_data);

                    // Pace to the target rate; slow sources are not padded
                    self.frame_interval.saturating_sub(read_started.elapsed())
                }
                Err(e) => {
                    self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                    let consecutive = self
                        .counters
                        .consecutive_failures
                        .fetch_add(1, Ordering::Relaxed)
                        + 1;
                    warn!(
                        "Frame read failed ({} in a row), retrying in {:?}: {}",
                        consecutive, backoff, e
                    );
                    let wait = backoff;
                    backoff = (backoff * 2).min(self.max_backoff);
                    wait
                }
            };

            if wait.is_zero() {
                if self.cancellation_token.is_cancelled() {
                    break;
                }
                tokio::task::yield_now().await;
                continue;
            }

            tokio::select! {
                biased;
                _ = self.cancellation_token.cancelled() => break,
                _ = sleep(wait) => {}
            }
        }

        info!("Capture producer stopped for source '{}'", source.name());
        source
    }
}
