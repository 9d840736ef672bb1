use super::*;
use crate::config::CaptureConfig;
use crate::error::{EventclipError, SourceError};
use crate::ring_buffer::RingBuffer;
use crate::frame::FrameFormat;
use crate::source::{FrameSource, MockFrameSource, SourceFrame};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

fn test_capture_config() -> CaptureConfig {
    CaptureConfig {
        retry_backoff_ms: 5,
        max_backoff_ms: 20,
        stop_timeout_ms: 1000,
        ..CaptureConfig::default()
    }
}

fn capture_loop(source: MockFrameSource, fps: u32) -> (CaptureLoop, Arc<RingBuffer>) {
    let ring_buffer = Arc::new(RingBuffer::new(100));
    let capture = CaptureLoopBuilder::new()
        .source(Box::new(source))
        .ring_buffer(Arc::clone(&ring_buffer))
        .fps(fps)
        .config(test_capture_config())
        .build()
        .unwrap();
    (capture, ring_buffer)
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() {
    let source = MockFrameSource::builder()
        .read_delay(Duration::from_millis(5))
        .build();
    let (capture, ring_buffer) = capture_loop(source, 50);

    assert_eq!(capture.stop().await.unwrap(), StopStatus::NotRunning);
    assert_eq!(capture.start().await.unwrap(), StartStatus::Started);
    assert_eq!(capture.start().await.unwrap(), StartStatus::AlreadyRunning);
    assert!(capture.is_running());

    capture
        .wait_for_frames(Duration::from_secs(2))
        .await
        .unwrap();
    assert!(capture.frame_count() > 0);

    assert_eq!(capture.stop().await.unwrap(), StopStatus::Stopped);
    assert_eq!(capture.stop().await.unwrap(), StopStatus::NotRunning);
    assert!(!capture.is_running());
    assert!(!ring_buffer.is_feed_open());
}

#[tokio::test]
async fn test_restart_keeps_ids_increasing() {
    let source = MockFrameSource::builder()
        .read_delay(Duration::from_millis(2))
        .build();
    let (capture, ring_buffer) = capture_loop(source, 100);

    capture.start().await.unwrap();
    capture.wait_for_frames(Duration::from_secs(2)).await.unwrap();
    capture.stop().await.unwrap();
    let before = ring_buffer.latest().unwrap().id;

    assert_eq!(capture.start().await.unwrap(), StartStatus::Started);
    assert!(ring_buffer.is_feed_open());
    tokio::time::sleep(Duration::from_millis(100)).await;
    capture.stop().await.unwrap();

    let after = ring_buffer.latest().unwrap().id;
    assert!(after > before);
    assert_eq!(ring_buffer.stats().frames_rejected, 0);
}

#[tokio::test]
async fn test_open_failure_prevents_start() {
    let source = MockFrameSource::builder().fail_open().build();
    let (capture, _ring_buffer) = capture_loop(source, 20);

    let err = capture.start().await.unwrap_err();
    assert!(matches!(
        err,
        EventclipError::Source(SourceError::Unavailable { .. })
    ));
    assert!(!capture.is_running());
    assert_eq!(capture.stop().await.unwrap(), StopStatus::NotRunning);
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let source = MockFrameSource::builder()
        .read_delay(Duration::from_millis(1))
        .script_failures([true, true, true])
        .build();
    let (capture, _ring_buffer) = capture_loop(source, 100);

    capture.start().await.unwrap();
    capture.wait_for_frames(Duration::from_secs(2)).await.unwrap();
    capture.stop().await.unwrap();

    let stats = capture.stats();
    assert_eq!(stats.read_failures, 3);
    assert_eq!(stats.consecutive_failures, 0);
    assert!(stats.frames_captured > 0);
    assert!(stats.last_frame_at.is_some());
}

#[tokio::test]
async fn test_pacing_does_not_outrun_fps() {
    let source = MockFrameSource::builder().build();
    let (capture, _ring_buffer) = capture_loop(source, 20);

    capture.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    capture.stop().await.unwrap();

    // 300 ms at 20 fps is about 6 frames
    let frames = capture.frame_count();
    assert!(frames >= 1 && frames <= 10, "captured {} frames", frames);
}

#[tokio::test]
async fn test_health_check() {
    let source = MockFrameSource::builder()
        .read_delay(Duration::from_millis(2))
        .build();
    let (capture, _ring_buffer) = capture_loop(source, 100);

    assert_eq!(capture.health_check().status, HealthStatus::Unhealthy);

    capture.start().await.unwrap();
    capture.wait_for_frames(Duration::from_secs(2)).await.unwrap();
    let health = capture.health_check();
    assert_eq!(health.status, HealthStatus::Healthy, "{:?}", health);

    capture.stop().await.unwrap();
    let health = capture.health_check();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert!(health.issues.iter().any(|i| i.contains("not running")));
}

#[tokio::test]
async fn test_health_warns_on_repeated_failures() {
    let source = MockFrameSource::builder().fail_every(1).build();
    let ring_buffer = Arc::new(RingBuffer::new(10));
    let capture = CaptureLoopBuilder::new()
        .source(Box::new(source))
        .ring_buffer(ring_buffer)
        .fps(20)
        .config(CaptureConfig {
            failure_warning_threshold: 2,
            failure_unhealthy_threshold: 10_000,
            ..test_capture_config()
        })
        .build()
        .unwrap();

    capture.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let health = capture.health_check();
    capture.stop().await.unwrap();

    assert_eq!(health.status, HealthStatus::Warning);
    assert!(health
        .warnings
        .iter()
        .any(|w| w.contains("consecutive frame read failures")));
    assert_eq!(capture.frame_count(), 0);
}

#[test]
fn test_builder_requires_source() {
    let result = CaptureLoopBuilder::new()
        .ring_buffer(Arc::new(RingBuffer::new(10)))
        .build();

    if let Err(EventclipError::System { message }) = result {
        assert!(message.contains("Frame source must be specified"));
    } else {
        panic!("Expected system error for missing source");
    }
}

/// Source whose reads block the worker thread without ever yielding
struct StuckSource {
    block_for: Duration,
}

#[async_trait]
impl FrameSource for StuckSource {
    fn name(&self) -> &str {
        "stuck"
    }

    async fn open(&mut self) -> std::result::Result<(), SourceError> {
        Ok(())
    }

    async fn read_frame(&mut self) -> std::result::Result<SourceFrame, SourceError> {
        std::thread::sleep(self.block_for);
        Ok(SourceFrame {
            data: vec![0xFF, 0xD8, 0xFF, 0xD9],
            width: 640,
            height: 480,
            format: FrameFormat::Mjpeg,
            timestamp: Some(SystemTime::now()),
        })
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_timeout_loses_stuck_source() {
    let ring_buffer = Arc::new(RingBuffer::new(10));
    let capture = CaptureLoop::new(
        Box::new(StuckSource {
            block_for: Duration::from_secs(1),
        }),
        Arc::clone(&ring_buffer),
        10,
        CaptureConfig {
            stop_timeout_ms: 100,
            ..test_capture_config()
        },
    );

    capture.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    assert_eq!(capture.stop().await.unwrap(), StopStatus::Stopped);
    assert!(started.elapsed() < Duration::from_millis(600));
    assert!(!capture.is_running());
    assert!(!ring_buffer.is_feed_open());

    let err = capture.start().await.unwrap_err();
    assert!(matches!(
        err,
        EventclipError::Source(SourceError::Unavailable { .. })
    ));
    assert!(!capture.is_running());
}
