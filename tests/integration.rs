use eventclip::capture::CaptureLoop;
use eventclip::clip::{AssemblerSettings, ClipAssembler, PostRollOutcome};
use eventclip::config::{CaptureConfig, EventclipConfig};
use eventclip::error::ClipError;
use eventclip::frame::{FrameData, FrameFormat};
use eventclip::ring_buffer::{RingBuffer, RingBufferBuilder};
use eventclip::sink::{FrameLogReader, FrameLogSink, MemorySink, VideoSink};
use eventclip::source::MockFrameSource;
use eventclip::trigger::TriggerEvent;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

fn frame(id: u64) -> FrameData {
    static BASE: OnceLock<Instant> = OnceLock::new();
    FrameData::new(
        id,
        *BASE.get_or_init(Instant::now) + Duration::from_millis(id),
        SystemTime::now(),
        vec![(id % 256) as u8; 32],
        640,
        480,
        FrameFormat::Mjpeg,
    )
}

fn settings(output_dir: &Path, fps: u32, post_roll: Duration) -> AssemblerSettings {
    AssemblerSettings {
        fps,
        resolution: (640, 480),
        post_roll,
        post_roll_grace: Duration::from_millis(500),
        output_dir: output_dir.to_path_buf(),
        timezone: chrono_tz::UTC,
        max_concurrent_clips: None,
    }
}

/// Capture loop over a mock source paced at `fps`
fn mock_capture(ring_buffer: &Arc<RingBuffer>, fps: u32) -> CaptureLoop {
    let source = MockFrameSource::builder()
        .read_delay(Duration::from_secs(1) / fps)
        .build();
    CaptureLoop::new(
        Box::new(source),
        Arc::clone(ring_buffer),
        fps,
        CaptureConfig::default(),
    )
}

fn assert_strictly_increasing(ids: &[u64]) {
    assert!(
        ids.windows(2).all(|w| w[0] < w[1]),
        "frame ids out of order: {:?}",
        ids
    );
}

#[tokio::test]
async fn test_fifteen_second_window_at_twenty_fps() {
    let ring_buffer = Arc::new(RingBufferBuilder::new().window(20, 15).build().unwrap());
    assert_eq!(ring_buffer.capacity(), 300);

    for id in 1..=301 {
        ring_buffer.push(frame(id));
    }
    let ids: Vec<u64> = ring_buffer.snapshot().iter().map(|f| f.id).collect();
    assert_eq!(ids, (2..=301).collect::<Vec<_>>());

    let sink = MemorySink::new();
    let assembler = ClipAssembler::new(
        Arc::clone(&ring_buffer),
        Arc::new(sink.clone()),
        settings(Path::new("unused"), 20, Duration::from_secs(15)),
    );

    let task = assembler
        .begin_clip(TriggerEvent::new("speeding_detected"))
        .unwrap();
    for id in 302..=700 {
        ring_buffer.push(frame(id));
    }

    let result = task.wait().await.unwrap();
    assert_eq!(result.pre_roll_frames, 300);
    assert_eq!(result.post_roll_frames, 300);
    assert_eq!(result.frame_count, 600);
    assert_eq!(result.post_roll_outcome, PostRollOutcome::Complete);
    assert!((result.duration_secs() - 30.0).abs() < 1e-6);

    let clip = sink.clip(result.clip_id).unwrap();
    assert_eq!(clip.frame_ids(), (2..=601).collect::<Vec<_>>());
}

#[test]
fn test_concurrent_snapshots_are_gap_free() {
    let ring_buffer = Arc::new(RingBuffer::new(100));

    let producer = {
        let ring_buffer = Arc::clone(&ring_buffer);
        std::thread::spawn(move || {
            for id in 1..=5_000 {
                ring_buffer.push(frame(id));
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let ring_buffer = Arc::clone(&ring_buffer);
            std::thread::spawn(move || {
                for _ in 0..500 {
                    let ids: Vec<u64> = ring_buffer.snapshot().iter().map(|f| f.id).collect();
                    assert!(ids.len() <= 100);
                    assert!(
                        ids.windows(2).all(|w| w[1] == w[0] + 1),
                        "snapshot has a gap or duplicate: {:?}",
                        ids
                    );
                }
            })
        })
        .collect();

    producer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    let ids: Vec<u64> = ring_buffer.snapshot().iter().map(|f| f.id).collect();
    assert_eq!(ids, (4_901..=5_000).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_trigger_with_empty_buffer_records_post_roll_only() {
    let ring_buffer = Arc::new(RingBuffer::new(40));
    let sink = MemorySink::new();
    let assembler = ClipAssembler::new(
        Arc::clone(&ring_buffer),
        Arc::new(sink.clone()),
        settings(Path::new("unused"), 20, Duration::from_millis(500)),
    );
    let capture = mock_capture(&ring_buffer, 20);

    let task = assembler.begin_clip(TriggerEvent::new("startup")).unwrap();
    capture.start().await.unwrap();

    let result = task.wait().await.unwrap();
    capture.stop().await.unwrap();

    assert_eq!(result.pre_roll_frames, 0);
    assert_eq!(result.post_roll_frames, 10);
    assert_eq!(result.frame_count, 10);

    let ids = sink.clip(result.clip_id).unwrap().frame_ids();
    assert_eq!(ids.first(), Some(&1));
    assert_strictly_increasing(&ids);
}

#[tokio::test]
async fn test_back_to_back_triggers_record_independent_clips() {
    let ring_buffer = Arc::new(RingBuffer::new(20));
    let sink = MemorySink::new();
    let assembler = ClipAssembler::new(
        Arc::clone(&ring_buffer),
        Arc::new(sink.clone()),
        settings(Path::new("unused"), 40, Duration::from_millis(500)),
    );
    let capture = mock_capture(&ring_buffer, 40);
    capture.start().await.unwrap();
    capture
        .wait_for_frames(Duration::from_secs(2))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let first = assembler.begin_clip(TriggerEvent::new("person_detected")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let second = assembler.begin_clip(TriggerEvent::new("vehicle_detected")).unwrap();

    let first = first.wait().await.unwrap();
    let second = second.wait().await.unwrap();
    capture.stop().await.unwrap();

    assert_ne!(first.clip_id, second.clip_id);
    for result in [&first, &second] {
        assert_eq!(result.post_roll_frames, 20);
        let ids = sink.clip(result.clip_id).unwrap().frame_ids();
        assert_eq!(ids.len() as u64, result.frame_count);
        assert_strictly_increasing(&ids);
    }

    let first_ids = sink.clip(first.clip_id).unwrap().frame_ids();
    let second_ids = sink.clip(second.clip_id).unwrap().frame_ids();
    assert!(second_ids[0] >= first_ids[0]);
}

#[tokio::test]
async fn test_stopping_capture_mid_post_roll_truncates_clip() {
    let temp_dir = TempDir::new().unwrap();
    let ring_buffer = Arc::new(RingBuffer::new(20));
    let sink: Arc<dyn VideoSink> = Arc::new(FrameLogSink::new());
    let assembler = ClipAssembler::new(
        Arc::clone(&ring_buffer),
        sink,
        settings(temp_dir.path(), 20, Duration::from_secs(10)),
    );
    let capture = mock_capture(&ring_buffer, 20);
    capture.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let task = assembler.begin_clip(TriggerEvent::new("accident_detected")).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let started = Instant::now();
    capture.stop().await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), task.wait())
        .await
        .expect("clip should finalize once the feed closes")
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(result.post_roll_outcome, PostRollOutcome::FeedClosed);
    assert!(result.is_truncated());
    assert!(result.post_roll_frames < 200);
    assert!(result.path.exists());

    let mut reader = FrameLogReader::open(&result.path).await.unwrap();
    assert_eq!(reader.clip_id(), result.clip_id);
    assert_eq!(reader.frame_count() as u64, result.frame_count);
    let records = reader.read_all().await.unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    assert_eq!(ids.len() as u64, result.frame_count);
    assert_strictly_increasing(&ids);
}

#[tokio::test]
async fn test_duration_matches_frames_over_fps() {
    let ring_buffer = Arc::new(RingBuffer::new(25));
    let sink = MemorySink::new();
    let assembler = ClipAssembler::new(
        Arc::clone(&ring_buffer),
        Arc::new(sink),
        settings(Path::new("unused"), 25, Duration::from_millis(400)),
    );
    let capture = mock_capture(&ring_buffer, 25);
    capture.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let result = assembler.assemble(TriggerEvent::new("doorbell")).await.unwrap();
    capture.stop().await.unwrap();

    assert_eq!(result.frame_count, result.pre_roll_frames + result.post_roll_frames);
    assert_eq!(result.post_roll_frames, 10);
    let expected = result.frame_count as f64 / 25.0;
    assert!((result.duration_secs() - expected).abs() < 1e-3);
}

#[tokio::test]
async fn test_concurrency_cap_rejects_extra_triggers() {
    let ring_buffer = Arc::new(RingBuffer::new(10));
    let mut clip_settings = settings(Path::new("unused"), 10, Duration::from_secs(5));
    clip_settings.max_concurrent_clips = Some(1);
    let assembler = ClipAssembler::new(
        Arc::clone(&ring_buffer),
        Arc::new(MemorySink::new()),
        clip_settings,
    );

    let running = assembler.begin_clip(TriggerEvent::new("first")).unwrap();
    let err = assembler.begin_clip(TriggerEvent::new("second")).unwrap_err();
    assert!(matches!(err, ClipError::AssemblyBusy { active: 1, limit: 1 }));

    running.cancel();
    assert!(matches!(running.wait().await, Err(ClipError::Cancelled { .. })));
    assert!(assembler.wait_for_idle(Duration::from_secs(1)).await);
    assert!(assembler.begin_clip(TriggerEvent::new("third")).is_ok());
    assembler.cancel_all();
}

#[tokio::test]
async fn test_sink_failure_does_not_stop_capture() {
    let ring_buffer = Arc::new(RingBuffer::new(20));
    let assembler = ClipAssembler::new(
        Arc::clone(&ring_buffer),
        Arc::new(MemorySink::new().fail_after(3)),
        settings(Path::new("unused"), 20, Duration::from_millis(500)),
    );
    let capture = mock_capture(&ring_buffer, 20);
    capture.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = assembler
        .assemble(TriggerEvent::new("doomed"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClipError::Sink { .. }));

    let before = capture.frame_count();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(capture.is_running());
    assert!(capture.frame_count() > before);
    capture.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancelled_clip_leaves_no_file() {
    let temp_dir = TempDir::new().unwrap();
    let ring_buffer = Arc::new(RingBuffer::new(20));
    let assembler = ClipAssembler::new(
        Arc::clone(&ring_buffer),
        Arc::new(FrameLogSink::new()),
        settings(temp_dir.path(), 20, Duration::from_secs(30)),
    );
    for id in 1..=20 {
        ring_buffer.push(frame(id));
    }

    let task = assembler.begin_clip(TriggerEvent::new("shutdown")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    task.cancel();
    assert!(matches!(task.wait().await, Err(ClipError::Cancelled { .. })));

    let leftovers: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
    assert!(leftovers.is_empty(), "partial output left behind: {:?}", leftovers);
}

#[test]
fn test_default_config_matches_window() {
    let config = EventclipConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.source.fps, 20);
    assert_eq!(config.buffer.pre_roll_seconds, 15);
    assert_eq!(config.buffer.post_roll_seconds, 15);
    assert_eq!(config.ring_buffer_capacity(), 300);
}
