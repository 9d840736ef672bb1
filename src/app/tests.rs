use super::*;
use crate::config::EventclipConfig;
use crate::error::ClipError;
use crate::sink::MemorySink;
use crate::source::MockFrameSource;
use std::sync::Arc;
use std::time::Duration;

fn create_test_config() -> EventclipConfig {
    let mut config = EventclipConfig::default();
    config.source.fps = 50;
    config.buffer.pre_roll_seconds = 1;
    config.buffer.post_roll_seconds = 1;
    config.buffer.post_roll_grace_ms = 500;
    config.clip.sink = "memory".to_string();
    config.clip.timestamp_timezone = "UTC".to_string();
    config
}

fn create_orchestrator(sink: MemorySink) -> EventclipOrchestrator {
    let source = MockFrameSource::builder()
        .read_delay(Duration::from_millis(20))
        .build();
    EventclipOrchestrator::with_components(create_test_config(), Box::new(source), Arc::new(sink))
        .unwrap()
}

#[tokio::test]
async fn test_orchestrator_creation() {
    let orchestrator = create_orchestrator(MemorySink::new());
    assert_eq!(orchestrator.ring_buffer().capacity(), 50);
    assert!(!orchestrator.capture().is_running());
    assert_eq!(orchestrator.session().in_flight(), 0);
}

#[tokio::test]
async fn test_component_states_through_lifecycle() {
    let mut orchestrator = create_orchestrator(MemorySink::new());

    orchestrator.initialize().await.unwrap();
    assert_eq!(
        orchestrator.get_component_state("capture").await,
        Some(ComponentState::Stopped)
    );

    orchestrator.start().await.unwrap();
    assert_eq!(
        orchestrator.get_component_state("capture").await,
        Some(ComponentState::Running)
    );
    assert_eq!(
        orchestrator.get_component_state("assembler").await,
        Some(ComponentState::Running)
    );

    orchestrator.shutdown().await.unwrap();
    let states = orchestrator.get_all_component_states().await;
    assert_eq!(states.get("capture"), Some(&ComponentState::Stopped));
    assert_eq!(states.get("assembler"), Some(&ComponentState::Stopped));
}

#[tokio::test]
async fn test_trigger_saves_clip_and_summary() {
    let sink = MemorySink::new();
    let mut orchestrator = create_orchestrator(sink.clone());
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let clip_id = orchestrator.trigger("doorbell").unwrap();
    tokio::time::sleep(Duration::from_millis(1300)).await;

    let summary = orchestrator.shutdown().await.unwrap();
    assert_eq!(summary.events_triggered, 1);
    assert_eq!(summary.clips_saved, 1);
    assert_eq!(summary.clips_failed, 0);
    assert_eq!(summary.saved_paths.len(), 1);

    let clip = sink.clip(clip_id).unwrap();
    assert!(clip.file_stem.contains("doorbell"));
    assert_eq!(summary.frames_written, clip.frames.len() as u64);

    let ids = clip.frame_ids();
    assert!(ids.len() > 10);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_shutdown_cancels_clips_that_do_not_drain() {
    let sink = MemorySink::new().write_delay(Duration::from_secs(5));
    let mut orchestrator = create_orchestrator(sink.clone());
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    orchestrator.trigger("slow").unwrap();

    let summary = orchestrator
        .shutdown_with_timeout(Duration::from_millis(200))
        .await
        .unwrap();

    assert_eq!(summary.clips_saved, 0);
    assert_eq!(summary.clips_failed, 1);
    assert!(sink.clips().is_empty());
    assert_eq!(sink.aborted_count(), 1);
    assert_eq!(orchestrator.assembler().active_clips(), 0);
}

#[tokio::test]
async fn test_trigger_after_shutdown_is_rejected() {
    let mut orchestrator = create_orchestrator(MemorySink::new());
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();
    orchestrator.shutdown().await.unwrap();

    let err = orchestrator.trigger("late").unwrap_err();
    assert!(matches!(err, ClipError::SourceUnavailable { .. }));

    let summary = orchestrator.session().summary();
    assert_eq!(summary.events_triggered, 1);
    assert_eq!(summary.clips_rejected, 1);
}

#[tokio::test]
async fn test_start_fails_when_source_cannot_open() {
    let source = MockFrameSource::builder().fail_open().build();
    let mut orchestrator = EventclipOrchestrator::with_components(
        create_test_config(),
        Box::new(source),
        Arc::new(MemorySink::new()),
    )
    .unwrap();
    orchestrator.initialize().await.unwrap();

    assert!(orchestrator.start().await.is_err());
    assert_eq!(
        orchestrator.get_component_state("capture").await,
        Some(ComponentState::Failed)
    );
}

#[tokio::test]
async fn test_shutdown_token_ends_auto_run() {
    let sink = MemorySink::new();
    let mut orchestrator = create_orchestrator(sink.clone());
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    let token = orchestrator.shutdown_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    let summary = orchestrator
        .run(RunMode::Auto {
            duration: Duration::from_secs(60),
        })
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(summary.events_triggered, 0);
    assert!(!orchestrator.capture().is_running());
    assert_eq!(
        orchestrator.get_component_state("capture").await,
        Some(ComponentState::Stopped)
    );
}

#[tokio::test]
async fn test_bare_trigger_uses_first_configured_label() {
    let sink = MemorySink::new();
    let mut config = create_test_config();
    config.trigger.labels = vec!["porch".to_string(), "garage".to_string()];
    let source = MockFrameSource::builder()
        .read_delay(Duration::from_millis(20))
        .build();
    let mut orchestrator =
        EventclipOrchestrator::with_components(config, Box::new(source), Arc::new(sink.clone()))
            .unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator.start().await.unwrap();

    assert!(orchestrator.execute(Command::Trigger(None)).await.is_none());
    assert!(orchestrator
        .execute(Command::Trigger(Some("side gate".to_string())))
        .await
        .is_none());
    tokio::time::sleep(Duration::from_millis(1300)).await;

    let summary = orchestrator.shutdown().await.unwrap();
    assert_eq!(summary.clips_saved, 2);

    let stems: Vec<String> = sink.clips().into_iter().map(|c| c.file_stem).collect();
    assert!(stems.iter().any(|s| s.contains("porch")));
    assert!(stems.iter().any(|s| s.contains("side")));
    assert!(!stems.iter().any(|s| s.contains("garage")));
}
