use super::naming::{clip_file_stem, resolve_timezone};
use super::result::{clip_duration, ClipResult, PostRollOutcome};
use super::task::{ClipState, ClipTask, StateTracker};
use crate::config::EventclipConfig;
use crate::error::{ClipError, Result, SinkError};
use crate::frame::FrameData;
use crate::ring_buffer::{FrameSubscription, LiveView, RingBuffer};
use crate::sink::{self, ClipSpec, ClipWriter, VideoSink};
use crate::trigger::TriggerEvent;
use chrono::Utc;
use chrono_tz::Tz;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Clip assembly parameters
#[derive(Debug, Clone)]
pub struct AssemblerSettings {
    pub fps: u32,
    pub resolution: (u32, u32),
    pub post_roll: Duration,
    pub post_roll_grace: Duration,
    pub output_dir: PathBuf,
    pub timezone: Tz,
    /// `None` means unlimited
    pub max_concurrent_clips: Option<usize>,
}

impl AssemblerSettings {
    pub fn from_config(config: &EventclipConfig) -> Self {
        Self {
            fps: config.source.fps,
            resolution: config.source.resolution,
            post_roll: Duration::from_secs(config.buffer.post_roll_seconds as u64),
            post_roll_grace: config.buffer.post_roll_grace(),
            output_dir: PathBuf::from(&config.clip.path),
            timezone: resolve_timezone(&config.clip.timestamp_timezone),
            max_concurrent_clips: config.clip.max_concurrent_clips,
        }
    }

    /// Live frames each clip records after its trigger
    pub fn post_roll_target_frames(&self) -> u64 {
        (self.post_roll.as_secs_f64() * self.fps as f64).round() as u64
    }
}

#[derive(Debug, Default)]
struct AssemblerCounters {
    started: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicU64,
    rejected_busy: AtomicU64,
    rejected_unavailable: AtomicU64,
}

/// Point-in-time assembler statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipAssemblerStats {
    pub active: usize,
    pub started: u64,
    pub completed: u64,
    pub aborted: u64,
    pub rejected_busy: u64,
    pub rejected_unavailable: u64,
}

/// Turns triggers into clips.
///
/// Each clip runs as its own task with its own snapshot, live subscription
/// and sink writer, so clips never wait on each other or on the capture
/// loop.
pub struct ClipAssembler {
    ring_buffer: Arc<RingBuffer>,
    sink: Arc<dyn VideoSink>,
    settings: AssemblerSettings,
    /// Runtime clip tasks are spawned on, so triggers may come from any thread
    runtime: Option<Handle>,
    limiter: Option<Arc<Semaphore>>,
    active: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
    counters: Arc<AssemblerCounters>,
}

impl ClipAssembler {
    pub fn new(
        ring_buffer: Arc<RingBuffer>,
        sink: Arc<dyn VideoSink>,
        settings: AssemblerSettings,
    ) -> Self {
        let limiter = settings
            .max_concurrent_clips
            .map(|limit| Arc::new(Semaphore::new(limit)));

        info!(
            "Clip assembler ready: sink '{}', {} post-roll frames at {} fps, concurrency {}",
            sink.name(),
            settings.post_roll_target_frames(),
            settings.fps,
            settings
                .max_concurrent_clips
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unlimited".to_string())
        );

        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("Clip assembler created outside an async runtime; triggers must come from one");
        }

        Self {
            ring_buffer,
            sink,
            settings,
            runtime,
            limiter,
            active: Arc::new(Mutex::new(HashMap::new())),
            counters: Arc::new(AssemblerCounters::default()),
        }
    }

    /// Build an assembler with the sink named in configuration
    pub fn from_config(config: &EventclipConfig, ring_buffer: Arc<RingBuffer>) -> Result<Self> {
        let sink = sink::from_config(&config.clip)?;
        Ok(Self::new(
            ring_buffer,
            sink,
            AssemblerSettings::from_config(config),
        ))
    }

    /// Start assembling a clip for `trigger`.
    ///
    /// The pre-roll snapshot is taken before this returns, so the clip covers
    /// the window as it was at trigger time. May be called from any thread;
    /// the clip runs on the runtime the assembler was created in.
    pub fn begin_clip(&self, trigger: TriggerEvent) -> std::result::Result<ClipTask, ClipError> {
        let runtime = match self.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                error!(
                    "Rejecting trigger '{}': no async runtime to run the clip on",
                    trigger.id
                );
                return Err(ClipError::NoRuntime {
                    trigger_id: trigger.id,
                });
            }
        };

        let permit = self.acquire_slot()?;

        let LiveView {
            pre_roll,
            subscription,
        } = match self.ring_buffer.snapshot_and_subscribe() {
            Some(view) => view,
            None => {
                self.counters
                    .rejected_unavailable
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Rejecting trigger '{}': live frame feed is closed",
                    trigger.id
                );
                return Err(ClipError::SourceUnavailable {
                    trigger_id: trigger.id,
                });
            }
        };

        let clip_id = Uuid::new_v4();
        let started_at = Utc::now();
        let file_stem = clip_file_stem(&trigger, started_at, &self.settings.timezone, clip_id);
        let post_roll_target = self.settings.post_roll_target_frames();

        let spec = ClipSpec {
            clip_id,
            file_stem,
            directory: self.settings.output_dir.clone(),
            fps: self.settings.fps,
            resolution: self.settings.resolution,
            expected_frames: pre_roll.len() + post_roll_target as usize,
        };

        info!(
            "Starting clip {} for trigger '{}' ({}) with {} pre-roll frames",
            clip_id,
            trigger.id,
            trigger.label,
            pre_roll.len()
        );

        let cancellation_token = CancellationToken::new();
        let (tracker, state) = StateTracker::new(clip_id);
        let job = ClipJob {
            spec,
            trigger: trigger.clone(),
            started_at,
            pre_roll,
            subscription,
            post_roll_target,
            deadline: self.settings.post_roll + self.settings.post_roll_grace,
            sink: Arc::clone(&self.sink),
            tracker,
            cancellation_token: cancellation_token.clone(),
        };

        // Registered under the same lock as the spawn, so the task's own
        // removal can never run first
        let mut registry = self.active.lock();
        let active = Arc::clone(&self.active);
        let counters = Arc::clone(&self.counters);
        let handle = runtime.spawn(async move {
            let result = job.run().await;

            active.lock().remove(&clip_id);
            match &result {
                Ok(_) => counters.completed.fetch_add(1, Ordering::Relaxed),
                Err(_) => counters.aborted.fetch_add(1, Ordering::Relaxed),
            };
            drop(permit);

            result
        });
        registry.insert(clip_id, cancellation_token.clone());
        drop(registry);
        self.counters.started.fetch_add(1, Ordering::Relaxed);

        Ok(ClipTask::new(
            clip_id,
            trigger,
            state,
            cancellation_token,
            handle,
        ))
    }

    /// Assemble a clip and wait for it
    pub async fn assemble(&self, trigger: TriggerEvent) -> std::result::Result<ClipResult, ClipError> {
        self.begin_clip(trigger)?.wait().await
    }

    /// Cancel every in-flight clip, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let active = self.active.lock();
        for (clip_id, token) in active.iter() {
            warn!("Cancelling clip {}", clip_id);
            token.cancel();
        }
        active.len()
    }

    /// Number of clips currently being assembled
    pub fn active_clips(&self) -> usize {
        self.active.lock().len()
    }

    pub fn active_clip_ids(&self) -> Vec<Uuid> {
        self.active.lock().keys().copied().collect()
    }

    /// Wait until no clips are in flight. Returns false on timeout.
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let result = tokio::time::timeout(timeout, async {
            while self.active_clips() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;
        result.is_ok()
    }

    pub fn stats(&self) -> ClipAssemblerStats {
        ClipAssemblerStats {
            active: self.active_clips(),
            started: self.counters.started.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            aborted: self.counters.aborted.load(Ordering::Relaxed),
            rejected_busy: self.counters.rejected_busy.load(Ordering::Relaxed),
            rejected_unavailable: self.counters.rejected_unavailable.load(Ordering::Relaxed),
        }
    }

    pub fn settings(&self) -> &AssemblerSettings {
        &self.settings
    }

    pub fn ring_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring_buffer)
    }

    fn acquire_slot(&self) -> std::result::Result<Option<OwnedSemaphorePermit>, ClipError> {
        let Some(limiter) = &self.limiter else {
            return Ok(None);
        };

        match Arc::clone(limiter).try_acquire_owned() {
            Ok(permit) => Ok(Some(permit)),
            Err(_) => {
                self.counters.rejected_busy.fetch_add(1, Ordering::Relaxed);
                let limit = self.settings.max_concurrent_clips.unwrap_or(0);
                let active = limit.saturating_sub(limiter.available_permits());
                warn!(
                    "Clip assembly busy ({} of {} in flight), rejecting trigger",
                    active, limit
                );
                Err(ClipError::AssemblyBusy { active, limit })
            }
        }
    }
}

/// What interrupted a clip before it could be finalized
enum Interruption {
    Cancelled,
    Sink(SinkError),
}

struct Progress {
    pre_roll_frames: u64,
    post_roll_frames: u64,
    outcome: PostRollOutcome,
}

/// Everything one clip task owns
struct ClipJob {
    spec: ClipSpec,
    trigger: TriggerEvent,
    started_at: chrono::DateTime<Utc>,
    pre_roll: Vec<FrameData>,
    subscription: FrameSubscription,
    post_roll_target: u64,
    deadline: Duration,
    sink: Arc<dyn VideoSink>,
    tracker: StateTracker,
    cancellation_token: CancellationToken,
}

impl ClipJob {
    async fn run(self) -> std::result::Result<ClipResult, ClipError> {
        let ClipJob {
            spec,
            trigger,
            started_at,
            pre_roll,
            subscription,
            post_roll_target,
            deadline,
            sink,
            tracker,
            cancellation_token,
        } = self;
        let clip_id = spec.clip_id;
        let deadline = tokio::time::Instant::now() + deadline;

        let mut writer = match sink.open(&spec).await {
            Ok(writer) => writer,
            Err(e) => {
                error!("Clip {} failed to open sink: {}", clip_id, e);
                tracker.advance(ClipState::Aborted);
                return Err(sink_failure(clip_id, e));
            }
        };

        let progress = stream_frames(
            writer.as_mut(),
            pre_roll,
            subscription,
            post_roll_target,
            deadline,
            &tracker,
            &cancellation_token,
        )
        .await;

        let progress = match progress {
            Ok(progress) => progress,
            Err(interruption) => {
                writer.abort().await;
                tracker.advance(ClipState::Aborted);
                return Err(match interruption {
                    Interruption::Cancelled => {
                        warn!("Clip {} cancelled", clip_id);
                        ClipError::Cancelled { clip_id }
                    }
                    Interruption::Sink(e) => {
                        error!("Clip {} aborted by sink failure: {}", clip_id, e);
                        sink_failure(clip_id, e)
                    }
                });
            }
        };

        tracker.advance(ClipState::Finalizing);
        // Dropping an unfinished writer discards its partial output
        let finished = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => None,
            result = writer.finish() => Some(result),
        };
        let summary = match finished {
            None => {
                warn!("Clip {} cancelled while finalizing", clip_id);
                tracker.advance(ClipState::Aborted);
                return Err(ClipError::Cancelled { clip_id });
            }
            Some(Ok(summary)) => summary,
            Some(Err(e)) => {
                error!("Clip {} failed to finalize: {}", clip_id, e);
                tracker.advance(ClipState::Aborted);
                return Err(sink_failure(clip_id, e));
            }
        };
        tracker.advance(ClipState::Completed);

        let result = ClipResult {
            clip_id,
            path: summary.path,
            frame_count: summary.frame_count,
            pre_roll_frames: progress.pre_roll_frames,
            post_roll_frames: progress.post_roll_frames,
            bytes_written: summary.bytes_written,
            duration: clip_duration(summary.frame_count, spec.fps),
            fps: spec.fps,
            post_roll_outcome: progress.outcome,
            started_at,
            trigger,
        };

        info!(
            "Clip {} completed: {} frames ({} pre-roll, {} post-roll, {:.2}s, {:?}) at {}",
            clip_id,
            result.frame_count,
            result.pre_roll_frames,
            result.post_roll_frames,
            result.duration_secs(),
            result.post_roll_outcome,
            result.path.display()
        );

        Ok(result)
    }
}

async fn stream_frames(
    writer: &mut dyn ClipWriter,
    pre_roll: Vec<FrameData>,
    mut subscription: FrameSubscription,
    post_roll_target: u64,
    deadline: tokio::time::Instant,
    tracker: &StateTracker,
    cancellation_token: &CancellationToken,
) -> std::result::Result<Progress, Interruption> {
    if cancellation_token.is_cancelled() {
        return Err(Interruption::Cancelled);
    }

    tracker.advance(ClipState::WritingPreRoll);
    let pre_roll_frames = pre_roll.len() as u64;
    for frame in &pre_roll {
        write_frame(writer, frame, cancellation_token).await?;
    }
    drop(pre_roll);
    debug!("Wrote {} pre-roll frames", pre_roll_frames);

    tracker.advance(ClipState::WritingPostRoll);
    let mut post_roll_frames = 0u64;
    let expiry = tokio::time::sleep_until(deadline);
    tokio::pin!(expiry);

    // The deadline only bounds waiting for frames that have not been
    // captured yet; frames already queued are always written.
    let outcome = loop {
        if post_roll_frames >= post_roll_target {
            break PostRollOutcome::Complete;
        }

        let next = match subscription.try_recv() {
            Some(frame) => Some(frame),
            None => tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => return Err(Interruption::Cancelled),
                _ = &mut expiry => break PostRollOutcome::DeadlineElapsed,
                frame = subscription.recv() => frame,
            },
        };

        match next {
            Some(frame) => {
                write_frame(writer, &frame, cancellation_token).await?;
                post_roll_frames += 1;
            }
            None => break PostRollOutcome::FeedClosed,
        }
    };

    // Unsubscribe before finalizing so the producer stops queueing for us
    drop(subscription);

    if outcome != PostRollOutcome::Complete {
        warn!(
            "Post-roll ended early ({:?}) after {} of {} frames",
            outcome, post_roll_frames, post_roll_target
        );
    }

    Ok(Progress {
        pre_roll_frames,
        post_roll_frames,
        outcome,
    })
}

async fn write_frame(
    writer: &mut dyn ClipWriter,
    frame: &FrameData,
    cancellation_token: &CancellationToken,
) -> std::result::Result<(), Interruption> {
    tokio::select! {
        biased;
        _ = cancellation_token.cancelled() => Err(Interruption::Cancelled),
        result = writer.write(frame) => result.map_err(Interruption::Sink),
    }
}

fn sink_failure(clip_id: Uuid, source: SinkError) -> ClipError {
    ClipError::Sink {
        clip_id,
        timestamp: SystemTime::now(),
        source,
    }
}
