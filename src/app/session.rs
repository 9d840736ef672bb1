use crate::clip::{ClipAssembler, ClipResult, ClipState, ClipTask};
use crate::error::ClipError;
use crate::trigger::TriggerEvent;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Totals for one run of the application
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSummary {
    pub events_triggered: u64,
    pub clips_saved: u64,
    pub clips_failed: u64,
    pub clips_rejected: u64,
    pub frames_written: u64,
    pub bytes_written: u64,
    pub elapsed: Duration,
    pub saved_paths: Vec<PathBuf>,
}

impl fmt::Display for SessionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Session summary")?;
        writeln!(f, "  Duration:         {:.1}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "  Events triggered: {}", self.events_triggered)?;
        writeln!(f, "  Clips saved:      {}", self.clips_saved)?;
        writeln!(f, "  Clips failed:     {}", self.clips_failed)?;
        writeln!(f, "  Clips rejected:   {}", self.clips_rejected)?;
        writeln!(f, "  Frames written:   {}", self.frames_written)?;
        write!(f, "  Bytes written:    {}", self.bytes_written)
    }
}

/// Tracks the clips a run has started and tallies how they ended
pub struct Session {
    started: Instant,
    in_flight: Vec<ClipTask>,
    summary: SessionSummary,
}

impl Session {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            in_flight: Vec::new(),
            summary: SessionSummary::default(),
        }
    }

    /// Hand a trigger to the assembler and keep the resulting task
    pub fn trigger(
        &mut self,
        assembler: &ClipAssembler,
        trigger: TriggerEvent,
    ) -> Result<Uuid, ClipError> {
        self.summary.events_triggered += 1;
        info!("Trigger '{}' ({})", trigger.label, trigger.id);

        match assembler.begin_clip(trigger) {
            Ok(task) => {
                let clip_id = task.id();
                self.in_flight.push(task);
                Ok(clip_id)
            }
            Err(e) => {
                self.summary.clips_rejected += 1;
                warn!("Trigger rejected: {}", e);
                Err(e)
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Collect results of clips that have already finished
    pub async fn reap_finished(&mut self) {
        let (finished, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|task| task.is_finished());
        self.in_flight = pending;

        for task in finished {
            let result = task.wait().await;
            self.record(result);
        }
    }

    /// Wait for every in-flight clip, cancelling those still running when
    /// `timeout` expires. Returns how many were cancelled.
    pub async fn drain(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut cancelled = 0;

        for task in std::mem::take(&mut self.in_flight) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let finished =
                tokio::time::timeout(remaining, task.wait_for_state(ClipState::Completed)).await;
            if finished.is_err() {
                warn!("Clip {} still running at shutdown, cancelling", task.id());
                task.cancel();
                cancelled += 1;
            }
            let result = task.wait().await;
            self.record(result);
        }

        cancelled
    }

    fn record(&mut self, result: Result<ClipResult, ClipError>) {
        match result {
            Ok(clip) => {
                self.summary.clips_saved += 1;
                self.summary.frames_written += clip.frame_count;
                self.summary.bytes_written += clip.bytes_written;
                self.summary.saved_paths.push(clip.path);
            }
            Err(e) => {
                self.summary.clips_failed += 1;
                warn!("Clip failed: {}", e);
            }
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let mut summary = self.summary.clone();
        summary.elapsed = self.started.elapsed();
        summary
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}
