use super::{ComponentState, EventclipOrchestrator, SessionSummary};
use crate::error::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// How long in-flight clips get to finish once capture has stopped
const CLIP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

impl EventclipOrchestrator {
    /// Stop capture, let in-flight clips finish and return the session summary
    pub async fn shutdown(&mut self) -> Result<SessionSummary> {
        self.shutdown_with_timeout(CLIP_DRAIN_TIMEOUT).await
    }

    pub async fn shutdown_with_timeout(&mut self, drain_timeout: Duration) -> Result<SessionSummary> {
        info!("Beginning graceful shutdown");
        self.cancellation_token.cancel();

        // Stopping capture closes the live feed, which ends post-rolls early
        self.set_component_state("capture", ComponentState::Stopping)
            .await;
        let stop_budget = self.config.capture.stop_timeout() + Duration::from_secs(1);
        let capture_state = match timeout(stop_budget, self.capture.stop()).await {
            Ok(Ok(_)) => {
                info!("capture component stopped");
                ComponentState::Stopped
            }
            Ok(Err(e)) => {
                error!("Error stopping capture component: {}", e);
                ComponentState::Failed
            }
            Err(_) => {
                error!("capture component stop timeout");
                ComponentState::Failed
            }
        };
        self.set_component_state("capture", capture_state).await;

        self.set_component_state("assembler", ComponentState::Stopping)
            .await;
        let cancelled = self.session.drain(drain_timeout).await;
        if cancelled > 0 {
            warn!("Cancelled {} clip(s) that did not finish in time", cancelled);
        }

        // Clips started directly on the assembler are not tracked by the session
        let stray = self.assembler.cancel_all();
        if stray > 0 && !self.assembler.wait_for_idle(Duration::from_secs(2)).await {
            warn!("{} clip(s) still active after cancellation", self.assembler.active_clips());
        }
        self.set_component_state("assembler", ComponentState::Stopped)
            .await;

        let summary = self.session.summary();
        info!(
            "Graceful shutdown completed: {} clip(s) saved, {} failed",
            summary.clips_saved, summary.clips_failed
        );
        Ok(summary)
    }
}
