use super::result::ClipResult;
use crate::error::ClipError;
use crate::trigger::TriggerEvent;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle of one clip assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipState {
    Created,
    WritingPreRoll,
    WritingPostRoll,
    Finalizing,
    Completed,
    Aborted,
}

impl ClipState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ClipState::Completed | ClipState::Aborted)
    }

    /// Forward-only transitions; `Aborted` is reachable from any live state
    pub fn can_transition_to(&self, next: ClipState) -> bool {
        use ClipState::*;
        match (self, next) {
            (Created, WritingPreRoll)
            | (WritingPreRoll, WritingPostRoll)
            | (WritingPostRoll, Finalizing)
            | (Finalizing, Completed) => true,
            (current, Aborted) => !current.is_terminal(),
            _ => false,
        }
    }
}

/// Write side of a clip's state, owned by the assembling task
pub(crate) struct StateTracker {
    clip_id: Uuid,
    sender: watch::Sender<ClipState>,
}

impl StateTracker {
    pub(crate) fn new(clip_id: Uuid) -> (Self, watch::Receiver<ClipState>) {
        let (sender, receiver) = watch::channel(ClipState::Created);
        (Self { clip_id, sender }, receiver)
    }

    pub(crate) fn advance(&self, next: ClipState) {
        let current = *self.sender.borrow();
        if !current.can_transition_to(next) {
            warn!(
                "Ignoring invalid clip {} transition {:?} -> {:?}",
                self.clip_id, current, next
            );
            return;
        }
        debug!("Clip {} {:?} -> {:?}", self.clip_id, current, next);
        self.sender.send_replace(next);
    }

    pub(crate) fn current(&self) -> ClipState {
        *self.sender.borrow()
    }
}

/// Handle to an in-flight clip.
///
/// Dropping the handle does not stop the clip; it keeps recording in the
/// background. Use [`ClipTask::cancel`] to abort it.
pub struct ClipTask {
    clip_id: Uuid,
    trigger: TriggerEvent,
    state: watch::Receiver<ClipState>,
    cancellation_token: CancellationToken,
    handle: JoinHandle<Result<ClipResult, ClipError>>,
}

impl ClipTask {
    pub(crate) fn new(
        clip_id: Uuid,
        trigger: TriggerEvent,
        state: watch::Receiver<ClipState>,
        cancellation_token: CancellationToken,
        handle: JoinHandle<Result<ClipResult, ClipError>>,
    ) -> Self {
        Self {
            clip_id,
            trigger,
            state,
            cancellation_token,
            handle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.clip_id
    }

    pub fn trigger(&self) -> &TriggerEvent {
        &self.trigger
    }

    pub fn state(&self) -> ClipState {
        *self.state.borrow()
    }

    /// Receiver observing every state change
    pub fn state_changes(&self) -> watch::Receiver<ClipState> {
        self.state.clone()
    }

    /// Wait until the clip reaches `target` or a terminal state, returning
    /// the state reached
    pub async fn wait_for_state(&self, target: ClipState) -> ClipState {
        let mut receiver = self.state.clone();
        let reached = receiver
            .wait_for(|state| *state == target || state.is_terminal())
            .await
            .map(|state| *state);
        match reached {
            Ok(state) => state,
            // Sender gone: the task has exited
            Err(_) => *receiver.borrow(),
        }
    }

    /// Request cancellation; the writer is aborted and partial output removed
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the clip to complete
    pub async fn wait(self) -> Result<ClipResult, ClipError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(ClipError::TaskFailed {
                clip_id: self.clip_id,
                details: e.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for ClipTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipTask")
            .field("clip_id", &self.clip_id)
            .field("trigger", &self.trigger.id)
            .field("state", &self.state())
            .finish()
    }
}
