use super::session::Session;
use super::types::{ComponentState, ShutdownReason};
use crate::capture::CaptureLoop;
use crate::clip::{AssemblerSettings, ClipAssembler};
use crate::config::EventclipConfig;
use crate::error::{ClipError, Result};
use crate::ring_buffer::{RingBuffer, RingBufferBuilder};
use crate::sink::VideoSink;
use crate::source::FrameSource;
use crate::trigger::TriggerEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Wires the capture loop, ring buffer and clip assembler together and runs
/// a trigger session on top of them
pub struct EventclipOrchestrator {
    pub(super) config: EventclipConfig,
    pub(super) ring_buffer: Arc<RingBuffer>,

    // Components
    pub(super) capture: CaptureLoop,
    pub(super) assembler: ClipAssembler,
    pub(super) session: Session,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl EventclipOrchestrator {
    /// Create an orchestrator with the source and sink named in configuration
    pub async fn new(config: EventclipConfig) -> Result<Self> {
        let ring_buffer = Self::build_ring_buffer(&config)?;
        let capture = CaptureLoop::from_config(&config, Arc::clone(&ring_buffer))?;
        let assembler = ClipAssembler::from_config(&config, Arc::clone(&ring_buffer))?;
        Ok(Self::from_parts(config, ring_buffer, capture, assembler))
    }

    /// Create an orchestrator around an explicit source and sink
    pub fn with_components(
        config: EventclipConfig,
        source: Box<dyn FrameSource>,
        sink: Arc<dyn VideoSink>,
    ) -> Result<Self> {
        let ring_buffer = Self::build_ring_buffer(&config)?;
        let capture = CaptureLoop::new(
            source,
            Arc::clone(&ring_buffer),
            config.source.fps,
            config.capture.clone(),
        );
        let assembler = ClipAssembler::new(
            Arc::clone(&ring_buffer),
            sink,
            AssemblerSettings::from_config(&config),
        );
        Ok(Self::from_parts(config, ring_buffer, capture, assembler))
    }

    fn build_ring_buffer(config: &EventclipConfig) -> Result<Arc<RingBuffer>> {
        let capacity = config.ring_buffer_capacity();
        info!(
            "Ring buffer capacity: {} frames ({} fps, {} s pre-roll)",
            capacity, config.source.fps, config.buffer.pre_roll_seconds
        );
        Ok(Arc::new(RingBufferBuilder::new().capacity(capacity).build()?))
    }

    fn from_parts(
        config: EventclipConfig,
        ring_buffer: Arc<RingBuffer>,
        capture: CaptureLoop,
        assembler: ClipAssembler,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Self {
            config,
            ring_buffer,
            capture,
            assembler,
            session: Session::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Token that ends a running [`run`](Self::run) loop and starts shutdown
    /// when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Raise a trigger with the given label
    pub fn trigger<S: Into<String>>(&mut self, label: S) -> std::result::Result<Uuid, ClipError> {
        let trigger = TriggerEvent::new(label);
        self.session.trigger(&self.assembler, trigger)
    }

    /// Raise a fully specified trigger
    pub fn trigger_event(&mut self, trigger: TriggerEvent) -> std::result::Result<Uuid, ClipError> {
        self.session.trigger(&self.assembler, trigger)
    }

    pub fn config(&self) -> &EventclipConfig {
        &self.config
    }

    pub fn capture(&self) -> &CaptureLoop {
        &self.capture
    }

    pub fn assembler(&self) -> &ClipAssembler {
        &self.assembler
    }

    pub fn ring_buffer(&self) -> Arc<RingBuffer> {
        Arc::clone(&self.ring_buffer)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }
}
