pub mod app;
pub mod capture;
pub mod clip;
pub mod config;
pub mod error;
pub mod frame;
pub mod ring_buffer;
pub mod sink;
pub mod source;
pub mod trigger;

pub use app::{ComponentState, EventclipOrchestrator, RunMode, Session, SessionSummary, ShutdownReason};
pub use capture::{CaptureLoop, CaptureLoopBuilder, CaptureStats, HealthCheckResult, HealthStatus};
pub use clip::{ClipAssembler, ClipResult, ClipState, ClipTask, PostRollOutcome};
pub use config::EventclipConfig;
pub use error::{ClipError, EventclipError, Result, SinkError, SourceError};
pub use frame::{FrameData, FrameFormat};
pub use ring_buffer::{FrameSubscription, LiveView, RingBuffer, RingBufferBuilder};
pub use sink::{ClipSpec, ClipWriter, FrameLogReader, FrameLogSink, MemorySink, SinkSummary, VideoSink};
pub use source::{FrameSource, MockFrameSource, SourceFrame};
pub use trigger::TriggerEvent;
