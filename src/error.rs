use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a [`FrameSource`](crate::source::FrameSource)
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    /// The capture device cannot be opened or used at all
    #[error("Frame source '{source_name}' unavailable: {details}")]
    Unavailable { source_name: String, details: String },

    /// A single read failed; the loop retries with backoff
    #[error("Transient read failure from '{source_name}': {details}")]
    Transient { source_name: String, details: String },

    /// The source has been closed and cannot be read from
    #[error("Frame source '{source_name}' is closed")]
    Closed { source_name: String },
}

impl SourceError {
    pub fn unavailable<S: Into<String>, D: Into<String>>(source_name: S, details: D) -> Self {
        Self::Unavailable {
            source_name: source_name.into(),
            details: details.into(),
        }
    }

    pub fn transient<S: Into<String>, D: Into<String>>(source_name: S, details: D) -> Self {
        Self::Transient {
            source_name: source_name.into(),
            details: details.into(),
        }
    }

    /// Whether the capture loop should keep going after this error
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Transient { .. })
    }
}

/// Errors raised by a [`VideoSink`](crate::sink::VideoSink) or its writer
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Failed to open sink '{sink}' at {path}: {details}")]
    Open {
        sink: String,
        path: String,
        details: String,
    },

    #[error("Failed to write frame {frame_id} to sink '{sink}': {details}")]
    Write {
        sink: String,
        frame_id: u64,
        details: String,
    },

    #[error("Failed to finalize sink '{sink}': {details}")]
    Finalize { sink: String, details: String },
}

/// Errors returned to whoever triggered a clip
#[derive(Error, Debug)]
pub enum ClipError {
    /// Concurrency cap reached; the caller may retry later
    #[error("Clip assembly busy: {active} of {limit} clips in flight")]
    AssemblyBusy { active: usize, limit: usize },

    /// The live frame feed is closed (capture loop stopped)
    #[error("Live frame feed unavailable for trigger '{trigger_id}'")]
    SourceUnavailable { trigger_id: String },

    /// Triggered from a thread with no async runtime to run the clip on
    #[error("No async runtime to assemble clip for trigger '{trigger_id}'")]
    NoRuntime { trigger_id: String },

    #[error("Clip {clip_id} aborted by sink failure at {timestamp:?}: {source}")]
    Sink {
        clip_id: Uuid,
        timestamp: SystemTime,
        #[source]
        source: SinkError,
    },

    #[error("Clip {clip_id} cancelled")]
    Cancelled { clip_id: Uuid },

    #[error("Clip {clip_id} task failed: {details}")]
    TaskFailed { clip_id: Uuid, details: String },
}

#[derive(Error, Debug)]
pub enum EventclipError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Clip error: {0}")]
    Clip(#[from] ClipError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl EventclipError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, S: Into<String>>(component: C, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EventclipError>;
