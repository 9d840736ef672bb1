use std::time::Duration;

/// Component lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// System shutdown reason
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
    /// Auto mode ran for its configured duration
    DurationElapsed,
    /// Standard input reached end of file
    InputClosed,
}

/// Where triggers come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Commands typed on standard input
    Interactive,
    /// Periodic triggers cycling through the configured labels
    Auto { duration: Duration },
}
