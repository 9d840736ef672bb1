mod commands;
mod orchestrator;
mod runtime;
mod session;
mod shutdown;
mod startup;
mod state;
mod types;

#[cfg(test)]
mod tests;

pub use commands::{Command, HELP};
pub use orchestrator::EventclipOrchestrator;
pub use session::{Session, SessionSummary};
pub use types::{ComponentState, RunMode, ShutdownReason};
