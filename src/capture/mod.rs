mod builder;
mod core;
mod health;
#[cfg(test)]
mod tests;

pub use builder::CaptureLoopBuilder;
pub use self::core::{CaptureLoop, StartStatus, StopStatus};
pub use health::{CaptureStats, HealthCheckResult, HealthStatus};
