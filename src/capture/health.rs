use serde::Serialize;
use std::time::SystemTime;

/// Point-in-time capture loop statistics
#[derive(Debug, Clone, Serialize)]
pub struct CaptureStats {
    pub is_running: bool,
    pub frames_captured: u64,
    pub read_failures: u64,
    pub consecutive_failures: u64,
    pub last_frame_at: Option<SystemTime>,
    pub buffered_frames: usize,
    pub buffer_capacity: usize,
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl HealthCheckResult {
    pub(crate) fn from_findings(issues: Vec<String>, warnings: Vec<String>) -> Self {
        let status = if !issues.is_empty() {
            HealthStatus::Unhealthy
        } else if !warnings.is_empty() {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            issues,
            warnings,
        }
    }
}

/// Health status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}
