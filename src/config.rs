use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::frame::FrameFormat;
use crate::ring_buffer::calculate_ring_buffer_capacity;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventclipConfig {
    pub source: SourceConfig,
    pub buffer: BufferConfig,
    pub capture: CaptureConfig,
    pub clip: ClipConfig,
    pub trigger: TriggerConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SourceConfig {
    /// Frame source implementation ("mock" or "gstreamer")
    #[serde(default = "default_source_kind")]
    pub kind: String,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_device_index")]
    pub device_index: u32,

    /// Frame resolution (width, height)
    #[serde(default = "default_resolution")]
    pub resolution: (u32, u32),

    /// Target frames per second
    #[serde(default = "default_fps")]
    pub fps: u32,

    /// Video format (MJPG, YUYV, etc.)
    #[serde(default = "default_format")]
    pub format: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BufferConfig {
    /// Seconds of video kept before a trigger
    #[serde(default = "default_pre_roll_seconds")]
    pub pre_roll_seconds: u32,

    /// Seconds of video recorded after a trigger
    #[serde(default = "default_post_roll_seconds")]
    pub post_roll_seconds: u32,

    /// Ring buffer capacity in frames, replacing pre_roll_seconds * fps
    #[serde(default)]
    pub capacity_override: Option<usize>,

    /// Extra time allowed for post-roll when the live rate runs slow
    #[serde(default = "default_post_roll_grace_ms")]
    pub post_roll_grace_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// First backoff after a failed read
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Backoff ceiling for consecutive failed reads
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// How long stop() waits for the producer task
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// Frame age after which health reports a warning
    #[serde(default = "default_stale_frame_warning_ms")]
    pub stale_frame_warning_ms: u64,

    #[serde(default = "default_failure_warning_threshold")]
    pub failure_warning_threshold: u64,

    #[serde(default = "default_failure_unhealthy_threshold")]
    pub failure_unhealthy_threshold: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClipConfig {
    /// Directory finished clips are written to
    #[serde(default = "default_clip_path")]
    pub path: String,

    /// Video sink implementation ("frame_log" or "gstreamer")
    #[serde(default = "default_sink")]
    pub sink: String,

    /// Cap on clips assembled at once; unlimited when unset
    #[serde(default)]
    pub max_concurrent_clips: Option<usize>,

    /// Timezone used for clip file names
    #[serde(default = "default_timestamp_timezone")]
    pub timestamp_timezone: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TriggerConfig {
    /// Interval between automatic triggers in auto mode
    #[serde(default = "default_auto_interval_seconds")]
    pub auto_interval_seconds: u64,

    /// The first label is the default for a bare interactive `trigger`;
    /// auto mode cycles through all of them
    #[serde(default = "default_labels")]
    pub labels: Vec<String>,
}

impl EventclipConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("eventclip.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("source.kind", default_source_kind())?
            .set_default("source.device_index", default_device_index())?
            .set_default(
                "source.resolution",
                vec![default_resolution().0, default_resolution().1],
            )?
            .set_default("source.fps", default_fps())?
            .set_default("source.format", default_format())?
            .set_default("buffer.pre_roll_seconds", default_pre_roll_seconds())?
            .set_default("buffer.post_roll_seconds", default_post_roll_seconds())?
            .set_default("buffer.post_roll_grace_ms", default_post_roll_grace_ms())?
            .set_default("capture.retry_backoff_ms", default_retry_backoff_ms())?
            .set_default("capture.max_backoff_ms", default_max_backoff_ms())?
            .set_default("capture.stop_timeout_ms", default_stop_timeout_ms())?
            .set_default(
                "capture.stale_frame_warning_ms",
                default_stale_frame_warning_ms(),
            )?
            .set_default(
                "capture.failure_warning_threshold",
                default_failure_warning_threshold(),
            )?
            .set_default(
                "capture.failure_unhealthy_threshold",
                default_failure_unhealthy_threshold(),
            )?
            .set_default("clip.path", default_clip_path())?
            .set_default("clip.sink", default_sink())?
            .set_default("clip.timestamp_timezone", default_timestamp_timezone())?
            .set_default(
                "trigger.auto_interval_seconds",
                default_auto_interval_seconds(),
            )?
            .set_default("trigger.labels", default_labels())?
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables, e.g. EVENTCLIP_BUFFER__PRE_ROLL_SECONDS=5
            .add_source(
                Environment::with_prefix("EVENTCLIP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EventclipConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.resolution.0 == 0 || self.source.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Source resolution must be greater than 0".to_string(),
            ));
        }

        if self.source.fps == 0 {
            return Err(ConfigError::Message(
                "Source fps must be greater than 0".to_string(),
            ));
        }

        if FrameFormat::from_fourcc(&self.source.format).is_none() {
            return Err(ConfigError::Message(format!(
                "Unsupported source format '{}'",
                self.source.format
            )));
        }

        if self.buffer.pre_roll_seconds == 0 && self.buffer.capacity_override.is_none() {
            return Err(ConfigError::Message(
                "Buffer pre_roll_seconds must be greater than 0".to_string(),
            ));
        }

        if self.buffer.post_roll_seconds == 0 {
            return Err(ConfigError::Message(
                "Buffer post_roll_seconds must be greater than 0".to_string(),
            ));
        }

        if self.buffer.capacity_override == Some(0) {
            return Err(ConfigError::Message(
                "Ring buffer capacity must be greater than 0".to_string(),
            ));
        }

        if self.clip.max_concurrent_clips == Some(0) {
            return Err(ConfigError::Message(
                "Clip max_concurrent_clips must be greater than 0".to_string(),
            ));
        }

        if self.capture.retry_backoff_ms > self.capture.max_backoff_ms {
            return Err(ConfigError::Message(
                "Capture retry_backoff_ms must not exceed max_backoff_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Frames the ring buffer holds
    pub fn ring_buffer_capacity(&self) -> usize {
        self.buffer.capacity_override.unwrap_or_else(|| {
            calculate_ring_buffer_capacity(self.source.fps, self.buffer.pre_roll_seconds)
        })
    }

    /// Render this configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl BufferConfig {
    pub fn post_roll_grace(&self) -> Duration {
        Duration::from_millis(self.post_roll_grace_ms)
    }
}

impl CaptureConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn stale_frame_warning(&self) -> Duration {
        Duration::from_millis(self.stale_frame_warning_ms)
    }
}

impl Default for EventclipConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            buffer: BufferConfig::default(),
            capture: CaptureConfig::default(),
            clip: ClipConfig::default(),
            trigger: TriggerConfig {
                auto_interval_seconds: default_auto_interval_seconds(),
                labels: default_labels(),
            },
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            device_index: default_device_index(),
            resolution: default_resolution(),
            fps: default_fps(),
            format: default_format(),
        }
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pre_roll_seconds: default_pre_roll_seconds(),
            post_roll_seconds: default_post_roll_seconds(),
            capacity_override: None,
            post_roll_grace_ms: default_post_roll_grace_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_retry_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            stale_frame_warning_ms: default_stale_frame_warning_ms(),
            failure_warning_threshold: default_failure_warning_threshold(),
            failure_unhealthy_threshold: default_failure_unhealthy_threshold(),
        }
    }
}

impl Default for ClipConfig {
    fn default() -> Self {
        Self {
            path: default_clip_path(),
            sink: default_sink(),
            max_concurrent_clips: None,
            timestamp_timezone: default_timestamp_timezone(),
        }
    }
}

fn default_source_kind() -> String {
    "mock".to_string()
}

fn default_device_index() -> u32 {
    0
}

fn default_resolution() -> (u32, u32) {
    (640, 480)
}

fn default_fps() -> u32 {
    20
}

fn default_format() -> String {
    "MJPG".to_string()
}

fn default_pre_roll_seconds() -> u32 {
    15
}

fn default_post_roll_seconds() -> u32 {
    15
}

fn default_post_roll_grace_ms() -> u64 {
    2000
}

fn default_retry_backoff_ms() -> u64 {
    100
}

fn default_max_backoff_ms() -> u64 {
    1000
}

fn default_stop_timeout_ms() -> u64 {
    3000
}

fn default_stale_frame_warning_ms() -> u64 {
    2000
}

fn default_failure_warning_threshold() -> u64 {
    5
}

fn default_failure_unhealthy_threshold() -> u64 {
    50
}

fn default_clip_path() -> String {
    "./recordings".to_string()
}

fn default_sink() -> String {
    "frame_log".to_string()
}

fn default_timestamp_timezone() -> String {
    "UTC".to_string()
}

fn default_auto_interval_seconds() -> u64 {
    30
}

fn default_labels() -> Vec<String> {
    vec![
        "person_detected".to_string(),
        "vehicle_detected".to_string(),
        "accident_detected".to_string(),
        "speeding_detected".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = EventclipConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ring_buffer_capacity(), 300);
        assert_eq!(config.buffer.post_roll_grace(), Duration::from_secs(2));
    }

    #[test]
    fn test_capacity_override() {
        let mut config = EventclipConfig::default();
        config.buffer.capacity_override = Some(42);
        assert_eq!(config.ring_buffer_capacity(), 42);

        config.buffer.capacity_override = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_values() {
        let mut config = EventclipConfig::default();
        config.source.fps = 0;
        assert!(config.validate().is_err());

        let mut config = EventclipConfig::default();
        config.buffer.post_roll_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = EventclipConfig::default();
        config.clip.max_concurrent_clips = Some(0);
        assert!(config.validate().is_err());

        let mut config = EventclipConfig::default();
        config.source.format = "H264".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("eventclip.toml");
        fs::write(
            &path,
            r#"
[source]
fps = 10
resolution = [320, 240]

[buffer]
pre_roll_seconds = 3
post_roll_seconds = 4

[clip]
max_concurrent_clips = 2
"#,
        )
        .unwrap();

        let config = EventclipConfig::load_from_file(&path).unwrap();
        assert_eq!(config.source.fps, 10);
        assert_eq!(config.source.resolution, (320, 240));
        assert_eq!(config.buffer.pre_roll_seconds, 3);
        assert_eq!(config.buffer.post_roll_seconds, 4);
        assert_eq!(config.clip.max_concurrent_clips, Some(2));
        assert_eq!(config.clip.sink, "frame_log");
        assert_eq!(config.ring_buffer_capacity(), 30);
    }

    #[test]
    fn test_default_renders_as_toml() {
        let rendered = EventclipConfig::default().to_toml().unwrap();
        assert!(rendered.contains("[buffer]"));
        assert!(rendered.contains("pre_roll_seconds = 15"));
    }
}
