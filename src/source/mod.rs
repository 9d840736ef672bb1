//! Frame sources feeding the capture loop.
//!
//! A [`FrameSource`] is exclusively owned by the
//! [`CaptureLoop`](crate::capture::CaptureLoop): it is moved into the producer
//! task on start and handed back when the task exits, so no other component
//! can ever read from the device.

mod mock;

#[cfg(all(feature = "camera", target_os = "linux"))]
mod v4l2;

pub use mock::{MockFrameSource, MockFrameSourceBuilder};

#[cfg(all(feature = "camera", target_os = "linux"))]
pub use v4l2::GstFrameSource;

use crate::config::SourceConfig;
use crate::error::{EventclipError, Result, SourceError};
use crate::frame::FrameFormat;
use async_trait::async_trait;
use std::time::{Duration, SystemTime};

/// A frame as delivered by a source, before the capture loop stamps it
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    /// Wall-clock time reported by the device, if it has one
    pub timestamp: Option<SystemTime>,
}

/// A live frame producer such as a camera.
///
/// `read_frame` may block briefly while waiting for the device. Returning
/// [`SourceError::Transient`] tells the capture loop to back off and retry;
/// any other error is treated the same way once the loop is running, since
/// a running loop never exits on read failures.
#[async_trait]
pub trait FrameSource: Send {
    /// Human-readable name for logging and error messages
    fn name(&self) -> &str;

    /// Acquire the device. Failure prevents the capture loop from starting.
    async fn open(&mut self) -> std::result::Result<(), SourceError>;

    /// Read the next frame
    async fn read_frame(&mut self) -> std::result::Result<SourceFrame, SourceError>;

    /// Release the device. Called once when the capture loop stops.
    async fn close(&mut self) {}
}

/// Build the frame source selected by configuration
pub fn from_config(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    match config.kind.as_str() {
        "mock" => {
            let format = FrameFormat::from_fourcc(&config.format).ok_or_else(|| {
                EventclipError::component(
                    "source",
                    format!("Unsupported capture format '{}'", config.format),
                )
            })?;
            Ok(Box::new(
                MockFrameSource::builder()
                    .resolution(config.resolution.0, config.resolution.1)
                    .format(format)
                    .read_delay(Duration::from_secs(1) / config.fps.max(1))
                    .build(),
            ))
        }
        #[cfg(all(feature = "camera", target_os = "linux"))]
        "gstreamer" => Ok(Box::new(GstFrameSource::new(config.clone())?)),
        other => Err(EventclipError::component(
            "source",
            format!("Unsupported frame source kind '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_follows_configured_format() {
        let config = SourceConfig {
            format: "YUYV".to_string(),
            resolution: (160, 120),
            fps: 100,
            ..SourceConfig::default()
        };

        let mut source = from_config(&config).unwrap();
        source.open().await.unwrap();
        let frame = source.read_frame().await.unwrap();

        assert_eq!(frame.format, FrameFormat::Yuyv);
        assert_eq!(frame.data.len(), 160 * 120 * 2);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let config = SourceConfig {
            format: "H264".to_string(),
            ..SourceConfig::default()
        };

        assert!(matches!(
            from_config(&config),
            Err(EventclipError::Component { .. })
        ));
    }
}
