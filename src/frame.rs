use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Frame format enumeration supporting different video formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Motion JPEG format - compressed JPEG frames
    Mjpeg,
    /// YUV 4:2:2 format - uncompressed YUV data
    Yuyv,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
}

impl FrameFormat {
    /// Get bytes per pixel for the format
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Mjpeg => 0, // Variable size, compressed
            FrameFormat::Yuyv => 2,
            FrameFormat::Rgb24 => 3,
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Mjpeg)
    }

    /// Size of one uncompressed frame, `None` for compressed formats
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        if self.is_compressed() {
            None
        } else {
            Some(width as usize * height as usize * self.bytes_per_pixel())
        }
    }

    /// Parse a FOURCC-style name as used in configuration ("MJPG", "YUYV", "RGB3")
    pub fn from_fourcc(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MJPG" | "MJPEG" => Some(FrameFormat::Mjpeg),
            "YUYV" => Some(FrameFormat::Yuyv),
            "RGB3" | "RGB24" => Some(FrameFormat::Rgb24),
            _ => None,
        }
    }

    pub(crate) fn to_code(self) -> u8 {
        match self {
            FrameFormat::Mjpeg => 0,
            FrameFormat::Yuyv => 1,
            FrameFormat::Rgb24 => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(FrameFormat::Mjpeg),
            1 => Some(FrameFormat::Yuyv),
            2 => Some(FrameFormat::Rgb24),
            _ => None,
        }
    }
}

/// A captured frame.
///
/// Frames are immutable once stamped by the capture loop. Cloning is cheap:
/// the pixel payload is shared, so the ring buffer and any number of clip
/// tasks can hold the same frame at once.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Monotonic sequence number assigned at capture
    pub id: u64,
    /// Monotonic capture instant, used for ordering
    pub captured_at: Instant,
    /// Wall-clock capture time, used for reporting and file naming
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership)
    pub data: Arc<Vec<u8>>,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    /// Create a new frame data instance
    pub fn new(
        id: u64,
        captured_at: Instant,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            captured_at,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Whether this frame strictly follows `other` in capture order.
    ///
    /// Both the id and the capture instant must increase.
    pub fn is_after(&self, other: &FrameData) -> bool {
        self.id > other.id && self.captured_at > other.captured_at
    }
}
