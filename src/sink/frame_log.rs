use super::{ClipSpec, ClipWriter, SinkSummary, VideoSink};
use crate::error::{EventclipError, Result, SinkError};
use crate::frame::{FrameData, FrameFormat};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Magic number for the clip container: "ECLP"
const FRAME_LOG_MAGIC: [u8; 4] = *b"ECLP";
const FRAME_LOG_VERSION: u32 = 1;
const FRAME_LOG_HEADER_SIZE: usize = 32;
const FRAME_COUNT_OFFSET: u64 = 24;
/// Timestamp, id, width, height, format, length
const RECORD_HEADER_SIZE: usize = 8 + 8 + 4 + 4 + 1 + 4;
const FLUSH_THRESHOLD: usize = 2_000_000;

pub const FRAME_LOG_EXTENSION: &str = "eclp";

/// Writes clips as a simple length-prefixed frame container.
///
/// Layout: a 32 byte header (magic, version, 16 byte clip id, frame count,
/// fps) followed by one record per frame. Clips are written to a `.part`
/// file and only renamed into place by `finish`, so an aborted or dropped
/// clip never leaves a file that looks complete.
#[derive(Debug, Default)]
pub struct FrameLogSink;

impl FrameLogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VideoSink for FrameLogSink {
    fn name(&self) -> &str {
        "frame_log"
    }

    async fn open(&self, spec: &ClipSpec) -> std::result::Result<Box<dyn ClipWriter>, SinkError> {
        let writer = FrameLogWriter::create(spec).await?;
        Ok(Box::new(writer))
    }
}

struct FrameLogWriter {
    file: Option<BufWriter<File>>,
    buffer: Vec<u8>,
    frame_count: u32,
    bytes_written: u64,
    clip_id: Uuid,
    part_path: PathBuf,
    final_path: PathBuf,
    finished: bool,
}

impl FrameLogWriter {
    async fn create(spec: &ClipSpec) -> std::result::Result<Self, SinkError> {
        let final_path = spec.path_with_extension(FRAME_LOG_EXTENSION);
        let part_path = final_path.with_extension(format!("{}.part", FRAME_LOG_EXTENSION));
        let display_path = final_path.display().to_string();
        let open_error = |details: String| SinkError::Open {
            sink: "frame_log".to_string(),
            path: display_path.clone(),
            details,
        };

        tokio::fs::create_dir_all(&spec.directory)
            .await
            .map_err(|e| open_error(format!("Failed to create clip directory: {}", e)))?;

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&part_path)
            .await
            .map_err(|e| open_error(format!("Failed to create clip file: {}", e)))?;

        let mut writer = Self {
            file: Some(BufWriter::new(file)),
            buffer: Vec::with_capacity(FLUSH_THRESHOLD.min(spec.expected_frames * 4096 + 1)),
            frame_count: 0,
            bytes_written: 0,
            clip_id: spec.clip_id,
            part_path,
            final_path,
            finished: false,
        };

        writer.write_header(spec.fps).await.map_err(&open_error)?;

        debug!(
            "Created frame log for clip {}: {}",
            spec.clip_id,
            writer.part_path.display()
        );
        Ok(writer)
    }

    async fn write_header(&mut self, fps: u32) -> std::result::Result<(), String> {
        let mut header = Vec::with_capacity(FRAME_LOG_HEADER_SIZE);
        header.extend_from_slice(&FRAME_LOG_MAGIC);
        header.extend_from_slice(&FRAME_LOG_VERSION.to_le_bytes());
        header.extend_from_slice(self.clip_id.as_bytes());
        // Frame count placeholder, patched on finish
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&fps.to_le_bytes());

        let file = self.file.as_mut().ok_or("Frame log already closed")?;
        file.write_all(&header)
            .await
            .map_err(|e| format!("Failed to write header: {}", e))?;
        self.bytes_written += header.len() as u64;
        Ok(())
    }

    async fn flush_buffer(&mut self) -> std::io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(&self.buffer).await?;
        }
        self.buffer.clear();
        Ok(())
    }

    fn finalize_error(details: String) -> SinkError {
        SinkError::Finalize {
            sink: "frame_log".to_string(),
            details,
        }
    }
}

#[async_trait]
impl ClipWriter for FrameLogWriter {
    async fn write(&mut self, frame: &FrameData) -> std::result::Result<(), SinkError> {
        let timestamp_nanos = frame
            .timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64;

        self.buffer.extend_from_slice(&timestamp_nanos.to_le_bytes());
        self.buffer.extend_from_slice(&frame.id.to_le_bytes());
        self.buffer.extend_from_slice(&frame.width.to_le_bytes());
        self.buffer.extend_from_slice(&frame.height.to_le_bytes());
        self.buffer.push(frame.format.to_code());
        self.buffer
            .extend_from_slice(&(frame.data.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(&frame.data);

        self.frame_count += 1;
        self.bytes_written += (RECORD_HEADER_SIZE + frame.data.len()) as u64;

        if self.buffer.len() >= FLUSH_THRESHOLD {
            self.flush_buffer().await.map_err(|e| SinkError::Write {
                sink: "frame_log".to_string(),
                frame_id: frame.id,
                details: e.to_string(),
            })?;
        }

        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> std::result::Result<SinkSummary, SinkError> {
        self.flush_buffer()
            .await
            .map_err(|e| Self::finalize_error(format!("Failed to flush: {}", e)))?;

        let mut file = self
            .file
            .take()
            .ok_or_else(|| Self::finalize_error("Frame log already closed".to_string()))?;
        file.flush()
            .await
            .map_err(|e| Self::finalize_error(format!("Failed to flush: {}", e)))?;

        let mut file = file.into_inner();
        file.seek(std::io::SeekFrom::Start(FRAME_COUNT_OFFSET))
            .await
            .map_err(|e| Self::finalize_error(format!("Failed to seek: {}", e)))?;
        file.write_all(&self.frame_count.to_le_bytes())
            .await
            .map_err(|e| Self::finalize_error(format!("Failed to update frame count: {}", e)))?;
        file.sync_all()
            .await
            .map_err(|e| Self::finalize_error(format!("Failed to sync: {}", e)))?;
        drop(file);

        tokio::fs::rename(&self.part_path, &self.final_path)
            .await
            .map_err(|e| Self::finalize_error(format!("Failed to move clip into place: {}", e)))?;
        self.finished = true;

        info!(
            "Closed frame log for clip {} ({} frames, {} bytes)",
            self.clip_id, self.frame_count, self.bytes_written
        );

        Ok(SinkSummary {
            path: self.final_path.clone(),
            frame_count: self.frame_count as u64,
            bytes_written: self.bytes_written,
        })
    }

    async fn abort(mut self: Box<Self>) {
        self.file = None;
        self.buffer.clear();
        if let Err(e) = tokio::fs::remove_file(&self.part_path).await {
            warn!(
                "Failed to remove partial clip {}: {}",
                self.part_path.display(),
                e
            );
        }
        self.finished = true;
        debug!("Aborted frame log for clip {}", self.clip_id);
    }

    fn frames_written(&self) -> u64 {
        self.frame_count as u64
    }
}

impl Drop for FrameLogWriter {
    fn drop(&mut self) {
        if !self.finished {
            self.file = None;
            let _ = std::fs::remove_file(&self.part_path);
        }
    }
}

/// A frame read back from a frame log
#[derive(Debug, Clone)]
pub struct FrameLogRecord {
    pub id: u64,
    pub timestamp: SystemTime,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    pub data: Vec<u8>,
}

/// Streaming reader for frame logs
pub struct FrameLogReader {
    file: File,
    clip_id: Uuid,
    frame_count: u32,
    fps: u32,
    path: PathBuf,
}

impl FrameLogReader {
    /// Open a frame log and validate the header
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).await.map_err(|e| {
            EventclipError::component("frame_log", format!("Failed to open clip file: {}", e))
        })?;

        let mut header = [0u8; FRAME_LOG_HEADER_SIZE];
        file.read_exact(&mut header).await.map_err(|e| {
            EventclipError::component("frame_log", format!("Failed to read header: {}", e))
        })?;

        if header[0..4] != FRAME_LOG_MAGIC {
            return Err(EventclipError::component("frame_log", "Invalid magic number"));
        }

        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != FRAME_LOG_VERSION {
            return Err(EventclipError::component(
                "frame_log",
                format!("Unsupported frame log version {}", version),
            ));
        }

        let mut id_bytes = [0u8; 16];
        id_bytes.copy_from_slice(&header[8..24]);
        let frame_count = u32::from_le_bytes([header[24], header[25], header[26], header[27]]);
        let fps = u32::from_le_bytes([header[28], header[29], header[30], header[31]]);

        Ok(Self {
            file,
            clip_id: Uuid::from_bytes(id_bytes),
            frame_count,
            fps,
            path,
        })
    }

    /// Read the next frame, `None` at end of file
    pub async fn next_frame(&mut self) -> Result<Option<FrameLogRecord>> {
        let mut record_header = [0u8; RECORD_HEADER_SIZE];
        match self.file.read_exact(&mut record_header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => {
                return Err(EventclipError::component(
                    "frame_log",
                    format!("Failed to read frame header: {}", e),
                ))
            }
        }

        let read_u32 = |at: usize| {
            u32::from_le_bytes([
                record_header[at],
                record_header[at + 1],
                record_header[at + 2],
                record_header[at + 3],
            ])
        };
        let read_u64 = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&record_header[at..at + 8]);
            u64::from_le_bytes(bytes)
        };

        let timestamp_nanos = read_u64(0);
        let id = read_u64(8);
        let width = read_u32(16);
        let height = read_u32(20);
        let format = FrameFormat::from_code(record_header[24]).ok_or_else(|| {
            EventclipError::component(
                "frame_log",
                format!("Unknown frame format code {}", record_header[24]),
            )
        })?;
        let data_len = read_u32(25) as usize;

        let mut data = vec![0u8; data_len];
        self.file.read_exact(&mut data).await.map_err(|e| {
            EventclipError::component("frame_log", format!("Failed to read frame data: {}", e))
        })?;

        Ok(Some(FrameLogRecord {
            id,
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_nanos(timestamp_nanos),
            width,
            height,
            format,
            data,
        }))
    }

    /// Read every remaining frame
    pub async fn read_all(&mut self) -> Result<Vec<FrameLogRecord>> {
        let mut frames = Vec::with_capacity(self.frame_count as usize);
        while let Some(frame) = self.next_frame().await? {
            frames.push(frame);
        }
        Ok(frames)
    }

    pub fn clip_id(&self) -> Uuid {
        self.clip_id
    }

    /// Frame count recorded in the header
    pub fn frame_count(&self) -> u32 {
        self.frame_count
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
