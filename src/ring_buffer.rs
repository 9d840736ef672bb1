use crate::frame::FrameData;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Bounded sliding window of the most recent frames.
///
/// A single mutex guards the frame sequence together with the list of live
/// subscribers, which is what makes [`RingBuffer::snapshot_and_subscribe`]
/// linearizable against [`RingBuffer::push`]: every pushed frame lands either
/// in the snapshot or in the subscription queue, never both and never
/// neither. The lock is only held to append, evict, or copy `Arc` handles.
pub struct RingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
    stats: RingBufferStats,
}

struct Inner {
    frames: VecDeque<FrameData>,
    subscribers: Vec<mpsc::UnboundedSender<FrameData>>,
    feed_open: bool,
}

/// Statistics for ring buffer performance monitoring
#[derive(Debug)]
pub struct RingBufferStats {
    /// Total frames accepted into the buffer
    pub frames_pushed: AtomicU64,
    /// Frames silently dropped from the head on overflow
    pub frames_evicted: AtomicU64,
    /// Frames refused because they would break capture order
    pub frames_rejected: AtomicU64,
    pub snapshots_taken: AtomicU64,
}

impl RingBufferStats {
    fn new() -> Self {
        Self {
            frames_pushed: AtomicU64::new(0),
            frames_evicted: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            snapshots_taken: AtomicU64::new(0),
        }
    }
}

/// Snapshot of ring buffer statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBufferStatsSnapshot {
    pub frames_pushed: u64,
    pub frames_evicted: u64,
    pub frames_rejected: u64,
    pub snapshots_taken: u64,
    pub frame_count: usize,
    pub capacity: usize,
    pub subscriber_count: usize,
}

/// Live feed of frames pushed after the subscription was registered.
///
/// Dropping the subscription unregisters it on the next push.
pub struct FrameSubscription {
    receiver: mpsc::UnboundedReceiver<FrameData>,
}

impl FrameSubscription {
    /// Wait for the next live frame; `None` once the feed has been closed
    pub async fn recv(&mut self) -> Option<FrameData> {
        self.receiver.recv().await
    }

    /// Take a live frame if one is already queued
    pub fn try_recv(&mut self) -> Option<FrameData> {
        self.receiver.try_recv().ok()
    }
}

/// A pre-roll snapshot paired with the live feed that continues it
pub struct LiveView {
    /// Buffered frames, oldest first
    pub pre_roll: Vec<FrameData>,
    pub subscription: FrameSubscription,
}

impl RingBuffer {
    /// Create a new ring buffer holding at most `capacity` frames
    ///
    /// # Example
    /// ```
    /// use eventclip::ring_buffer::RingBuffer;
    ///
    /// let buffer = RingBuffer::new(300);
    /// assert_eq!(buffer.capacity(), 300);
    /// ```
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            panic!("Ring buffer capacity must be greater than 0");
        }

        debug!("Created ring buffer with capacity {}", capacity);

        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                subscribers: Vec::new(),
                feed_open: true,
            }),
            capacity,
            stats: RingBufferStats::new(),
        }
    }

    /// Push a new frame, evicting the oldest one when full.
    ///
    /// Never blocks beyond the internal critical section and never applies
    /// backpressure. A frame that does not strictly follow the newest
    /// buffered frame is dropped and counted instead of inserted.
    pub fn push(&self, frame: FrameData) {
        let mut inner = self.inner.lock();

        if let Some(newest) = inner.frames.back() {
            if !frame.is_after(newest) {
                let newest_id = newest.id;
                drop(inner);
                self.stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Rejected out-of-order frame {} (newest buffered is {})",
                    frame.id, newest_id
                );
                return;
            }
        }

        if inner.frames.len() == self.capacity {
            if let Some(evicted) = inner.frames.pop_front() {
                self.stats.frames_evicted.fetch_add(1, Ordering::Relaxed);
                trace!("Evicted frame {} from ring buffer", evicted.id);
            }
        }

        if !inner.subscribers.is_empty() {
            inner
                .subscribers
                .retain(|subscriber| subscriber.send(frame.clone()).is_ok());
        }

        trace!("Pushed frame {} into ring buffer", frame.id);
        inner.frames.push_back(frame);
        drop(inner);

        self.stats.frames_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the current window, oldest first
    pub fn snapshot(&self) -> Vec<FrameData> {
        let frames: Vec<FrameData> = {
            let inner = self.inner.lock();
            inner.frames.iter().cloned().collect()
        };
        self.stats.snapshots_taken.fetch_add(1, Ordering::Relaxed);
        frames
    }

    /// Register a live subscriber without taking a snapshot.
    ///
    /// Returns `None` if the feed is closed.
    pub fn subscribe(&self) -> Option<FrameSubscription> {
        let mut inner = self.inner.lock();
        if !inner.feed_open {
            return None;
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        inner.subscribers.push(sender);
        Some(FrameSubscription { receiver })
    }

    /// Take a snapshot and register a live subscriber in one critical section.
    ///
    /// Returns `None` if the feed is closed.
    pub fn snapshot_and_subscribe(&self) -> Option<LiveView> {
        let view = {
            let mut inner = self.inner.lock();
            if !inner.feed_open {
                return None;
            }
            let pre_roll: Vec<FrameData> = inner.frames.iter().cloned().collect();
            let (sender, receiver) = mpsc::unbounded_channel();
            inner.subscribers.push(sender);
            LiveView {
                pre_roll,
                subscription: FrameSubscription { receiver },
            }
        };
        self.stats.snapshots_taken.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Took ring buffer snapshot of {} frames with live subscription",
            view.pre_roll.len()
        );
        Some(view)
    }

    /// End the live feed: current subscribers drain and then see `None`,
    /// and new subscriptions are refused until [`RingBuffer::open_feed`]
    pub fn close_feed(&self) {
        let mut inner = self.inner.lock();
        inner.feed_open = false;
        let dropped = inner.subscribers.len();
        inner.subscribers.clear();
        debug!("Closed live frame feed ({} subscribers released)", dropped);
    }

    /// Accept new subscriptions again
    pub fn open_feed(&self) {
        let mut inner = self.inner.lock();
        if !inner.feed_open {
            inner.feed_open = true;
            debug!("Opened live frame feed");
        }
    }

    pub fn is_feed_open(&self) -> bool {
        self.inner.lock().feed_open
    }

    /// Get the most recently pushed frame
    pub fn latest(&self) -> Option<FrameData> {
        self.inner.lock().frames.back().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.lock().frames.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live subscribers currently registered
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    /// Get current buffer statistics
    pub fn stats(&self) -> RingBufferStatsSnapshot {
        let (frame_count, subscriber_count) = {
            let inner = self.inner.lock();
            (inner.frames.len(), inner.subscribers.len())
        };

        RingBufferStatsSnapshot {
            frames_pushed: self.stats.frames_pushed.load(Ordering::Relaxed),
            frames_evicted: self.stats.frames_evicted.load(Ordering::Relaxed),
            frames_rejected: self.stats.frames_rejected.load(Ordering::Relaxed),
            snapshots_taken: self.stats.snapshots_taken.load(Ordering::Relaxed),
            frame_count,
            capacity: self.capacity,
            subscriber_count,
        }
    }

    /// Clear all frames from the buffer; subscribers are left in place
    pub fn clear(&self) {
        debug!("Clearing ring buffer");
        self.inner.lock().frames.clear();
    }
}

/// Builder for creating ring buffers with custom configuration
pub struct RingBufferBuilder {
    capacity: Option<usize>,
}

impl RingBufferBuilder {
    pub fn new() -> Self {
        Self { capacity: None }
    }

    /// Set the buffer capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Size the buffer to hold `seconds` of frames at `fps`
    pub fn window(mut self, fps: u32, seconds: u32) -> Self {
        self.capacity = Some(calculate_ring_buffer_capacity(fps, seconds));
        self
    }

    /// Build the ring buffer with specified configuration
    pub fn build(self) -> Result<RingBuffer, crate::error::EventclipError> {
        let capacity = self.capacity.ok_or_else(|| {
            crate::error::EventclipError::system("Ring buffer capacity must be specified")
        })?;

        if capacity == 0 {
            return Err(crate::error::EventclipError::system(
                "Ring buffer capacity must be greater than 0",
            ));
        }

        Ok(RingBuffer::new(capacity))
    }
}

impl Default for RingBufferBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Frames needed to hold `seconds` of video at `fps`, never less than one
pub fn calculate_ring_buffer_capacity(fps: u32, seconds: u32) -> usize {
    (fps as u64 * seconds as u64).max(1) as usize
}
