use chrono::{DateTime, Utc};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{Result, VigilError};

/// Decoded RGB8 video frame plus its arrival time
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    received_at: DateTime<Utc>,
}

impl Frame {
    /// Bytes per pixel of the packed RGB8 layout
    pub const CHANNELS: usize = 3;

    /// Wrap an already-decoded RGB8 buffer
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if a dimension is zero or the buffer length
    /// does not match `width * height * 3`
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VigilError::InvalidInput(format!(
                "frame has zero dimension ({width}x{height})"
            )));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(Self::CHANNELS))
            .ok_or_else(|| VigilError::InvalidInput("frame dimensions overflow".to_string()))?;
        if pixels.len() != expected {
            return Err(VigilError::InvalidInput(format!(
                "frame buffer is {} bytes, expected {expected} for {width}x{height} RGB",
                pixels.len()
            )));
        }

        Ok(Self {
            width,
            height,
            pixels,
            received_at: Utc::now(),
        })
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    #[must_use]
    pub const fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }
}

/// Bounded frame queue between request handlers and the consumer thread
///
/// Pushing never blocks: when the queue is full the incoming frame is
/// dropped. Popping waits up to a timeout so the consumer can observe its
/// stop flag.
pub struct FrameQueue {
    tx: SyncSender<Frame>,
    rx: Mutex<Receiver<Frame>>,
    capacity: usize,
}

impl FrameQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        // A zero-capacity sync_channel is a rendezvous channel and would drop everything
        let capacity = capacity.max(1);
        let (tx, rx) = sync_channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            capacity,
        }
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue a frame; returns `false` if it was dropped because the queue is full
    pub fn push(&self, frame: Frame) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => false,
        }
    }

    /// Wait up to `timeout` for the oldest queued frame
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(timeout) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Discard every queued frame, returning how many were dropped
    pub fn purge(&self) -> usize {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut purged = 0;
        while rx.try_recv().is_ok() {
            purged += 1;
        }
        purged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn tiny_frame(shade: u8) -> Frame {
        Frame::from_rgb(2, 2, vec![shade; 12]).unwrap()
    }

    #[test]
    fn test_frame_rejects_wrong_buffer_size() {
        assert!(Frame::from_rgb(2, 2, vec![0; 11]).is_err());
        assert!(Frame::from_rgb(0, 2, Vec::new()).is_err());
        assert!(Frame::from_rgb(2, 2, vec![0; 12]).is_ok());
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let queue = FrameQueue::new(10);

        for shade in 0..10 {
            assert!(queue.push(tiny_frame(shade)));
        }
        let started = Instant::now();
        assert!(!queue.push(tiny_frame(10)));
        assert!(started.elapsed() < Duration::from_millis(100));

        // The retained frames are the first ten, oldest first
        let first = queue.pop_timeout(Duration::from_millis(10)).unwrap();
        assert_eq!(first.pixels()[0], 0);
        assert_eq!(queue.purge(), 9);
    }

    #[test]
    fn test_pop_times_out_when_empty() {
        let queue = FrameQueue::new(2);
        let started = Instant::now();
        assert!(queue.pop_timeout(Duration::from_millis(50)).is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_purge_makes_room() {
        let queue = FrameQueue::new(1);
        assert!(queue.push(tiny_frame(1)));
        assert!(!queue.push(tiny_frame(2)));
        assert_eq!(queue.purge(), 1);
        assert!(queue.push(tiny_frame(3)));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = FrameQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.push(tiny_frame(0)));
    }
}
