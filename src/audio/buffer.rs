use ringbuf::{traits::*, HeapRb};
use std::sync::Arc;
use parking_lot::Mutex;

/// Thread-safe sliding window over the most recent audio samples
///
/// Writes never fail: once full, the oldest samples are overwritten.
pub struct SampleWindow {
    buffer: Arc<Mutex<HeapRb<f32>>>,
}

impl SampleWindow {
    /// Create a new window holding at most `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(HeapRb::new(capacity.max(1)))),
        }
    }

    /// Push samples, evicting the oldest ones when full
    pub fn push(&self, samples: &[f32]) {
        let mut buffer = self.buffer.lock();
        for &sample in samples {
            buffer.push_overwrite(sample);
        }
    }

    /// Root-mean-square of the samples currently in the window
    ///
    /// Returns 0.0 for an empty window.
    pub fn rms(&self) -> f32 {
        let buffer = self.buffer.lock();
        let len = buffer.occupied_len();
        if len == 0 {
            return 0.0;
        }
        let sum_squares: f32 = buffer.iter().map(|&s| s * s).sum();
        (sum_squares / len as f32).sqrt()
    }

    /// Copy of the window contents, oldest first
    pub fn snapshot(&self) -> Vec<f32> {
        self.buffer.lock().iter().copied().collect()
    }

    /// Get the number of samples in the window
    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    /// Check if the window is empty
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Clear the window
    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    /// Get the capacity of the window
    pub fn capacity(&self) -> usize {
        self.buffer.lock().capacity().get()
    }
}

impl Clone for SampleWindow {
    fn clone(&self) -> Self {
        Self {
            buffer: Arc::clone(&self.buffer),
        }
    }
}
