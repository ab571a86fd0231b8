use pulse_common::types::MetricSample;
use std::sync::{Mutex, MutexGuard};

/// Unbounded buffer between collectors and the uploader.
///
/// [`StagingQueue::drain_all`] swaps the whole buffer out under the lock, so
/// a drain never observes (or leaves behind) a partially-drained state. The
/// lock is only held for the push or the swap, never across I/O.
#[derive(Debug, Default)]
pub struct StagingQueue {
    buffer: Mutex<Vec<MetricSample>>,
}

impl StagingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MetricSample>> {
        self.buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, sample: MetricSample) {
        self.lock().push(sample);
    }

    /// Takes every buffered sample, leaving the queue empty.
    pub fn drain_all(&self) -> Vec<MetricSample> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
