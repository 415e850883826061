use std::collections::HashMap;

use crate::FRAMES_IN_FLIGHT;

/// Frame-buffered deferred deletion queue.
///
/// Destructors are bucketed by the global frame number they were pushed in and
/// only run once that frame can no longer be in flight on the GPU. Buckets are
/// flushed in reverse push order so dependent objects outlive their users.
#[derive(Default)]
pub struct DeletionQueue {
    buckets: HashMap<u64, Vec<Box<dyn FnOnce() + Send>>>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, frame: u64, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.buckets.entry(frame).or_default().push(Box::new(func));
    }

    /// Takes every destructor whose bucket is older than `FRAMES_IN_FLIGHT`
    /// frames, in reverse push order. Callers run them outside any lock,
    /// since a destructor may defer further deletions.
    pub fn drain_expired(&mut self, current_frame: u64) -> Vec<Box<dyn FnOnce() + Send>> {
        let expired: Vec<u64> = self
            .buckets
            .keys()
            .copied()
            .filter(|frame| frame + FRAMES_IN_FLIGHT as u64 <= current_frame)
            .collect();
        let mut funcs = Vec::new();
        for frame in expired {
            if let Some(bucket) = self.buckets.remove(&frame) {
                funcs.extend(bucket.into_iter().rev());
            }
        }
        funcs
    }

    /// Takes every pending destructor. Only valid after a device wait-idle.
    pub fn drain_all(&mut self) -> Vec<Box<dyn FnOnce() + Send>> {
        let mut frames: Vec<u64> = self.buckets.keys().copied().collect();
        frames.sort_unstable();
        let mut funcs = Vec::new();
        for frame in frames {
            if let Some(bucket) = self.buckets.remove(&frame) {
                funcs.extend(bucket.into_iter().rev());
            }
        }
        funcs
    }

    /// Runs every bucket older than `FRAMES_IN_FLIGHT` frames
    pub fn flush(&mut self, current_frame: u64) {
        for func in self.drain_expired(current_frame) {
            func();
        }
    }

    /// Runs every pending bucket. Only valid after a device wait-idle.
    pub fn flush_all(&mut self) {
        for func in self.drain_all() {
            func();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn flushes_only_buckets_out_of_flight() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut queue = DeletionQueue::new();
        for frame in 0..4u64 {
            let counter = counter.clone();
            queue.push(frame, move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Frames 0 and 1 are out of flight at frame 3 with two buffered frames.
        queue.flush(3);
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        queue.flush_all();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(queue.is_empty());
    }

    #[test]
    fn bucket_runs_in_reverse_push_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut queue = DeletionQueue::new();
        for i in 0..3 {
            let order = order.clone();
            queue.push(0, move || order.lock().unwrap().push(i));
        }
        queue.flush_all();
        assert_eq!(*order.lock().unwrap(), vec![2, 1, 0]);
    }
}
