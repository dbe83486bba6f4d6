// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use gstreamer as gst;
use log::debug;

/// A decoded buffer with the caps it was rendered with.
#[derive(Debug)]
pub struct DecodedUnit {
    pub buffer: gst::Buffer,
    pub caps: Option<gst::Caps>,
    /// Number of flushes the sink had seen when the buffer reached it.
    generation: u64,
}

impl DecodedUnit {
    pub fn pts(&self) -> Option<gst::ClockTime> {
        self.buffer.pts()
    }
}

/// FIFO of decoded buffers, filled by the engine's streaming thread and emptied by the decoder.
///
/// Buffers are moved in and out without copying their content. Every unit is tagged with the
/// number of flushes seen so far by the producer; [`BridgeQueue::discard_stale`] drops the units
/// rendered before the latest flush and makes the queue refuse any such unit afterwards. Once
/// closed, the queue drops whatever is pushed to it.
#[derive(Default)]
pub struct BridgeQueue {
    units: Mutex<VecDeque<DecodedUnit>>,
    generation: AtomicU64,
    oldest_valid: AtomicU64,
    closed: AtomicBool,
}

impl BridgeQueue {
    pub fn new() -> Self {
        Default::default()
    }

    fn units(&self) -> MutexGuard<'_, VecDeque<DecodedUnit>> {
        self.units.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, unit: &DecodedUnit) -> bool {
        unit.generation < self.oldest_valid.load(Ordering::SeqCst)
    }

    /// Queues `buffer`. Returns false, dropping it, if the queue is closed.
    pub fn push(&self, buffer: gst::Buffer, caps: Option<gst::Caps>) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            debug!("queue closed, dropping decoded buffer");
            return false;
        }
        let unit = DecodedUnit {
            buffer,
            caps,
            generation: self.generation.load(Ordering::SeqCst),
        };
        self.units().push_back(unit);
        true
    }

    /// Removes the oldest buffer rendered since the last flush, if any.
    pub fn pop(&self) -> Option<DecodedUnit> {
        let mut units = self.units();
        while let Some(unit) = units.pop_front() {
            if !self.is_stale(&unit) {
                return Some(unit);
            }
        }
        None
    }

    /// Puts back at the head of the queue a buffer that was popped but could not be consumed.
    pub fn unpop(&self, unit: DecodedUnit) {
        self.units().push_front(unit);
    }

    /// Records that the producer went through a flush. Buffers pushed from now on belong to a
    /// new generation.
    pub fn next_generation(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Drops the buffers rendered before the latest flush and refuses them from now on. Returns
    /// how many were dropped.
    pub fn discard_stale(&self) -> usize {
        self.oldest_valid
            .store(self.generation.load(Ordering::SeqCst), Ordering::SeqCst);
        let stale: VecDeque<DecodedUnit> = {
            let mut units = self.units();
            let (stale, fresh) = units.drain(..).partition(|u| self.is_stale(u));
            *units = fresh;
            stale
        };
        // Buffers are released outside of the lock.
        stale.len()
    }

    /// Drops every queued buffer. Returns how many were dropped.
    pub fn drain_and_discard(&self) -> usize {
        let drained: Vec<DecodedUnit> = self.units().drain(..).collect();
        drained.len()
    }

    /// Drops every queued buffer and every buffer pushed from now on.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::SeqCst);
        self.drain_and_discard()
    }

    pub fn len(&self) -> usize {
        self.units().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    fn buffer(pts: u64) -> gst::Buffer {
        gst::init().unwrap();
        let mut buffer = gst::Buffer::from_mut_slice(vec![0u8]);
        buffer
            .make_mut()
            .set_pts(gst::ClockTime::from_nseconds(pts));
        buffer
    }

    fn pts(unit: &DecodedUnit) -> u64 {
        unit.pts().unwrap().nseconds()
    }

    /// Payload counting how many times it was released.
    struct Counted(Arc<Mutex<u32>>);

    impl AsRef<[u8]> for Counted {
        fn as_ref(&self) -> &[u8] {
            &[0]
        }
    }

    impl Drop for Counted {
        fn drop(&mut self) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn fifo_order() {
        let queue = BridgeQueue::new();
        assert!(queue.pop().is_none());
        queue.push(buffer(1), None);
        queue.push(buffer(2), None);
        let first = queue.pop().unwrap();
        assert_eq!(pts(&first), 1);
        queue.unpop(first);
        assert_eq!(pts(&queue.pop().unwrap()), 1);
        assert_eq!(pts(&queue.pop().unwrap()), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn concurrent_producers_keep_per_thread_order() {
        let queue = Arc::new(BridgeQueue::new());
        let producers: Vec<_> = (0..4u64)
            .map(|t| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        queue.push(buffer(t * 1000 + i), None);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(queue.len(), 400);
        let mut last = [None; 4];
        while let Some(unit) = queue.pop() {
            let pts = pts(&unit);
            let t = (pts / 1000) as usize;
            assert!(last[t].map_or(true, |l| l < pts));
            last[t] = Some(pts);
        }
    }

    #[test]
    fn drain_releases_buffers() {
        gst::init().unwrap();
        let queue = BridgeQueue::new();
        let released = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            queue.push(gst::Buffer::from_slice(Counted(released.clone())), None);
        }
        assert_eq!(queue.drain_and_discard(), 3);
        assert!(queue.is_empty());
        assert_eq!(*released.lock().unwrap(), 3);
    }

    #[test]
    fn stale_units_are_dropped() {
        let queue = BridgeQueue::new();
        queue.push(buffer(1), None);
        queue.next_generation();
        queue.push(buffer(2), None);
        assert_eq!(queue.discard_stale(), 1);
        assert_eq!(queue.len(), 1);

        // A unit rendered before the flush but queued late is refused as well.
        let late = DecodedUnit {
            buffer: buffer(0),
            caps: None,
            generation: 0,
        };
        queue.unpop(late);
        assert_eq!(pts(&queue.pop().unwrap()), 2);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn closed_queue_drops_pushes() {
        let queue = BridgeQueue::new();
        queue.push(buffer(1), None);
        assert_eq!(queue.close(), 1);
        assert!(!queue.push(buffer(2), None));
        assert!(queue.is_empty());
    }
}
