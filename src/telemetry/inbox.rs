//! Ring buffer holding display-ready telemetry text for the compositor

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crossbeam::utils::CachePadded;
use ringbuf::{traits::*, HeapRb};

/// Fixed-capacity inbox of the most recent telemetry strings.
///
/// Written by the relay subscription context, drained by the compositor;
/// drop-oldest on overflow, FIFO order preserved for retained entries.
pub struct TelemetryInbox {
    ring: Mutex<HeapRb<String>>,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    received: AtomicUsize,
    consumed: AtomicUsize,
    dropped: AtomicUsize,
}

impl TelemetryInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: push a telemetry string, evicting the oldest on overflow.
    pub fn push(&self, text: String) {
        let mut ring = self.ring.lock().unwrap();
        if ring.push_overwrite(text).is_some() {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.stats.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Consumer: non-blocking pop of the oldest retained string.
    pub fn pop(&self) -> Option<String> {
        let text = self.ring.lock().unwrap().try_pop()?;
        self.stats.consumed.fetch_add(1, Ordering::Relaxed);
        Some(text)
    }

    /// Discard everything currently held; returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut ring = self.ring.lock().unwrap();
        let mut cleared = 0;
        while ring.try_pop().is_some() {
            cleared += 1;
        }
        self.stats.dropped.fetch_add(cleared, Ordering::Relaxed);
        cleared
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> (usize, usize, usize) {
        (
            self.stats.received.load(Ordering::Relaxed),
            self.stats.consumed.load(Ordering::Relaxed),
            self.stats.dropped.load(Ordering::Relaxed),
        )
    }
}
