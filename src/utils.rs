//! Small shared helpers

use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative shutdown flag shared by every pipeline loop.
///
/// There is no preemptive interruption: each loop polls the flag at its
/// natural suspension point (dequeue timeout, fallback cadence, broker
/// keepalive), so observation latency is bounded by that loop's own period.
#[derive(Debug, Default)]
pub struct ShutdownFlag {
    inner: AtomicBool,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Round to 4 decimal places, matching the precision published on the wire.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_flag_latches() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        flag.set();
        assert!(flag.is_set());
    }

    #[test]
    fn round4_truncates_noise() {
        assert_eq!(round4(1.234_56), 1.2346);
        assert_eq!(round4(-0.000_04), -0.0);
        assert_eq!(round4(2.0), 2.0);
    }
}
