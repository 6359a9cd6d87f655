//! Injectable time source so expiry and backoff logic can be tested with simulated time.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock shared by the session store and rate-limit coordinator.
#[derive(Clone)]
pub enum Clock {
    System,
    /// Fixed clock for tests; advance it explicitly.
    Manual(Arc<Mutex<u64>>),
}

impl Clock {
    pub fn system() -> Self {
        Clock::System
    }

    pub fn manual(start_ms: u64) -> Self {
        Clock::Manual(Arc::new(Mutex::new(start_ms)))
    }

    pub fn now_ms(&self) -> u64 {
        match self {
            Clock::System => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            Clock::Manual(ms) => *ms.lock(),
        }
    }

    /// Advance a manual clock. No-op on the system clock.
    pub fn advance_ms(&self, delta: u64) {
        if let Clock::Manual(ms) = self {
            *ms.lock() += delta;
        }
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Clock::System => write!(f, "Clock::System"),
            Clock::Manual(ms) => write!(f, "Clock::Manual({})", *ms.lock()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = Clock::manual(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(500);
        assert_eq!(clock.now_ms(), 1_500);
    }

    #[test]
    fn test_system_clock_monotonic_enough() {
        let clock = Clock::system();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
