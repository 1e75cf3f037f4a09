//! Fast-close circuit breaker for [`crate::shared::host::SharedHost`]
//! (spec §4.2 "Circuit breaker", §7 `FastCloseBurst`).
//!
//! Adapted from the teacher's generic `CircuitBreaker` (Closed → Open →
//! HalfOpen, guarded by an `RwLock` for multi-task sharing): the trigger
//! here is "N clean closes within `fast_close_window` of open", not "N
//! failed calls", and there is no half-open probe — a single non-fast close
//! is enough to reset the counter, and suspension always lasts a fixed
//! `suspend_duration`. Because `SharedHost` owns exactly one of these and
//! never shares it across tasks, it needs no internal locking.
//!
//! # State machine
//!
//! ```text
//! Normal ──(fast_close_threshold fast, clean closes)──► Suspended
//!   ▲                                                      │
//!   └──────────────(suspend_duration elapses)──────────────┘
//! ```

use std::time::{Duration, Instant};

/// Observable state of a [`FastCloseBreaker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Reconnects are allowed.
    Normal,
    /// Reconnects are refused until `until` (wall-clock deadline).
    Suspended,
}

#[derive(Debug, Clone)]
pub struct FastCloseBreakerConfig {
    /// Consecutive fast, clean closes before suspension. Default: 3.
    pub fast_close_threshold: u32,
    /// A close counts as "fast" if it happens within this long of open.
    /// Default: 3s.
    pub fast_close_window: Duration,
    /// How long reconnection is suspended once tripped. Default: 60s.
    pub suspend_duration: Duration,
}

impl Default for FastCloseBreakerConfig {
    fn default() -> Self {
        Self {
            fast_close_threshold: 3,
            fast_close_window: Duration::from_secs(3),
            suspend_duration: Duration::from_secs(60),
        }
    }
}

/// Tracks `HostState.fastCleanCount` and the resulting suspension deadline.
#[derive(Debug)]
pub struct FastCloseBreaker {
    config: FastCloseBreakerConfig,
    fast_clean_count: u32,
    suspended_until: Option<Instant>,
}

impl FastCloseBreaker {
    pub fn new(config: FastCloseBreakerConfig) -> Self {
        Self {
            config,
            fast_clean_count: 0,
            suspended_until: None,
        }
    }

    /// Record a stream close. `opened_at` is when the stream that just
    /// closed reached OPEN; `code` is the close code if the server sent
    /// one. Returns `true` exactly when this close just tripped the
    /// breaker into `Suspended`.
    pub fn record_close(&mut self, opened_at: Instant, code: Option<u16>) -> bool {
        let is_fast_clean = code == Some(1000) && opened_at.elapsed() < self.config.fast_close_window;

        if !is_fast_clean {
            self.fast_clean_count = 0;
            return false;
        }

        self.fast_clean_count += 1;
        if self.fast_clean_count >= self.config.fast_close_threshold {
            self.suspended_until = Some(Instant::now() + self.config.suspend_duration);
            self.fast_clean_count = 0;
            return true;
        }
        false
    }

    /// Returns `true` if reconnection should be refused right now.
    pub fn is_suspended(&self) -> bool {
        matches!(self.suspended_until, Some(until) if Instant::now() < until)
    }

    pub fn state(&self) -> BreakerState {
        if self.is_suspended() {
            BreakerState::Suspended
        } else {
            BreakerState::Normal
        }
    }

    /// Wall-clock deadline suspension lasts until, if currently suspended.
    pub fn suspended_until(&self) -> Option<Instant> {
        self.suspended_until.filter(|_| self.is_suspended())
    }

    /// Clears suspension and the fast-close counter — used when the host
    /// adopts a new identity (a fresh identity deserves a fresh circuit).
    pub fn reset(&mut self) {
        self.fast_clean_count = 0;
        self.suspended_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> FastCloseBreakerConfig {
        FastCloseBreakerConfig {
            fast_close_threshold: 3,
            fast_close_window: Duration::from_millis(50),
            suspend_duration: Duration::from_millis(100),
        }
    }

    #[test]
    fn starts_in_normal_state() {
        let cb = FastCloseBreaker::new(fast_config());
        assert_eq!(cb.state(), BreakerState::Normal);
        assert!(!cb.is_suspended());
    }

    #[test]
    fn three_fast_clean_closes_trip_suspension() {
        let mut cb = FastCloseBreaker::new(fast_config());
        let opened = Instant::now();
        assert!(!cb.record_close(opened, Some(1000)));
        assert!(!cb.record_close(opened, Some(1000)));
        assert!(cb.record_close(opened, Some(1000)));
        assert_eq!(cb.state(), BreakerState::Suspended);
        assert!(cb.is_suspended());
    }

    #[test]
    fn non_fast_close_resets_counter() {
        let mut cb = FastCloseBreaker::new(fast_config());
        let opened = Instant::now();
        cb.record_close(opened, Some(1000));
        cb.record_close(opened, Some(1000));
        // A non-1000 close resets the streak.
        cb.record_close(opened, Some(1006));
        assert!(!cb.record_close(opened, Some(1000)));
        assert_eq!(cb.state(), BreakerState::Normal);
    }

    #[test]
    fn slow_clean_close_does_not_count() {
        let mut cb = FastCloseBreaker::new(fast_config());
        let opened = Instant::now() - Duration::from_millis(200);
        assert!(!cb.record_close(opened, Some(1000)));
        assert_eq!(cb.state(), BreakerState::Normal);
    }

    #[tokio::test]
    async fn suspension_expires_after_duration() {
        let mut cb = FastCloseBreaker::new(fast_config());
        let opened = Instant::now();
        cb.record_close(opened, Some(1000));
        cb.record_close(opened, Some(1000));
        cb.record_close(opened, Some(1000));
        assert!(cb.is_suspended());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!cb.is_suspended());
        assert_eq!(cb.state(), BreakerState::Normal);
    }

    #[test]
    fn reset_clears_suspension() {
        let mut cb = FastCloseBreaker::new(fast_config());
        let opened = Instant::now();
        cb.record_close(opened, Some(1000));
        cb.record_close(opened, Some(1000));
        cb.record_close(opened, Some(1000));
        assert!(cb.is_suspended());
        cb.reset();
        assert!(!cb.is_suspended());
    }
}
