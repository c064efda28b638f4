//! Timer Identity Management
//!
//! The platform delivers timer expiries through the same event surface as
//! radio events, so there is no cancel primitive. Cancellation is
//! identity-based instead: every started timer gets a fresh token from a
//! generation counter, the owner keeps only the token it expects, and a
//! fire whose token no longer matches is dropped on the floor.

use core::num::NonZeroU32;

use embassy_time::Duration;

/// Identity of one scheduled timer, from a monotonically increasing
/// generation counter. Tokens are never reused within a power cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerToken(NonZeroU32);

impl TimerToken {
    pub const fn from_raw(raw: NonZeroU32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0.get()
    }
}

/// One-shot timer scheduling provided by the platform. The returned
/// token is delivered back through event dispatch on expiry.
pub trait TimerService {
    fn start(&mut self, period: Duration) -> TimerToken;
}

/// Holder for at most one live timer.
///
/// Re-arming replaces the stored token, which is the only cancellation
/// mechanism: the superseded timer may still fire, but its token no
/// longer matches and [`TimerSlot::try_claim`] rejects it.
#[derive(Debug, Default, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerSlot {
    expected: Option<TimerToken>,
}

impl TimerSlot {
    pub const fn new() -> Self {
        Self { expected: None }
    }

    /// Start a timer for this slot, superseding any earlier one.
    pub fn arm(&mut self, timers: &mut dyn TimerService, period: Duration) {
        self.expected = Some(timers.start(period));
    }

    /// Forget the pending timer; a later fire becomes a no-op.
    pub fn disarm(&mut self) {
        self.expected = None;
    }

    pub fn is_armed(&self) -> bool {
        self.expected.is_some()
    }

    /// Accept a fired token if it is the one this slot is waiting for.
    /// Claiming clears the slot; a stale or foreign token is refused.
    pub fn try_claim(&mut self, token: TimerToken) -> bool {
        if self.expected == Some(token) {
            self.expected = None;
            true
        } else {
            false
        }
    }
}
