//! Connection Parameter Negotiation
//!
//! A slave must not spam the link with parameter-update requests, so the
//! negotiator paces them with the GAP-mandated timers: a discovery pause
//! after connection (TGAP conn_pause_peripheral, then conn_pause_central,
//! restarted by attribute traffic), a 30 s backoff between rejected
//! requests, and a tiered ladder of requested windows — the device's
//! preferred parameters first, then looser compatibility values that
//! picky central stacks accept.

use log::{debug, info};

use crate::ble::gap::ConnParamReq;
use crate::config::{
    COMPAT_MAX_CON_INTERVAL, COMPAT_MIN_CON_INTERVAL, COMPAT_SLAVE_LATENCY,
    COMPAT_SUPERVISION_TIMEOUT, GAP_CONN_PARAM_TIMEOUT, MAX_CONN_PARAM_ATTEMPTS,
    MAX_CONN_PARAM_RETRIES, PREFERRED_MAX_CON_INTERVAL, PREFERRED_MIN_CON_INTERVAL,
    PREFERRED_SLAVE_LATENCY, PREFERRED_SUPERVISION_TIMEOUT, TGAP_CPC_PERIOD, TGAP_CPP_PERIOD,
};
use crate::core::timer::{TimerService, TimerSlot, TimerToken};

/// What the pending timer means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Phase {
    /// Nothing scheduled.
    Idle,
    /// Waiting out TGAP(conn_pause_peripheral) after connection entry.
    DiscoveryPause,
    /// Waiting out TGAP(conn_pause_central); attribute traffic restarts
    /// this window.
    CentralPause,
    /// Waiting out TGAP(conn_param_timeout) before the next request.
    Backoff,
}

/// Result of handing the negotiator a fired timer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerOutcome {
    /// The token belongs to someone else.
    NotMine,
    /// Claimed; the negotiator moved to its next internal wait.
    Waiting,
    /// Claimed; submit this request to the stack now.
    Request(ConnParamReq),
    /// Claimed; the ladder is exhausted for this connection.
    Abandoned,
}

/// Timer-driven retry state for connection-parameter-update requests.
/// At most one negotiator timer is live at a time.
#[derive(Debug)]
pub struct ParamNegotiator {
    timer: TimerSlot,
    phase: Phase,
    /// Requests sent this connection. Monotonic; never reset while the
    /// link lives, so the ladder cannot repeat itself.
    attempts: u8,
}

impl ParamNegotiator {
    pub const fn new() -> Self {
        Self {
            timer: TimerSlot::new(),
            phase: Phase::Idle,
            attempts: 0,
        }
    }

    /// Fresh connection: drop any pending timer and rewind the ladder.
    pub fn reset(&mut self) {
        self.timer.disarm();
        self.phase = Phase::Idle;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u8 {
        self.attempts
    }

    pub fn is_pending(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Arm the two-phase discovery wait on connection entry. The central
    /// gets TGAP(conn_pause_peripheral) of silence before we even start
    /// watching for the end of service discovery.
    pub fn arm_discovery(&mut self, timers: &mut dyn TimerService) {
        self.phase = Phase::DiscoveryPause;
        self.timer.arm(timers, TGAP_CPP_PERIOD);
        debug!("PARAM: negotiation armed, discovery pause running");
    }

    /// Attribute traffic while the central-pause window is open means
    /// the central is still discovering services: restart the window.
    pub fn on_access_ind(&mut self, timers: &mut dyn TimerService) {
        if self.phase == Phase::CentralPause {
            self.timer.arm(timers, TGAP_CPC_PERIOD);
        }
    }

    /// A parameter change applied by the central cancels pending work;
    /// when the link still violates preferences the negotiation restarts
    /// from the long backoff, not from the discovery pause.
    pub fn on_external_update(&mut self, timers: &mut dyn TimerService, complies: bool) {
        self.timer.disarm();
        if complies || self.attempts >= MAX_CONN_PARAM_ATTEMPTS {
            self.phase = Phase::Idle;
        } else {
            self.phase = Phase::Backoff;
            self.timer.arm(timers, GAP_CONN_PARAM_TIMEOUT);
            debug!("PARAM: still out of range after external update, backing off");
        }
    }

    /// Confirmation of our own request. A rejection below the retry
    /// ceiling schedules another attempt after TGAP(conn_param_timeout);
    /// past the ceiling the request is abandoned for this connection.
    pub fn on_update_cfm(&mut self, timers: &mut dyn TimerService, success: bool) {
        if success {
            return;
        }
        if self.attempts < MAX_CONN_PARAM_RETRIES {
            self.phase = Phase::Backoff;
            self.timer.arm(timers, GAP_CONN_PARAM_TIMEOUT);
            info!("PARAM: request {} rejected, retrying after backoff", self.attempts);
        } else {
            self.phase = Phase::Idle;
            self.timer.disarm();
            info!("PARAM: request rejected at retry ceiling, giving up");
        }
    }

    /// Route a fired timer token. Stale tokens (superseded by a restart
    /// of the window) are refused and must be ignored by the caller.
    pub fn on_timer(&mut self, timers: &mut dyn TimerService, token: TimerToken) -> TimerOutcome {
        if !self.timer.try_claim(token) {
            return TimerOutcome::NotMine;
        }

        match self.phase {
            Phase::Idle => TimerOutcome::NotMine,
            Phase::DiscoveryPause => {
                self.phase = Phase::CentralPause;
                self.timer.arm(timers, TGAP_CPC_PERIOD);
                TimerOutcome::Waiting
            }
            Phase::CentralPause | Phase::Backoff => {
                if self.attempts >= MAX_CONN_PARAM_ATTEMPTS {
                    self.phase = Phase::Idle;
                    return TimerOutcome::Abandoned;
                }
                self.attempts += 1;
                self.phase = Phase::Idle;
                let req = ladder(self.attempts);
                info!("PARAM: sending update request, attempt {}", self.attempts);
                TimerOutcome::Request(req)
            }
        }
    }
}

impl Default for ParamNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

/// Requested window for the Nth request of a connection: attempts 1-2
/// ask for the preferred parameters, attempts 3-4 for the compatibility
/// set.
pub fn ladder(attempt: u8) -> ConnParamReq {
    if attempt <= 2 {
        ConnParamReq {
            min_interval: PREFERRED_MIN_CON_INTERVAL,
            max_interval: PREFERRED_MAX_CON_INTERVAL,
            latency: PREFERRED_SLAVE_LATENCY,
            timeout: PREFERRED_SUPERVISION_TIMEOUT,
        }
    } else {
        ConnParamReq {
            min_interval: COMPAT_MIN_CON_INTERVAL,
            max_interval: COMPAT_MAX_CON_INTERVAL,
            latency: COMPAT_SLAVE_LATENCY,
            timeout: COMPAT_SUPERVISION_TIMEOUT,
        }
    }
}
