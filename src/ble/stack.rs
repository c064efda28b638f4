//! Outbound Radio-Stack Requests
//!
//! The request primitives the application issues against the link
//! layer, GATT entity and security manager. On target these wrap the
//! firmware API; tests substitute a recording mock. The fault funnel
//! lives here as well because reporting a fatal code is the last request
//! a dying image makes of the platform.

use crate::ble::gap::{AdvertKind, ConnParamReq, Irk, TypedBdAddr};
use crate::core::fault::FaultCode;

/// Errors surfaced by the link-layer request primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StackError {
    /// The controller rejected the request (resource exhaustion).
    Rejected,
    /// No link exists for the supplied connection handle.
    NoSuchConnection,
}

/// Verdict returned for a diversifier-approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DivVerdict {
    /// The link layer may re-encrypt with the previously derived key.
    Approved,
    /// The key is unknown or stale; the peer must pair afresh.
    Revoked,
}

/// Status of an attribute access response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AccessStatus {
    Success,
    ReadNotPermitted,
    WriteNotPermitted,
    RequestNotSupported,
}

/// Request surface of the radio stack.
pub trait RadioStack {
    /// Register the GATT database; completion arrives as `AddDbCfm`.
    fn add_database(&mut self);

    /// Seed the security manager's diversifier after a power cycle.
    fn sm_init(&mut self, diversifier: u16);

    /// Begin connectable advertising at the given rate, optionally
    /// filtered by the link-layer whitelist.
    fn start_adverts(&mut self, kind: AdvertKind, use_whitelist: bool);

    /// Cancel advertising; completion arrives as `CancelConnectCfm`.
    fn stop_adverts(&mut self);

    /// Tear down the link with the given connection handle.
    fn disconnect(&mut self, cid: u16);

    /// Submit an L2CAP connection-parameter-update request.
    fn conn_param_update_request(
        &mut self,
        peer: &TypedBdAddr,
        req: &ConnParamReq,
    ) -> Result<(), StackError>;

    /// Add a peer to the link-layer whitelist.
    fn add_whitelist_device(&mut self, addr: &TypedBdAddr) -> Result<(), StackError>;

    /// Answer a pairing-authorisation request.
    fn pairing_auth_response(&mut self, auth_handle: u16, accept: bool);

    /// Answer a diversifier-approval request.
    fn div_approval(&mut self, cid: u16, verdict: DivVerdict);

    /// Answer an attribute access indication.
    fn access_response(&mut self, cid: u16, handle: u16, status: AccessStatus, value: &[u8]);

    /// Whether `addr` resolves against `irk` (AES-128 hash check done by
    /// the security manager).
    fn privacy_match_address(&mut self, addr: &TypedBdAddr, irk: &Irk) -> bool;

    /// One word from the platform random source.
    fn random_word(&mut self) -> u16;

    /// Latch a fatal diagnostic code and reset the device. The single
    /// user-visible failure behaviour of the firmware.
    fn report_fault(&mut self, code: FaultCode);
}
