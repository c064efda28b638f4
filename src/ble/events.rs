//! Inbound Radio-Stack Events
//!
//! Everything the link layer, GATT entity and security manager deliver
//! to the application, mapped onto one tagged enum so the dispatch shim
//! can route it through a single surface. Timer expiries arrive here too
//! — the execution model has exactly one entry point.

use heapless::Vec;

use crate::ble::gap::{ConnParams, DisconnectReason, Irk, TypedBdAddr};
use crate::core::timer::TimerToken;

/// Largest attribute value carried in an access indication (default ATT
/// MTU minus the opcode/handle overhead).
pub const MAX_ACCESS_VALUE_LEN: usize = 20;

/// Attribute access flag bits, as delivered by the GATT entity.
pub const ACCESS_READ: u16 = 0x0001;
pub const ACCESS_WRITE: u16 = 0x0002;
pub const ACCESS_WRITE_COMPLETE: u16 = 0x0004;
pub const ACCESS_PERMISSION: u16 = 0x0008;

/// Outcome of a pairing procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingStatus {
    Success,
    /// The peer failed pairing too many times in a row.
    RepeatedAttempts,
    /// Any other failure, with the raw security-manager status code.
    Failed(u16),
}

/// Key material distributed at the end of key exchange. Either key may
/// be absent depending on what the peer chose to distribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SmKeys {
    pub diversifier: Option<u16>,
    pub irk: Option<Irk>,
}

/// Attribute access indication payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessInd {
    pub cid: u16,
    pub handle: u16,
    pub flags: u16,
    pub value: Vec<u8, MAX_ACCESS_VALUE_LEN>,
}

/// One inbound event from the radio stack (or a timer expiry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    /// GATT database registration confirmation.
    AddDbCfm { success: bool },
    /// Result of a connection attempt against our adverts.
    ConnectCfm {
        success: bool,
        cid: u16,
        peer: TypedBdAddr,
    },
    /// Link established; carries the initial link parameters.
    ConnectionComplete { params: ConnParams },
    /// Link parameters changed (our request or central-initiated).
    ConnectionUpdate { params: ConnParams },
    /// An advertising round was cancelled.
    CancelConnectCfm,
    /// Disconnect procedure finished.
    DisconnectComplete { reason: DisconnectReason },
    /// The peer started 'Just Works' pairing and wants authorisation.
    PairingAuthInd { auth_handle: u16 },
    /// Pairing procedure finished.
    PairingCompleteInd {
        status: PairingStatus,
        peer: TypedBdAddr,
    },
    /// Key distribution delivered key material.
    KeysInd { keys: SmKeys },
    /// The link layer asks whether a previously derived key (tagged by
    /// this diversifier) may be used to re-encrypt without pairing.
    DivApproveInd { cid: u16, diversifier: u16 },
    /// Attribute read/write against application-owned handles.
    AccessInd(AccessInd),
    /// Confirmation of our connection-parameter-update request.
    ParamUpdateCfm { success: bool },
    /// The central applied a parameter update on its own initiative.
    ParamUpdateInd,
    /// One-shot timer expiry.
    Timer { token: TimerToken },
}
