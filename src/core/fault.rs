//! Fatal-condition reporting
//!
//! All unrecoverable conditions funnel through a single report call on
//! the platform (which resets the chip and latches the code for
//! post-mortem retrieval). Handlers that detect a fatal condition return
//! the code without mutating any state; the dispatcher is the one place
//! that reports it.

/// Diagnostic codes latched by the fault funnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultCode {
    /// GATT database registration failed at boot.
    DbRegistration,
    /// An event arrived in a state the transition table does not define.
    InvalidState,
    /// Link-layer whitelist add was rejected (capacity exhausted).
    AddWhitelist,
    /// The transport rejected a connection-parameter-update submission.
    ConnParamUpdate,
    /// Persistent store access failed.
    NvmAccess,
}

impl FaultCode {
    /// Stable numeric code reported to the platform fault latch.
    pub const fn code(self) -> u16 {
        match self {
            FaultCode::DbRegistration => 1,
            FaultCode::InvalidState => 2,
            FaultCode::AddWhitelist => 3,
            FaultCode::ConnParamUpdate => 4,
            FaultCode::NvmAccess => 5,
        }
    }
}
