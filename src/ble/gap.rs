//! GAP Primitives
//!
//! Device addresses, identity keys and connection-parameter types shared
//! by the state machine, the negotiator and the bond store.

/// 48-bit Bluetooth device address, least-significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BdAddr(pub [u8; 6]);

/// GAP address type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddrType {
    #[default]
    Public,
    Random,
}

/// Address together with its type, as carried in link-layer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TypedBdAddr {
    pub addr_type: AddrType,
    pub addr: BdAddr,
}

impl TypedBdAddr {
    pub const fn new(addr_type: AddrType, addr: [u8; 6]) -> Self {
        Self {
            addr_type,
            addr: BdAddr(addr),
        }
    }

    /// Resolvable private addresses are random-type with the two most
    /// significant address bits set to 0b01 (Core 4.0 Vol 3 Part C
    /// section 10.8.2). They rotate, so they are matched against the
    /// peer's IRK instead of being whitelisted verbatim.
    pub fn is_resolvable_private(&self) -> bool {
        self.addr_type == AddrType::Random && (self.addr.0[5] & 0xC0) == 0x40
    }
}

/// 128-bit identity resolving key, stored as eight NVM words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Irk(pub [u16; 8]);

/// Parameters of a live link. Interval and latency in 1.25 ms units and
/// connection events respectively; supervision timeout in 10 ms units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    pub interval: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// Parameter window submitted in a connection-parameter-update request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParamReq {
    pub min_interval: u16,
    pub max_interval: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// Preferred window the application holds live links against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParamRange {
    pub min_interval: u16,
    pub max_interval: u16,
    /// Minimum acceptable slave latency; zero disables the check.
    pub latency: u16,
}

impl ConnParamRange {
    /// Whether negotiated parameters satisfy this window.
    pub fn complies(&self, params: &ConnParams) -> bool {
        if params.interval < self.min_interval || params.interval > self.max_interval {
            return false;
        }
        if self.latency > 0 && params.latency < self.latency {
            return false;
        }
        true
    }
}

/// Reason delivered with a disconnect-complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisconnectReason {
    /// Link loss: no packet inside the supervision timeout.
    SupervisionTimeout,
    /// This device requested the disconnect.
    LocalHost,
    /// The remote host terminated the connection.
    RemoteHost,
}

/// Advertising rate selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvertKind {
    Fast,
    Slow,
}
