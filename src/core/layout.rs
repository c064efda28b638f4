//! NVM Region Layout
//!
//! Declarative descriptor for the application's NVM region: an ordered
//! list of named, fixed-size fields from which word offsets are derived
//! additively. Adding, removing or resizing a field changes offsets for
//! everything after it, so any such edit must bump
//! [`NVM_LAYOUT_VERSION`]; a version mismatch at boot erases and
//! reinitialises the whole region rather than reading shifted fields.

/// Magic word that marks the region as initialised by this application.
pub const NVM_SANITY_MAGIC: u16 = 0xAB18;

/// Version tag of the layout below.
pub const NVM_LAYOUT_VERSION: u16 = 2;

/// Fields of the application NVM region, in storage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Field {
    /// Layout version tag; checked before anything else is read.
    LayoutVersion,
    /// Sanity magic distinguishing an initialised region from noise.
    Sanity,
    /// Bond present flag (0 or 1).
    BondedFlag,
    /// Typed address of the bonded peer: type word + 48-bit address.
    BondedAddr,
    /// Key diversifier of the distributed LTK.
    Diversifier,
    /// Identity resolving key of the bonded peer.
    Irk,
    /// Mesh association state.
    AssociationState,
    /// CSRmesh device UUID.
    DeviceUuid,
    /// CSRmesh authorisation code.
    AuthCode,
    /// Group assignment tables, one per supported model.
    LightModelGroups,
    PowerModelGroups,
    AttentionModelGroups,
    /// Byte-packed RGB + power state pair of words.
    RgbData,
    /// Bearer model state (promiscuous, enabled mask, relay mask).
    BearerState,
}

/// Group table length per model.
pub const MAX_MODEL_GROUPS: usize = 4;

/// IRK size in NVM words.
pub const IRK_WORDS: usize = 8;

/// Device UUID size in NVM words.
pub const DEVICE_UUID_WORDS: usize = 8;

/// Authorisation code size in NVM words.
pub const AUTH_CODE_WORDS: usize = 4;

const ORDER: [Field; 14] = [
    Field::LayoutVersion,
    Field::Sanity,
    Field::BondedFlag,
    Field::BondedAddr,
    Field::Diversifier,
    Field::Irk,
    Field::AssociationState,
    Field::DeviceUuid,
    Field::AuthCode,
    Field::LightModelGroups,
    Field::PowerModelGroups,
    Field::AttentionModelGroups,
    Field::RgbData,
    Field::BearerState,
];

impl Field {
    /// Field size in 16-bit NVM words.
    pub const fn words(self) -> usize {
        match self {
            Field::LayoutVersion => 1,
            Field::Sanity => 1,
            Field::BondedFlag => 1,
            Field::BondedAddr => 4,
            Field::Diversifier => 1,
            Field::Irk => IRK_WORDS,
            Field::AssociationState => 1,
            Field::DeviceUuid => DEVICE_UUID_WORDS,
            Field::AuthCode => AUTH_CODE_WORDS,
            Field::LightModelGroups => MAX_MODEL_GROUPS,
            Field::PowerModelGroups => MAX_MODEL_GROUPS,
            Field::AttentionModelGroups => MAX_MODEL_GROUPS,
            Field::RgbData => 2,
            Field::BearerState => 3,
        }
    }

    /// Word offset of this field, summed over everything before it.
    pub const fn offset(self) -> usize {
        let mut off = 0;
        let mut i = 0;
        while i < ORDER.len() {
            if ORDER[i] as usize == self as usize {
                return off;
            }
            off += ORDER[i].words();
            i += 1;
        }
        off
    }
}

/// Total words the application claims; the mesh stack region starts here.
pub const NVM_APP_WORDS: usize = {
    let mut total = 0;
    let mut i = 0;
    while i < ORDER.len() {
        total += ORDER[i].words();
        i += 1;
    }
    total
};
