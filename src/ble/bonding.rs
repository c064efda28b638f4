//! Bond Storage
//!
//! The single persisted bond: peer identity, key diversifier and
//! (for resolvable-address peers) the identity resolving key. This type
//! is the only writer of the bond-region NVM offsets, and every mutation
//! that matters across a power cycle is written through synchronously —
//! bonding fields are never deferred.

use log::{debug, info};

use crate::ble::gap::{AddrType, BdAddr, Irk, TypedBdAddr};
use crate::ble::stack::DivVerdict;
use crate::core::layout::{Field, IRK_WORDS};
use crate::core::nvm::{read_word, write_word, NvmError, NvmStore, Word};

/// Persisted pairing outcome. At most one exists system-wide; a new
/// successful pairing overwrites the previous peer entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BondRecord {
    pub bonded: bool,
    pub addr: TypedBdAddr,
    pub diversifier: u16,
    /// Meaningful only while `bonded` and `addr` is resolvable-private.
    pub irk: Irk,
}

/// RAM mirror of the bond record plus its write-through persistence.
#[derive(Debug)]
pub struct BondStore {
    record: BondRecord,
}

impl BondStore {
    /// Seed the store from NVM at boot. When the region was freshly
    /// initialised, defaults (unbonded, zero diversifier) are written
    /// out; otherwise fields are read back from their layout offsets.
    pub fn load(nvm: &mut dyn NvmStore, fresh: bool) -> Result<Self, NvmError> {
        if fresh {
            let store = Self {
                record: BondRecord::default(),
            };
            write_word(nvm, Field::BondedFlag, 0)?;
            write_word(nvm, Field::Diversifier, 0)?;
            info!("BOND: region fresh, starting unbonded");
            return Ok(store);
        }

        let bonded = read_word(nvm, Field::BondedFlag)? != 0;
        let mut record = BondRecord {
            bonded,
            ..BondRecord::default()
        };

        if bonded {
            // The peer address is only valid while the bonded flag is
            // set; an unbonded region may hold stale words there.
            record.addr = read_addr(nvm)?;
            if record.addr.is_resolvable_private() {
                record.irk = read_irk(nvm)?;
            }
        }

        // The diversifier of the last derived LTK survives even an
        // unbonded power cycle; the approval check gates its use.
        record.diversifier = read_word(nvm, Field::Diversifier)?;

        info!(
            "BOND: loaded, bonded={} diversifier={:#06x}",
            record.bonded, record.diversifier
        );
        Ok(Self { record })
    }

    pub fn record(&self) -> &BondRecord {
        &self.record
    }

    pub fn is_bonded(&self) -> bool {
        self.record.bonded
    }

    /// Persist a successful pairing, overwriting any previous bond.
    pub fn store_pairing(&mut self, nvm: &mut dyn NvmStore, peer: TypedBdAddr) -> Result<(), NvmError> {
        self.record.bonded = true;
        self.record.addr = peer;
        write_word(nvm, Field::BondedFlag, 1)?;
        write_addr(nvm, &peer)?;
        info!("BOND: bonded to peer (resolvable={})", peer.is_resolvable_private());
        Ok(())
    }

    /// Persist the diversifier of a freshly derived LTK.
    pub fn store_diversifier(&mut self, nvm: &mut dyn NvmStore, diversifier: u16) -> Result<(), NvmError> {
        self.record.diversifier = diversifier;
        write_word(nvm, Field::Diversifier, diversifier)?;
        debug!("BOND: stored diversifier {:#06x}", diversifier);
        Ok(())
    }

    /// Persist the peer's identity resolving key.
    pub fn store_irk(&mut self, nvm: &mut dyn NvmStore, irk: Irk) -> Result<(), NvmError> {
        self.record.irk = irk;
        nvm.write(Field::Irk.offset(), &irk.0)?;
        debug!("BOND: stored identity resolving key");
        Ok(())
    }

    /// Drop the bond (association reset / user-requested removal).
    pub fn clear(&mut self, nvm: &mut dyn NvmStore) -> Result<(), NvmError> {
        self.record = BondRecord::default();
        write_word(nvm, Field::BondedFlag, 0)?;
        write_word(nvm, Field::Diversifier, 0)?;
        info!("BOND: cleared");
        Ok(())
    }

    /// Gate link-layer reuse of a previously derived key. Approved only
    /// while a bond exists and the candidate matches the stored tag
    /// exactly — the bond may have been cleared since the session began.
    pub fn approve_diversifier(&self, candidate: u16) -> DivVerdict {
        if self.record.bonded && self.record.diversifier == candidate {
            DivVerdict::Approved
        } else {
            DivVerdict::Revoked
        }
    }
}

/* Field serialisation. The typed address packs into four words (type,
 * then the 48-bit address little-endian); the IRK is stored as its
 * eight words verbatim.
 */

fn addr_to_words(addr: &TypedBdAddr) -> [Word; 4] {
    let a = addr.addr.0;
    [
        match addr.addr_type {
            AddrType::Public => 0,
            AddrType::Random => 1,
        },
        u16::from_le_bytes([a[0], a[1]]),
        u16::from_le_bytes([a[2], a[3]]),
        u16::from_le_bytes([a[4], a[5]]),
    ]
}

fn addr_from_words(words: &[Word; 4]) -> TypedBdAddr {
    let mut a = [0u8; 6];
    a[0..2].copy_from_slice(&words[1].to_le_bytes());
    a[2..4].copy_from_slice(&words[2].to_le_bytes());
    a[4..6].copy_from_slice(&words[3].to_le_bytes());
    TypedBdAddr {
        addr_type: if words[0] == 0 {
            AddrType::Public
        } else {
            AddrType::Random
        },
        addr: BdAddr(a),
    }
}

fn write_addr(nvm: &mut dyn NvmStore, addr: &TypedBdAddr) -> Result<(), NvmError> {
    nvm.write(Field::BondedAddr.offset(), &addr_to_words(addr))
}

fn read_addr(nvm: &dyn NvmStore) -> Result<TypedBdAddr, NvmError> {
    let mut words = [0u16; 4];
    nvm.read(Field::BondedAddr.offset(), &mut words)?;
    Ok(addr_from_words(&words))
}

fn read_irk(nvm: &dyn NvmStore) -> Result<Irk, NvmError> {
    let mut words = [0u16; IRK_WORDS];
    nvm.read(Field::Irk.offset(), &mut words)?;
    Ok(Irk(words))
}
