//! Non-Volatile Store Access
//!
//! The NVM is a word-addressable region reached through the
//! [`NvmStore`] trait; reads and writes are synchronous and complete
//! before the call returns. Security-relevant fields are written through
//! at the point of mutation — only high-churn application payload (lamp
//! colour) is allowed to defer behind a debounce timer.

use log::warn;

use crate::core::fault::FaultCode;
use crate::core::layout::{Field, NVM_LAYOUT_VERSION, NVM_SANITY_MAGIC};

/// NVM word size used throughout the region.
pub type Word = u16;

/// Errors surfaced by the NVM block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmError {
    /// Access beyond the configured region.
    OutOfRange,
    /// The device reported a read/write/erase failure.
    Access,
}

impl From<NvmError> for FaultCode {
    fn from(_: NvmError) -> Self {
        FaultCode::NvmAccess
    }
}

/// Word-addressable non-volatile region.
pub trait NvmStore {
    fn read(&self, offset: usize, buf: &mut [Word]) -> Result<(), NvmError>;
    fn write(&mut self, offset: usize, data: &[Word]) -> Result<(), NvmError>;
    /// Erase the whole region to the unprogrammed state (0xFFFF).
    fn erase(&mut self) -> Result<(), NvmError>;
}

/// Read a single-word field.
pub fn read_word(nvm: &dyn NvmStore, field: Field) -> Result<Word, NvmError> {
    let mut buf = [0u16; 1];
    nvm.read(field.offset(), &mut buf)?;
    Ok(buf[0])
}

/// Write a single-word field.
pub fn write_word(nvm: &mut dyn NvmStore, field: Field, value: Word) -> Result<(), NvmError> {
    nvm.write(field.offset(), &[value])
}

/// Validate the region tags, erasing and re-marking the region when they
/// do not match.
///
/// Returns `true` when the region was (re)initialised and every field
/// owner must write its defaults, `false` when existing contents are
/// trustworthy. There is deliberately no partial-recovery path: a wrong
/// version or sanity word throws the whole region away.
pub fn boot_region(nvm: &mut dyn NvmStore) -> Result<bool, NvmError> {
    let version = read_word(nvm, Field::LayoutVersion)?;
    if version != NVM_LAYOUT_VERSION {
        warn!(
            "NVM: layout version {} != {}, erasing region",
            version, NVM_LAYOUT_VERSION
        );
        nvm.erase()?;
        write_word(nvm, Field::LayoutVersion, NVM_LAYOUT_VERSION)?;
    }

    let sanity = read_word(nvm, Field::Sanity)?;
    if sanity != NVM_SANITY_MAGIC {
        warn!("NVM: sanity word {:#06x} invalid, starting fresh", sanity);
        write_word(nvm, Field::Sanity, NVM_SANITY_MAGIC)?;
        return Ok(true);
    }

    Ok(false)
}
