//! NTAG215 emulation engine with multi-slot persistence.
//!
//! The crate answers NTAG215 commands against a 572 byte memory image, keeps seven tag images in
//! persistent storage and exposes the management protocol a companion app uses to enumerate, read,
//! write and move those images while the active one keeps being emulated.
//!
//! Hardware sits behind the traits in [`platform`], persistence behind [`store::BlobStore`]. The
//! [`device::Device`] ties everything together and is driven by the firmware's event loop.
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod command;
pub mod control;
pub mod device;
pub mod error;
pub mod image;
pub mod platform;
mod raw;
pub mod slots;
pub mod store;
pub mod switch;

/// Maximum name length is 15 bytes + 1 byte for the null terminator.
const MAX_NAME_LENGTH: usize = 15;
const MAX_NAME_NUL_TERMINATED_LENGTH: usize = MAX_NAME_LENGTH + 1;

/// A 16-byte name identifying a blob in a [`store::BlobStore`] (15 characters + null terminator)
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlobName([u8; MAX_NAME_NUL_TERMINATED_LENGTH]);

impl BlobName {
    /// Creates a 16 byte, null-padded name.
    ///
    /// Tip: use a const context if possible to ensure that the name is built at compile time:
    ///   `let name = const { BlobName::from_slice(b"tag0.bin") };`
    pub const fn from_slice(src: &[u8]) -> Self {
        assert!(src.len() <= MAX_NAME_LENGTH);
        let mut dst = [0u8; MAX_NAME_NUL_TERMINATED_LENGTH];
        let mut i = 0;
        while i < src.len() {
            dst[i] = src[i];
            i += 1;
        }
        Self(dst)
    }

    /// Creates a 16 byte, null-padded name.
    pub const fn from_str(s: &str) -> Self {
        Self::from_slice(s.as_bytes())
    }

    /// Like [`BlobName::from_slice`] but for names that are only known at runtime.
    pub fn try_from_slice(src: &[u8]) -> Result<Self, Error> {
        if src.len() > MAX_NAME_LENGTH {
            return Err(Error::NameTooLong);
        }
        Ok(Self::from_slice(src))
    }

    pub const fn as_bytes(&self) -> &[u8; MAX_NAME_NUL_TERMINATED_LENGTH] {
        &self.0
    }

    pub(crate) fn from_raw(raw: [u8; MAX_NAME_NUL_TERMINATED_LENGTH]) -> Result<Self, Error> {
        if raw[MAX_NAME_LENGTH] != b'\0' {
            return Err(Error::NameMalformed);
        }
        Ok(Self(raw))
    }
}

impl fmt::Debug for BlobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobName(b\"")?;

        // the terminator is always null, only the padding in front of it is interesting
        for &byte in self.0[..MAX_NAME_LENGTH].iter().take_while(|&&b| b != 0) {
            write!(f, "{}", core::ascii::escape_default(byte))?;
        }

        write!(f, "\")")
    }
}

impl AsRef<[u8]> for BlobName {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

extern crate alloc;

use crate::error::Error;
use core::fmt;

pub use command::{Mode, Response, Session};
pub use control::ControlHandler;
pub use device::{Device, Settings};
pub use image::{TagImage, Uid};
pub use slots::{Digest, SLOT_COUNT, Slot, SlotStore};
pub use store::{BlobStore, FlashStore, MemoryStore};
pub use switch::SlotSwitcher;
