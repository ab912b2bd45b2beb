use crate::BlobName;
use crate::error::Error;
use crate::platform::{AlignedOps, FnCrc32, Platform};
use alloc::vec;
use core::mem::size_of;
#[cfg(feature = "defmt")]
use defmt::trace;

pub(crate) const FLASH_SECTOR_SIZE: usize = 4096;
pub(crate) const RECORD_HEADER_SIZE: usize = 32;
pub(crate) const MAX_BLOB_SIZE: usize = FLASH_SECTOR_SIZE - RECORD_HEADER_SIZE;

const _: () = assert!(
    size_of::<u32>() * 4 + size_of::<BlobName>() == RECORD_HEADER_SIZE,
    "Record header layout must fill exactly 32 bytes"
);

const RSB_WRITTEN: u32 = 0x1;
const RSB_ERASED: u32 = 0x2;

#[derive(strum::FromRepr, strum::Display, Debug, PartialEq, Eq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub(crate) enum RecordState {
    // All bits set, default state after flash erase.
    Empty = u32::MAX,

    // Holds a blob. Set after the payload landed on the flash.
    Written = RecordState::Empty as u32 & !RSB_WRITTEN,

    // Blob was deleted, the sector has to be erased before it can be reused.
    Erased = RecordState::Written as u32 & !RSB_ERASED,
}

impl RecordState {
    /// Anything that is not a known state is garbage and treated like a deleted record.
    pub(crate) fn from_word(word: u32) -> Self {
        Self::from_repr(word).unwrap_or(RecordState::Erased)
    }
}

/// Header at the start of every sector. Stored little endian:
/// `state: u32, name: [u8; 16], len: u32, crc: u32, sequence: u32`
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct RecordHeader {
    pub(crate) state: RecordState,
    pub(crate) name: [u8; 16],
    pub(crate) len: u32,
    pub(crate) crc: u32,
    /// Increases with every write, the higher one wins if a blob is found twice.
    pub(crate) sequence: u32,
}

impl RecordHeader {
    pub(crate) fn new(name: &BlobName, payload: &[u8], sequence: u32, crc32: FnCrc32) -> Self {
        let mut header = Self {
            state: RecordState::Written,
            name: *name.as_bytes(),
            len: payload.len() as u32,
            crc: 0,
            sequence,
        };
        header.crc = header.calculate_crc32(crc32, payload);
        header
    }

    /// Covers everything but the state word, which changes on delete.
    pub(crate) fn calculate_crc32(&self, crc32: FnCrc32, payload: &[u8]) -> u32 {
        let mut result = u32::MAX;
        result = crc32(result, &self.name);
        result = crc32(result, &self.len.to_le_bytes());
        result = crc32(result, &self.sequence.to_le_bytes());
        crc32(result, payload)
    }

    pub(crate) fn to_bytes(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        raw[0..4].copy_from_slice(&(self.state as u32).to_le_bytes());
        raw[4..20].copy_from_slice(&self.name);
        raw[20..24].copy_from_slice(&self.len.to_le_bytes());
        raw[24..28].copy_from_slice(&self.crc.to_le_bytes());
        raw[28..32].copy_from_slice(&self.sequence.to_le_bytes());
        raw
    }

    pub(crate) fn from_bytes(raw: &[u8; RECORD_HEADER_SIZE]) -> Self {
        let word = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        let mut name = [0u8; 16];
        name.copy_from_slice(&raw[4..20]);
        Self {
            state: RecordState::from_word(word(0)),
            name,
            len: word(20),
            crc: word(24),
            sequence: word(28),
        }
    }

    pub(crate) fn blob_name(&self) -> Result<BlobName, Error> {
        BlobName::from_raw(self.name)
    }
}

#[inline(always)]
pub(crate) fn write_aligned<T: Platform>(
    hal: &mut T,
    offset: u32,
    bytes: &[u8],
) -> Result<(), T::Error> {
    #[cfg(feature = "defmt")]
    trace!("write_aligned @{:#08x}: [{}]", offset, bytes.len());

    if bytes.len().is_multiple_of(T::WRITE_SIZE) {
        hal.write(offset, bytes)
    } else {
        let pivot = T::align_write_floor(bytes.len());
        let header = &bytes[..pivot];
        let trailer = &bytes[pivot..];
        if !header.is_empty() {
            hal.write(offset, header)?;
        }

        // an all-ones trailer is already on the flash after the erase
        if trailer.iter().any(|&e| e != 0xFF) {
            let mut buf = vec![0xFFu8; T::WRITE_SIZE];
            buf[..trailer.len()].copy_from_slice(trailer);
            hal.write(offset + (pivot as u32), &buf)?
        }

        Ok(())
    }
}
