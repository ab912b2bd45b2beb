//! Persistent blob storage. Slot images and the device name are kept as independent, named blobs.

use crate::BlobName;
use crate::error::Error;
use crate::platform::{AlignedOps, Platform};
use crate::raw::{
    FLASH_SECTOR_SIZE, MAX_BLOB_SIZE, RECORD_HEADER_SIZE, RecordHeader, RecordState,
    write_aligned,
};
use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

pub trait BlobStore {
    /// Returns `None` if nothing is stored under `name`.
    fn read_blob(&mut self, name: &BlobName) -> Result<Option<Vec<u8>>, Error>;

    /// Replaces whatever is stored under `name`. Durable once this returns.
    fn write_blob(&mut self, name: &BlobName, data: &[u8]) -> Result<(), Error>;

    /// Ignores missing blobs.
    fn erase_blob(&mut self, name: &BlobName) -> Result<(), Error>;
}

impl<S: BlobStore> BlobStore for &mut S {
    fn read_blob(&mut self, name: &BlobName) -> Result<Option<Vec<u8>>, Error> {
        (*self).read_blob(name)
    }

    fn write_blob(&mut self, name: &BlobName, data: &[u8]) -> Result<(), Error> {
        (*self).write_blob(name, data)
    }

    fn erase_blob(&mut self, name: &BlobName) -> Result<(), Error> {
        (*self).erase_blob(name)
    }
}

/// Volatile store for hosts and tests.
#[derive(Default, Debug, Clone)]
pub struct MemoryStore {
    blobs: BTreeMap<BlobName, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn contains(&self, name: &BlobName) -> bool {
        self.blobs.contains_key(name)
    }
}

impl BlobStore for MemoryStore {
    fn read_blob(&mut self, name: &BlobName) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.blobs.get(name).cloned())
    }

    fn write_blob(&mut self, name: &BlobName, data: &[u8]) -> Result<(), Error> {
        self.blobs.insert(*name, data.to_vec());
        Ok(())
    }

    fn erase_blob(&mut self, name: &BlobName) -> Result<(), Error> {
        self.blobs.remove(name);
        Ok(())
    }
}

#[derive(Copy, Clone, PartialEq)]
struct Record {
    name: BlobName,
    sequence: u32,
}

/// Stores one blob per flash sector.
///
/// A sector starts with a 32 byte header followed by the payload. Overwriting a blob writes the new
/// copy to a free sector first and only then retires the old one, so an interrupted write leaves
/// the previous value readable. On startup all sector headers are scanned, duplicates resolved by
/// their sequence number and stale copies retired.
pub struct FlashStore<T: Platform> {
    hal: T,
    base_address: usize,
    faulted: bool,
    next_sequence: u32,
    sectors: Vec<Option<Record>>,
}

impl<T: Platform> FlashStore<T> {
    pub fn new(partition_offset: usize, partition_size: usize, hal: T) -> Result<Self, Error> {
        if !partition_offset.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(Error::InvalidPartitionOffset);
        }

        if partition_size == 0 || !partition_size.is_multiple_of(FLASH_SECTOR_SIZE) {
            return Err(Error::InvalidPartitionSize);
        }

        let sectors = partition_size / FLASH_SECTOR_SIZE;

        let mut store = Self {
            hal,
            base_address: partition_offset,
            faulted: false,
            next_sequence: 0,
            sectors: vec![None; sectors],
        };

        let result = store.load_sectors();
        store.latch(result)?;
        Ok(store)
    }

    /// Names of all stored blobs, in sector order.
    pub fn names(&self) -> impl Iterator<Item = &BlobName> + '_ {
        self.sectors.iter().flatten().map(|record| &record.name)
    }

    pub fn free_sectors(&self) -> usize {
        self.sectors.iter().filter(|s| s.is_none()).count()
    }

    /// Gives the flash back, e.g. to reopen the partition.
    pub fn release(self) -> T {
        self.hal
    }

    pub fn hal_mut(&mut self) -> &mut T {
        &mut self.hal
    }

    fn latch<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if matches!(result, Err(Error::FlashError)) {
            self.faulted = true;
        }
        result
    }

    fn sector_address(&self, index: usize) -> u32 {
        (self.base_address + index * FLASH_SECTOR_SIZE) as u32
    }

    fn find(&self, name: &BlobName) -> Option<usize> {
        self.sectors
            .iter()
            .position(|s| s.is_some_and(|record| record.name == *name))
    }

    fn load_sectors(&mut self) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("load_sectors: {} sectors", self.sectors.len());

        for index in 0..self.sectors.len() {
            let header = self.read_header(index)?;
            if header.state != RecordState::Written {
                continue;
            }

            let Ok(name) = header.blob_name() else {
                #[cfg(feature = "defmt")]
                warn!("load_sectors: malformed name in sector {}", index);
                continue;
            };

            self.next_sequence = self.next_sequence.max(header.sequence.wrapping_add(1));
            let record = Record {
                name,
                sequence: header.sequence,
            };

            match self.find(&name) {
                None => self.sectors[index] = Some(record),
                Some(other) => {
                    #[cfg(feature = "debug-logs")]
                    println!("  FlashStore: duplicate {:?} in sectors {} and {}", name, other, index);

                    let older_sequence = self.sectors[other].map_or(0, |r| r.sequence);
                    if header.sequence > older_sequence {
                        self.retire(other)?;
                        self.sectors[index] = Some(record);
                    } else {
                        self.retire(index)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn read_header(&mut self, index: usize) -> Result<RecordHeader, Error> {
        let mut raw = [0u8; RECORD_HEADER_SIZE];
        let address = self.sector_address(index);
        self.hal
            .read(address, &mut raw)
            .map_err(|_| Error::FlashError)?;
        Ok(RecordHeader::from_bytes(&raw))
    }

    /// Marks the record in sector `index` as deleted without erasing it.
    fn retire(&mut self, index: usize) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("retire: sector {}", index);

        let state = (RecordState::Erased as u32).to_le_bytes();
        let address = self.sector_address(index);
        write_aligned(&mut self.hal, address, &state).map_err(|_| Error::FlashError)?;
        self.sectors[index] = None;
        Ok(())
    }

    fn read_record(&mut self, index: usize) -> Result<Vec<u8>, Error> {
        let header = self.read_header(index)?;
        let len = header.len as usize;
        if len > MAX_BLOB_SIZE {
            return Err(Error::CorruptedData);
        }

        let mut buf = vec![0u8; T::align_read(len)];
        if !buf.is_empty() {
            let address = self.sector_address(index) + RECORD_HEADER_SIZE as u32;
            self.hal
                .read(address, &mut buf)
                .map_err(|_| Error::FlashError)?;
        }
        buf.truncate(len);

        if header.calculate_crc32(T::crc32, &buf) != header.crc {
            #[cfg(feature = "defmt")]
            warn!("read_record: crc mismatch in sector {}", index);
            return Err(Error::CorruptedData);
        }

        Ok(buf)
    }

    fn write_record(&mut self, name: &BlobName, data: &[u8]) -> Result<(), Error> {
        if data.len() > MAX_BLOB_SIZE {
            return Err(Error::BlobTooLarge);
        }

        let previous = self.find(name);
        let target = self
            .sectors
            .iter()
            .position(Option::is_none)
            .or(previous)
            .ok_or(Error::StorageFull)?;

        #[cfg(feature = "defmt")]
        trace!("write_record: {} bytes to sector {}", data.len(), target);

        #[cfg(feature = "debug-logs")]
        println!("  FlashStore: write {:?} [{}] to sector {}", name, data.len(), target);

        let address = self.sector_address(target);
        self.hal
            .erase(address, address + FLASH_SECTOR_SIZE as u32)
            .map_err(|_| Error::FlashError)?;
        self.sectors[target] = None;

        // payload first, a sector only counts once its header is complete
        if !data.is_empty() {
            write_aligned(&mut self.hal, address + RECORD_HEADER_SIZE as u32, data)
                .map_err(|_| Error::FlashError)?;
        }

        let sequence = self.next_sequence;
        let header = RecordHeader::new(name, data, sequence, T::crc32);
        write_aligned(&mut self.hal, address, &header.to_bytes())
            .map_err(|_| Error::FlashError)?;
        self.next_sequence = sequence.wrapping_add(1);
        self.sectors[target] = Some(Record {
            name: *name,
            sequence,
        });

        if let Some(previous) = previous {
            if previous != target {
                self.retire(previous)?;
            }
        }

        Ok(())
    }
}

impl<T: Platform> BlobStore for FlashStore<T> {
    fn read_blob(&mut self, name: &BlobName) -> Result<Option<Vec<u8>>, Error> {
        let Some(index) = self.find(name) else {
            return Ok(None);
        };
        let result = self.read_record(index);
        self.latch(result).map(Some)
    }

    fn write_blob(&mut self, name: &BlobName, data: &[u8]) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }
        let result = self.write_record(name, data);
        self.latch(result)
    }

    fn erase_blob(&mut self, name: &BlobName) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::FlashError);
        }
        let Some(index) = self.find(name) else {
            return Ok(());
        };
        let result = self.retire(index);
        self.latch(result)
    }
}
