use crate::BlobName;
use crate::error::Error;
use crate::image::{IMAGE_LEN, TagImage};
use crate::store::BlobStore;
#[cfg(feature = "defmt")]
use defmt::{info, trace, warn};

pub const SLOT_COUNT: usize = 7;
pub const DIGEST_LEN: usize = 80;

const SLOT_NAMES: [BlobName; SLOT_COUNT] = [
    BlobName::from_str("tag0.bin"),
    BlobName::from_str("tag1.bin"),
    BlobName::from_str("tag2.bin"),
    BlobName::from_str("tag3.bin"),
    BlobName::from_str("tag4.bin"),
    BlobName::from_str("tag5.bin"),
    BlobName::from_str("tag6.bin"),
];

/// (image offset, digest offset, length) of every range copied into a digest. Digest bytes 16..20
/// stay zero.
const DIGEST_LAYOUT: [(usize, usize, usize); 5] = [
    (0, 0, 8),    // UID, BCC0, first half of the second UID block
    (16, 8, 8),   // start of the NDEF area
    (32, 20, 20), // application header
    (84, 40, 8),  // application identifier
    (96, 48, 32), // application data
];

/// Index of one of the [`SLOT_COUNT`] persisted tag images.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Slot(u8);

impl Slot {
    pub const fn new(index: u8) -> Result<Self, Error> {
        if (index as usize) < SLOT_COUNT {
            Ok(Self(index))
        } else {
            Err(Error::InvalidSlot(index))
        }
    }

    /// `index` if it is valid, `fallback` otherwise.
    pub fn or(index: u8, fallback: Slot) -> Self {
        Self::new(index).unwrap_or(fallback)
    }

    pub const fn index(self) -> u8 {
        self.0
    }

    /// The following slot, wrapping from the last one back to 0.
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % SLOT_COUNT as u8)
    }

    pub fn all() -> impl Iterator<Item = Slot> {
        (0..SLOT_COUNT as u8).map(Slot)
    }

    fn blob_name(self) -> &'static BlobName {
        &SLOT_NAMES[self.0 as usize]
    }
}

/// A fixed selection of image bytes, enough for the companion app to identify a slot's content
/// without transferring the whole image.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub fn of(image: &TagImage) -> Self {
        let raw = image.as_bytes();
        let mut digest = [0u8; DIGEST_LEN];
        for (from, to, len) in DIGEST_LAYOUT {
            digest[to..to + len].copy_from_slice(&raw[from..from + len]);
        }
        Self(digest)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }
}

/// Keeps the tag images of all slots in a [`BlobStore`] and a digest of each in memory.
///
/// The digests are a cache: they are rebuilt from the stored images by [`SlotStore::new`] and
/// refreshed on every [`SlotStore::save`].
pub struct SlotStore<S: BlobStore> {
    store: S,
    digests: [Option<Digest>; SLOT_COUNT],
    revisions: [u32; SLOT_COUNT],
}

impl<S: BlobStore> SlotStore<S> {
    /// Loads every slot, materializing and persisting the default template for slots that have
    /// never been written. Afterwards every slot is readable.
    pub fn new(store: S) -> Result<Self, Error> {
        let mut slots = Self {
            store,
            digests: Default::default(),
            revisions: [0; SLOT_COUNT],
        };

        for slot in Slot::all() {
            let image = slots.load(slot)?;
            slots.digests[slot.index() as usize] = Some(Digest::of(&image));
        }

        Ok(slots)
    }

    /// Reads the persisted image of `slot`. A missing or truncated image is replaced by the default
    /// template, which is persisted right away.
    pub fn load(&mut self, slot: Slot) -> Result<TagImage, Error> {
        #[cfg(feature = "defmt")]
        trace!("load: {}", slot);

        match self.store.read_blob(slot.blob_name()) {
            Ok(Some(raw)) if raw.len() == IMAGE_LEN => TagImage::try_from(raw.as_slice()),
            Ok(None) => self.materialize(slot),
            Ok(Some(_)) | Err(Error::CorruptedData) => {
                #[cfg(feature = "defmt")]
                warn!("load: {} is corrupted, resetting", slot);

                #[cfg(feature = "debug-logs")]
                println!("slots: {slot:?} is corrupted, resetting");

                self.materialize(slot)
            }
            Err(e) => Err(e),
        }
    }

    /// Persists `image` for `slot` and refreshes the slot's digest.
    pub fn save(&mut self, slot: Slot, image: &TagImage) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        info!("save: {}", slot);

        #[cfg(feature = "debug-logs")]
        println!("slots: save {slot:?}");

        self.store.write_blob(slot.blob_name(), image.as_bytes())?;
        let index = slot.index() as usize;
        self.digests[index] = Some(Digest::of(image));
        self.revisions[index] = self.revisions[index].wrapping_add(1);
        Ok(())
    }

    /// Copies the persisted image of `from` into `to`.
    pub fn copy(&mut self, from: Slot, to: Slot) -> Result<(), Error> {
        let image = self.load(from)?;
        self.save(to, &image)
    }

    /// Cached digest of `slot`. `None` only for slots that were never saved.
    pub fn digest(&self, slot: Slot) -> Option<&Digest> {
        self.digests[slot.index() as usize].as_ref()
    }

    /// Bumped on every save of `slot`. Lets a holder of a loaded image tell whether the stored copy
    /// has changed since.
    pub fn revision(&self, slot: Slot) -> u32 {
        self.revisions[slot.index() as usize]
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn materialize(&mut self, slot: Slot) -> Result<TagImage, Error> {
        let image = TagImage::template();
        self.save(slot, &image)?;
        Ok(image)
    }
}
