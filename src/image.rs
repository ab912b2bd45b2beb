//! Memory layout of an NTAG215 and the invariants the emulator keeps on it.
//!
//! ```text
//! bytes     page     content
//! 0..9      0..2     UID0-2, BCC0, UID3-6, BCC1
//! 9         2        internal
//! 10..12    2        static lock bytes
//! 12..16    3        capability container
//! 16..520   4..129   user memory
//! 520..523  130      dynamic lock bytes
//! 523       130      RFUI
//! 524..532  131..132 CFG0, CFG1
//! 532..536  133      PWD
//! 536..538  134      PACK
//! 538..540  134      RFUI
//! 540..572  135..142 originality signature
//! ```

use crate::error::Error;
use core::fmt;

pub const IMAGE_LEN: usize = 572;
pub const PAGE_SIZE: usize = 4;
pub const PAGE_COUNT: usize = IMAGE_LEN / PAGE_SIZE;
/// Highest page a reader may address while write protection is active.
pub const LAST_PAGE: u8 = 134;
pub const UID_LEN: usize = 7;

pub(crate) const BCC0_OFFSET: usize = 3;
pub(crate) const BCC1_OFFSET: usize = 8;
pub(crate) const INTERNAL_OFFSET: usize = 9;
pub(crate) const STATIC_LOCK_OFFSET: usize = 10;
pub(crate) const CAPABILITY_CONTAINER_OFFSET: usize = 12;
pub(crate) const USER_MEMORY_OFFSET: usize = 16;
pub(crate) const DYNAMIC_LOCK_OFFSET: usize = 520;
pub(crate) const CONFIG_OFFSET: usize = 523;
pub(crate) const PASSWORD_OFFSET: usize = 532;
pub(crate) const PACK_OFFSET: usize = 536;
pub(crate) const SIGNATURE_OFFSET: usize = 540;
pub(crate) const SIGNATURE_LEN: usize = 32;

const CASCADE_TAG: u8 = 0x88;

// static lock byte 0, bits 0-3: BL-CC, BL-9-4, BL-15-10, L-CC. Block locking of the lock bits
// themselves is not emulated.
const STATIC_LOCK0_RESERVED_BITS: u8 = 0b0000_1111;

const DYNAMIC_LOCK_BLOCK_PAGES: u8 = 16;
const DYNAMIC_LOCK_FIRST_PAGE: u8 = 16;
const DYNAMIC_LOCK_LAST_PAGE: u8 = 129;

/// Image fragments of a freshly formatted tag.
const TEMPLATE_UID_PREFIX: [u8; 3] = [0x48, 0x00, 0x00];
const TEMPLATE_HEADER: [u8; 10] = [0x48, 0x00, 0x00, 0xE1, 0x10, 0x3E, 0x00, 0x03, 0x00, 0xFE];
const TEMPLATE_CONFIG: [u8; 7] = [0xBD, 0x04, 0x00, 0x00, 0xFF, 0x00, 0x05];

/// The 7 byte UID without its check bytes.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uid(pub [u8; UID_LEN]);

/// A full NTAG215 memory image.
#[derive(Clone, PartialEq, Eq)]
pub struct TagImage([u8; IMAGE_LEN]);

impl TagImage {
    pub const fn blank() -> Self {
        Self([0u8; IMAGE_LEN])
    }

    /// An empty, NDEF formatted tag with valid check bytes.
    pub fn template() -> Self {
        let mut image = Self::blank();
        image.0[..TEMPLATE_UID_PREFIX.len()].copy_from_slice(&TEMPLATE_UID_PREFIX);
        image.0[INTERNAL_OFFSET..INTERNAL_OFFSET + TEMPLATE_HEADER.len()]
            .copy_from_slice(&TEMPLATE_HEADER);
        image.0[CONFIG_OFFSET..CONFIG_OFFSET + TEMPLATE_CONFIG.len()]
            .copy_from_slice(&TEMPLATE_CONFIG);
        image.repair_checksum();
        image
    }

    pub fn as_bytes(&self) -> &[u8; IMAGE_LEN] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; IMAGE_LEN] {
        &mut self.0
    }

    pub fn uid(&self) -> Uid {
        let d = &self.0;
        Uid([d[0], d[1], d[2], d[4], d[5], d[6], d[7]])
    }

    /// Stores `uid` and recomputes both check bytes.
    pub fn set_uid(&mut self, uid: &Uid) {
        let u = &uid.0;
        self.0[..BCC0_OFFSET].copy_from_slice(&u[..3]);
        self.0[BCC0_OFFSET + 1..BCC1_OFFSET].copy_from_slice(&u[3..]);
        self.repair_checksum();
    }

    /// Expected (BCC0, BCC1) for the UID currently stored.
    pub fn expected_bcc(&self) -> (u8, u8) {
        let d = &self.0;
        (
            d[0] ^ d[1] ^ d[2] ^ CASCADE_TAG,
            d[4] ^ d[5] ^ d[6] ^ d[7],
        )
    }

    /// Rewrites BCC0/BCC1 if they don't match the UID. Returns `true` if anything changed, in which
    /// case the radio has to be restarted with the corrected identity.
    pub fn repair_checksum(&mut self) -> bool {
        let (bcc0, bcc1) = self.expected_bcc();
        if self.0[BCC0_OFFSET] == bcc0 && self.0[BCC1_OFFSET] == bcc1 {
            return false;
        }

        #[cfg(feature = "defmt")]
        defmt::warn!(
            "repair_checksum: bcc {=u8:#x}/{=u8:#x} -> {=u8:#x}/{=u8:#x}",
            self.0[BCC0_OFFSET],
            self.0[BCC1_OFFSET],
            bcc0,
            bcc1
        );

        #[cfg(feature = "debug-logs")]
        println!("image: fixed bad bcc");

        self.0[BCC0_OFFSET] = bcc0;
        self.0[BCC1_OFFSET] = bcc1;
        true
    }

    /// Pages a restricted write must not touch.
    ///
    /// Pages 0 and 1 hold the UID and are always locked. The static lock bytes are always honored,
    /// the dynamic lock bits only while the reader has not authenticated.
    pub fn locked_pages(&self, authenticated: bool) -> PageSet {
        let mut locked = PageSet::new();
        locked.insert(0);
        locked.insert(1);

        let lock0 = self.0[STATIC_LOCK_OFFSET] & !STATIC_LOCK0_RESERVED_BITS;
        let lock1 = self.0[STATIC_LOCK_OFFSET + 1];
        for bit in 0..8u8 {
            if lock0 & (1 << bit) != 0 {
                // bits 4..7 lock pages 8..11
                locked.insert(bit + 4);
            }
            if lock1 & (1 << bit) != 0 {
                // L8..L15
                locked.insert(bit + 8);
            }
        }

        if !authenticated {
            let dynamic = self.0[DYNAMIC_LOCK_OFFSET];
            for bit in 0..8u8 {
                if dynamic & (1 << bit) == 0 {
                    continue;
                }
                let first = DYNAMIC_LOCK_FIRST_PAGE + bit * DYNAMIC_LOCK_BLOCK_PAGES;
                let last = (first + DYNAMIC_LOCK_BLOCK_PAGES - 1).min(DYNAMIC_LOCK_LAST_PAGE);
                locked.insert_range(first, last);
            }
        }

        locked
    }

    /// `len` bytes starting at `page`, or `None` if that runs past the end of the image.
    pub fn pages(&self, page: u8, len: usize) -> Option<&[u8]> {
        let start = page as usize * PAGE_SIZE;
        self.0.get(start..start.checked_add(len)?)
    }

    pub fn signature(&self) -> &[u8] {
        &self.0[SIGNATURE_OFFSET..SIGNATURE_OFFSET + SIGNATURE_LEN]
    }

    pub fn password(&self) -> &[u8] {
        &self.0[PASSWORD_OFFSET..PACK_OFFSET]
    }

    pub fn pack(&self) -> &[u8] {
        &self.0[PACK_OFFSET..PACK_OFFSET + 2]
    }
}

impl Default for TagImage {
    fn default() -> Self {
        Self::template()
    }
}

impl TryFrom<&[u8]> for TagImage {
    type Error = Error;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let raw: [u8; IMAGE_LEN] = value.try_into().map_err(|_| Error::CorruptedData)?;
        Ok(Self(raw))
    }
}

impl fmt::Debug for TagImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let uid = self.uid().0;
        f.write_fmt(format_args!(
            "TagImage {{ uid: {:02x?}, bcc: {:02x}/{:02x}, cc: {:02x?} }}",
            uid,
            self.0[BCC0_OFFSET],
            self.0[BCC1_OFFSET],
            &self.0[CAPABILITY_CONTAINER_OFFSET..USER_MEMORY_OFFSET]
        ))
    }
}

const PAGE_SET_WORDS: usize = PAGE_COUNT.div_ceil(64);

/// Bit set over all page indices of an image.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct PageSet([u64; PAGE_SET_WORDS]);

impl PageSet {
    pub const fn new() -> Self {
        Self([0; PAGE_SET_WORDS])
    }

    pub fn insert(&mut self, page: u8) {
        if (page as usize) < PAGE_COUNT {
            self.0[page as usize / 64] |= 1u64 << (page % 64);
        }
    }

    /// Inserts `first..=last`.
    pub fn insert_range(&mut self, first: u8, last: u8) {
        for page in first..=last {
            self.insert(page);
        }
    }

    pub fn contains(&self, page: u8) -> bool {
        (page as usize) < PAGE_COUNT && self.0[page as usize / 64] & (1u64 << (page % 64)) != 0
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&w| w == 0)
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..PAGE_COUNT as u8).filter(|&page| self.contains(page))
    }
}

impl fmt::Debug for PageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
