#![allow(dead_code)]

// filename according to https://doc.rust-lang.org/book/ch11-03-test-organization.html
use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash,
};
use ntag_emu::image::{IMAGE_LEN, TagImage, Uid};
use ntag_emu::platform::{ControlLink, Indicators, NfcRadio};
use ntag_emu::slots::SlotStore;
use ntag_emu::{MemoryStore, Response, Session, Slot};

pub const FLASH_SECTOR_SIZE: usize = 4096;
pub const WORD_SIZE: usize = 4;
pub const RECORD_HEADER_SIZE: usize = 32;

#[derive(Default)]
pub struct Flash {
    pub buf: Vec<u8>,
    pub fail_after_operation: usize,
    pub operations: Vec<Operation>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Operation {
    Read { offset: u32, len: usize },
    Write { offset: u32, len: usize },
    Erase { offset: u32, len: usize },
}

impl Flash {
    pub fn new(sectors: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation: usize::MAX,
            ..Default::default()
        }
    }

    pub fn new_with_fault(sectors: usize, fail_after_operation: usize) -> Self {
        Self {
            buf: vec![0xffu8; FLASH_SECTOR_SIZE * sectors],
            fail_after_operation,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn sector(&self, index: usize) -> &[u8] {
        &self.buf[index * FLASH_SECTOR_SIZE..(index + 1) * FLASH_SECTOR_SIZE]
    }

    pub fn erases(&self) -> usize {
        self.operations
            .iter()
            .filter(|op| matches!(op, Operation::Erase { .. }))
            .count()
    }
}

#[derive(Debug)]
pub struct FlashError;

impl NorFlashError for FlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

impl ErrorType for Flash {
    type Error = FlashError;
}

impl ReadNorFlash for Flash {
    const READ_SIZE: usize = WORD_SIZE;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::READ_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::READ_SIZE));

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }
        self.operations.push(Operation::Read {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        bytes.copy_from_slice(&self.buf[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.buf.len()
    }
}

impl NorFlash for Flash {
    const WRITE_SIZE: usize = WORD_SIZE;

    const ERASE_SIZE: usize = FLASH_SECTOR_SIZE;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        assert!(from.is_multiple_of(Self::ERASE_SIZE as _));
        assert!(to.is_multiple_of(Self::ERASE_SIZE as _));

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Erase {
            offset: from,
            len: (to - from) as usize,
        });

        for addr in from..to {
            self.buf[addr as usize] = 0xff;
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        assert!(offset.is_multiple_of(Self::WRITE_SIZE as _));
        assert!(bytes.len().is_multiple_of(Self::WRITE_SIZE as _));
        assert!(!bytes.is_empty());

        if self.operations.len() >= self.fail_after_operation {
            println!("    flash: FAULT");
            return Err(FlashError);
        }

        self.operations.push(Operation::Write {
            offset,
            len: bytes.len(),
        });

        let offset = offset as usize;
        for (i, &val) in bytes.iter().enumerate() {
            // NOR flash can only flip bits from 1 to 0
            self.buf[offset + i] &= val;
        }
        Ok(())
    }
}

impl ntag_emu::platform::Crc for Flash {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        unsafe { libz_sys::crc32(init as u64, data.as_ptr(), data.len() as u32) as u32 }
    }
}

/// Records everything the device does to its hardware.
#[derive(Default, Debug)]
pub struct MockBoard {
    pub running: bool,
    pub starts: Vec<Uid>,
    pub stops: usize,
    /// Returned from `start` instead of the requested UID.
    pub announced_uid: Option<Uid>,
    pub sent: Vec<Response>,
    pub leds: [bool; 3],
    pub led_writes: usize,
    pub replies: Vec<Vec<u8>>,
    pub console: bool,
    pub advertised_name: Option<Vec<u8>>,
}

impl NfcRadio for MockBoard {
    fn start(&mut self, uid: &Uid) -> Uid {
        self.running = true;
        self.starts.push(*uid);
        self.announced_uid.unwrap_or(*uid)
    }

    fn stop(&mut self) {
        self.running = false;
        self.stops += 1;
    }

    fn send(&mut self, response: Response) {
        self.sent.push(response);
    }
}

impl Indicators for MockBoard {
    fn write_leds(&mut self, leds: [bool; 3]) {
        self.leds = leds;
        self.led_writes += 1;
    }
}

impl ControlLink for MockBoard {
    fn respond(&mut self, frame: &[u8]) {
        self.replies.push(frame.to_vec());
    }

    fn enable_console(&mut self) {
        self.console = true;
    }

    fn set_advertised_name(&mut self, name: Option<&[u8]>) {
        self.advertised_name = name.map(<[u8]>::to_vec);
    }
}

/// Template image with a recognizable pattern in the user memory.
pub fn patterned_image(seed: u8) -> TagImage {
    let mut image = TagImage::template();
    for (i, byte) in image.as_bytes_mut()[16..520].iter_mut().enumerate() {
        *byte = seed.wrapping_add(i as u8);
    }
    for (i, byte) in image.as_bytes_mut()[540..IMAGE_LEN].iter_mut().enumerate() {
        *byte = 0xA0 ^ i as u8;
    }
    image
}

pub fn slot(index: u8) -> Slot {
    Slot::new(index).unwrap()
}

pub fn session(image: TagImage) -> Session {
    Session::new(image, slot(0))
}

pub fn slot_store() -> SlotStore<MemoryStore> {
    SlotStore::new(MemoryStore::new()).unwrap()
}

pub fn write_frame(page: u8, data: [u8; 4]) -> Vec<u8> {
    vec![0xA2, page, data[0], data[1], data[2], data[3]]
}
