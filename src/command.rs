//! NTAG215 command handling for the emulated tag.
//!
//! A [`Session`] answers one command frame at a time against its [`TagImage`]. Which handler runs
//! for a command byte is decided by the session's current [`CommandTable`]: the restricted table
//! enforces page locks, the unrestricted one (entered through the backdoor read) only replaces
//! `WRITE` and falls back to the restricted table for everything else.

use crate::error::Error;
use crate::image::{
    CAPABILITY_CONTAINER_OFFSET, LAST_PAGE, PAGE_SIZE, PageSet, STATIC_LOCK_OFFSET, TagImage,
};
use crate::platform::NfcRadio;
use crate::slots::{Slot, SlotStore};
use crate::store::BlobStore;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{debug, trace};

pub const ACK: u8 = 0x0A;
pub const NAK: u8 = 0x00;

/// A fast read of exactly these pages opens the backdoor. Both are outside of what a reader may
/// address on a real tag.
pub const BACKDOOR_PAGES: (u8, u8) = (133, 134);

const READ_LEN: usize = 4 * PAGE_SIZE;
const VERSION: [u8; 8] = [0x00, 0x04, 0x04, 0x02, 0x01, 0x00, 0x11, 0x03];
const PWD_AUTH_ACK: [u8; 2] = [0x80, 0x80];
const BACKDOOR_ACK: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

/// What goes back over the air for a single command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Data(Vec<u8>),
    /// A 4 bit ACK/NAK.
    Status(u8),
    /// The frame is swallowed without an answer.
    Silent,
}

impl Response {
    fn nak() -> Self {
        Response::Status(NAK)
    }

    fn ack() -> Self {
        Response::Status(ACK)
    }

    fn data(bytes: &[u8]) -> Self {
        Response::Data(bytes.to_vec())
    }
}

#[derive(strum::FromRepr, strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Command {
    KeepAlive = 0x1A,
    PwdAuth = 0x1B,
    Read = 0x30,
    FastRead = 0x3A,
    ReadSig = 0x3C,
    GetVersion = 0x60,
    Restart = 0x88,
    Select = 0x93,
    Write = 0xA2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Restricted,
    Authenticated,
    Unrestricted,
}

type Handler = fn(&mut Session, &[u8]) -> Response;

pub struct CommandTable {
    mode: TableMode,
    handlers: &'static [(Command, Handler)],
    /// Consulted for every command this table doesn't handle itself.
    base: Option<&'static CommandTable>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TableMode {
    Restricted,
    Unrestricted,
}

impl CommandTable {
    fn lookup(&self, command: Command) -> Option<Handler> {
        self.handlers
            .iter()
            .find(|(c, _)| *c == command)
            .map(|&(_, handler)| handler)
            .or_else(|| self.base.and_then(|base| base.lookup(command)))
    }
}

static RESTRICTED: CommandTable = CommandTable {
    mode: TableMode::Restricted,
    handlers: &[
        (Command::Read, read as Handler),
        (Command::FastRead, fast_read as Handler),
        (Command::Write, write as Handler),
        (Command::GetVersion, get_version as Handler),
        (Command::PwdAuth, pwd_auth as Handler),
        (Command::ReadSig, read_sig as Handler),
        (Command::Restart, restart as Handler),
        (Command::KeepAlive, keep_alive as Handler),
        (Command::Select, keep_alive as Handler),
    ],
    base: None,
};

static UNRESTRICTED: CommandTable = CommandTable {
    mode: TableMode::Unrestricted,
    handlers: &[(Command::Write, write_unrestricted as Handler)],
    base: Some(&RESTRICTED),
};

/// State of the one emulated tag. Reconfigured on slot switches, never rebuilt.
pub struct Session {
    image: TagImage,
    slot: Slot,
    authenticated: bool,
    backdoor: bool,
    /// A write landed in `image` that is not persisted yet.
    dirty: bool,
    locked_pages: PageSet,
    table: &'static CommandTable,
}

impl Session {
    /// Creates a restricted, unauthenticated session. The radio is not touched until [`Session::start`].
    pub fn new(image: TagImage, slot: Slot) -> Self {
        let mut session = Self {
            image,
            slot,
            authenticated: false,
            backdoor: false,
            dirty: false,
            locked_pages: PageSet::new(),
            table: &RESTRICTED,
        };
        session.reset();
        session
    }

    /// (Re)starts emulation with the session's UID and adopts the UID the radio reports back.
    pub fn start<R: NfcRadio>(&mut self, radio: &mut R) {
        radio.stop();
        self.image.repair_checksum();
        let uid = radio.start(&self.image.uid());
        self.image.set_uid(&uid);
        self.locked_pages = self.image.locked_pages(self.authenticated);
    }

    /// Replaces the emulated image and restarts the radio with it.
    pub fn load<R: NfcRadio>(&mut self, slot: Slot, image: TagImage, radio: &mut R) {
        #[cfg(feature = "defmt")]
        debug!("load: {}", slot);

        self.image = image;
        self.slot = slot;
        self.dirty = false;
        self.reset();
        self.start(radio);
    }

    /// Answers a single command frame.
    pub fn handle(&mut self, frame: &[u8]) -> Response {
        let Some(command) = frame.first().and_then(|&code| Command::from_repr(code)) else {
            #[cfg(feature = "defmt")]
            trace!("handle: unknown frame {=[u8]:x}", frame);
            return Response::nak();
        };

        #[cfg(feature = "defmt")]
        trace!("handle: {} ({})", command, self.mode());

        #[cfg(feature = "debug-logs")]
        println!("session: {command} {frame:02x?}");

        match self.table.lookup(command) {
            Some(handler) => handler(self, frame),
            None => Response::nak(),
        }
    }

    /// Back to the restricted, unauthenticated state a tag is in when it enters the field.
    pub fn reset(&mut self) {
        self.authenticated = false;
        self.backdoor = false;
        self.table = &RESTRICTED;
        self.locked_pages = self.image.locked_pages(false);
    }

    /// Runs when the reader field goes away: drops authentication and the backdoor, repairs the
    /// UID check bytes (restarting the radio with the fixed identity) and persists pending writes.
    pub fn on_field_off<R: NfcRadio, S: BlobStore>(
        &mut self,
        radio: &mut R,
        slots: &mut SlotStore<S>,
    ) -> Result<(), Error> {
        self.reset();

        if self.image.repair_checksum() {
            self.dirty = true;
            self.start(radio);
        }

        self.flush(slots)?;
        Ok(())
    }

    /// Persists the image to its slot if a write is pending. Returns whether anything was written.
    pub fn flush<S: BlobStore>(&mut self, slots: &mut SlotStore<S>) -> Result<bool, Error> {
        if !self.dirty {
            return Ok(false);
        }

        slots.save(self.slot, &self.image)?;
        self.dirty = false;
        Ok(true)
    }

    /// Forgets pending writes without persisting them. Returns whether anything was dropped.
    pub fn discard_changes(&mut self) -> bool {
        core::mem::replace(&mut self.dirty, false)
    }

    pub fn mode(&self) -> Mode {
        match (self.table.mode, self.authenticated) {
            (TableMode::Unrestricted, _) => Mode::Unrestricted,
            (TableMode::Restricted, true) => Mode::Authenticated,
            (TableMode::Restricted, false) => Mode::Restricted,
        }
    }

    pub fn image(&self) -> &TagImage {
        &self.image
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn is_backdoor(&self) -> bool {
        self.backdoor
    }

    pub fn locked_pages(&self) -> &PageSet {
        &self.locked_pages
    }
}

fn parse_write(frame: &[u8]) -> Option<(u8, [u8; PAGE_SIZE])> {
    let page = *frame.get(1)?;
    let data = frame.get(2..2 + PAGE_SIZE)?.try_into().ok()?;
    Some((page, data))
}

fn read(session: &mut Session, frame: &[u8]) -> Response {
    let Some(&page) = frame.get(1) else {
        return Response::nak();
    };

    if !session.backdoor && page > LAST_PAGE {
        return Response::nak();
    }

    // no wrap around at the end of the memory
    match session.image.pages(page, READ_LEN) {
        Some(bytes) => Response::data(bytes),
        None => Response::nak(),
    }
}

fn fast_read(session: &mut Session, frame: &[u8]) -> Response {
    let (Some(&start), Some(&end)) = (frame.get(1), frame.get(2)) else {
        return Response::nak();
    };

    if start > end || end > LAST_PAGE {
        return Response::nak();
    }

    if (start, end) == BACKDOOR_PAGES {
        #[cfg(feature = "defmt")]
        debug!("fast_read: backdoor opened");

        session.backdoor = true;
        session.table = &UNRESTRICTED;
        return Response::data(&BACKDOOR_ACK);
    }

    let len = (end - start + 1) as usize * PAGE_SIZE;
    match session.image.pages(start, len) {
        Some(bytes) => Response::data(bytes),
        None => Response::nak(),
    }
}

fn write(session: &mut Session, frame: &[u8]) -> Response {
    let Some((page, data)) = parse_write(frame) else {
        return Response::nak();
    };

    if page > LAST_PAGE || session.locked_pages.contains(page) {
        return Response::nak();
    }

    let memory = session.image.as_bytes_mut();
    match page {
        // lock bits can only ever be set
        2 => {
            memory[STATIC_LOCK_OFFSET] |= data[2];
            memory[STATIC_LOCK_OFFSET + 1] |= data[3];
            session.locked_pages = session.image.locked_pages(session.authenticated);
        }
        // the capability container is one-time programmable
        3 => {
            for (byte, bit) in memory[CAPABILITY_CONTAINER_OFFSET..][..PAGE_SIZE]
                .iter_mut()
                .zip(data)
            {
                *byte |= bit;
            }
        }
        _ => {
            let offset = page as usize * PAGE_SIZE;
            memory[offset..offset + PAGE_SIZE].copy_from_slice(&data);
        }
    }

    session.dirty = true;
    Response::ack()
}

fn write_unrestricted(session: &mut Session, frame: &[u8]) -> Response {
    let Some((page, data)) = parse_write(frame) else {
        return Response::nak();
    };

    let offset = page as usize * PAGE_SIZE;
    let Some(target) = session
        .image
        .as_bytes_mut()
        .get_mut(offset..offset + PAGE_SIZE)
    else {
        return Response::Silent;
    };

    target.copy_from_slice(&data);
    session.dirty = true;
    Response::ack()
}

fn get_version(_session: &mut Session, _frame: &[u8]) -> Response {
    Response::data(&VERSION)
}

/// Any password is accepted.
fn pwd_auth(session: &mut Session, _frame: &[u8]) -> Response {
    session.authenticated = true;
    session.locked_pages = session.image.locked_pages(true);
    Response::data(&PWD_AUTH_ACK)
}

fn read_sig(session: &mut Session, _frame: &[u8]) -> Response {
    Response::data(session.image.signature())
}

fn restart(_session: &mut Session, _frame: &[u8]) -> Response {
    Response::ack()
}

fn keep_alive(_session: &mut Session, _frame: &[u8]) -> Response {
    Response::Silent
}
