//! Management protocol spoken by the companion app.
//!
//! Every frame starts with a command byte:
//!
//! | byte   | request                              | response                                   |
//! |--------|--------------------------------------|--------------------------------------------|
//! | `0x01` | `[]`                                 | `01 <active slot> <slot count>`            |
//! | `0x01` | `<slot>`                             | `01 <slot> <80 byte digest>`               |
//! | `0x02` | `<slot> <start page> <page count>`   | `02 <slot> <start page> <page count> <data>` |
//! | `0x03` | `<slot> <start page> <data>`         | none                                       |
//! | `0xFD` | `<from> <to>`                        | none                                       |
//! | `0xFE` | `[]`                                 | none, hands the channel to the console     |
//! | `0xFF` | `[<slot>]`                           | none, restarts emulation                   |
//!
//! Slot indices out of range fall back to the active slot, except for `0xFF` which falls back to
//! slot 0 and `0xFD` which ignores the frame.

use crate::error::Error;
use crate::image::{IMAGE_LEN, PAGE_SIZE, TagImage};
use crate::slots::{Digest, SLOT_COUNT, Slot, SlotStore};
use crate::store::BlobStore;
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{info, trace, warn};

/// Largest frame the write characteristic accepts.
pub const MAX_FRAME_LEN: usize = 20;
/// Largest frame the read characteristic holds.
pub const MAX_RESPONSE_LEN: usize = 260;
/// A write chunk for this page is the last one of an image and commits it.
pub const COMMIT_PAGE: u8 = 140;

const READ_HEADER_LEN: usize = 4;
const WRITE_HEADER_LEN: usize = 3;

#[derive(strum::FromRepr, strum::Display, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ControlCommand {
    SlotInfo = 0x01,
    ReadSlot = 0x02,
    WriteSlot = 0x03,
    MoveSlot = 0xFD,
    EnableConsole = 0xFE,
    Restart = 0xFF,
}

/// What the device has to do after a frame was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Publish this frame on the read characteristic.
    Reply(Vec<u8>),
    /// Stop emulation and switch to this slot.
    Switch(Slot),
    EnableConsole,
    None,
}

struct PendingWrite {
    slot: Slot,
    image: TagImage,
}

/// Handles management frames. Owns the image being uploaded by a chunked write.
#[derive(Default)]
pub struct ControlHandler {
    pending: Option<PendingWrite>,
    console: bool,
}

impl ControlHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle<S: BlobStore>(
        &mut self,
        frame: &[u8],
        slots: &mut SlotStore<S>,
        active: Slot,
    ) -> Result<Action, Error> {
        if self.console {
            return Err(Error::ConsoleEnabled);
        }

        if frame.len() > MAX_FRAME_LEN {
            return Err(Error::MalformedFrame);
        }

        let Some(command) = frame.first().and_then(|&code| ControlCommand::from_repr(code)) else {
            return Ok(Action::None);
        };

        #[cfg(feature = "defmt")]
        trace!("handle: {} {=[u8]:x}", command, frame);

        #[cfg(feature = "debug-logs")]
        println!("control: {command} {frame:02x?}");

        match command {
            ControlCommand::SlotInfo => slot_info(frame, slots, active),
            ControlCommand::ReadSlot => read_slot(frame, slots, active),
            ControlCommand::WriteSlot => self.write_slot(frame, slots, active),
            ControlCommand::MoveSlot => move_slot(frame, slots, active),
            ControlCommand::EnableConsole => {
                #[cfg(feature = "defmt")]
                info!("handle: console enabled");

                self.console = true;
                self.pending = None;
                Ok(Action::EnableConsole)
            }
            ControlCommand::Restart => {
                let slot = match frame.get(1) {
                    Some(&index) => Slot::or(index, Slot::default()),
                    None => active,
                };
                Ok(Action::Switch(slot))
            }
        }
    }

    /// Drops a partially uploaded image. Returns whether there was one.
    pub fn discard_pending(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Slot of the image currently being uploaded.
    pub fn pending_slot(&self) -> Option<Slot> {
        self.pending.as_ref().map(|pending| pending.slot)
    }

    pub fn console_enabled(&self) -> bool {
        self.console
    }

    fn write_slot<S: BlobStore>(
        &mut self,
        frame: &[u8],
        slots: &mut SlotStore<S>,
        active: Slot,
    ) -> Result<Action, Error> {
        if frame.len() < WRITE_HEADER_LEN {
            return Err(Error::MalformedFrame);
        }

        let slot = Slot::or(frame[1], active);
        let page = frame[2];
        let data = &frame[WRITE_HEADER_LEN..];

        // the first chunk restarts the upload from the persisted image
        if page == 0 {
            let image = slots.load(slot)?;
            self.pending = Some(PendingWrite { slot, image });
        }

        let Some(pending) = self.pending.as_mut().filter(|pending| pending.slot == slot) else {
            return Err(Error::NoPendingWrite);
        };

        let offset = page as usize * PAGE_SIZE;
        if offset + data.len() <= IMAGE_LEN {
            pending.image.as_bytes_mut()[offset..offset + data.len()].copy_from_slice(data);
        } else {
            #[cfg(feature = "defmt")]
            warn!("write_slot: chunk at page {} dropped", page);
        }

        if page == COMMIT_PAGE {
            if let Some(PendingWrite { slot, image }) = self.pending.take() {
                slots.save(slot, &image)?;
            }
        }

        Ok(Action::None)
    }
}

fn slot_info<S: BlobStore>(
    frame: &[u8],
    slots: &mut SlotStore<S>,
    active: Slot,
) -> Result<Action, Error> {
    let Some(&index) = frame.get(1) else {
        return Ok(Action::Reply(vec![
            ControlCommand::SlotInfo as u8,
            active.index(),
            SLOT_COUNT as u8,
        ]));
    };

    let slot = Slot::or(index, active);
    let digest = match slots.digest(slot) {
        Some(digest) => digest.clone(),
        None => Digest::of(&slots.load(slot)?),
    };

    let mut reply = Vec::with_capacity(2 + digest.as_bytes().len());
    reply.extend_from_slice(&[frame[0], slot.index()]);
    reply.extend_from_slice(digest.as_bytes());
    Ok(Action::Reply(reply))
}

fn read_slot<S: BlobStore>(
    frame: &[u8],
    slots: &mut SlotStore<S>,
    active: Slot,
) -> Result<Action, Error> {
    if frame.len() < READ_HEADER_LEN {
        return Err(Error::MalformedFrame);
    }

    let slot = Slot::or(frame[1], active);
    let (start_page, page_count) = (frame[2], frame[3]);
    let offset = start_page as usize * PAGE_SIZE;
    let len = page_count as usize * PAGE_SIZE;

    if READ_HEADER_LEN + len > MAX_RESPONSE_LEN {
        return Err(Error::OutOfBounds { offset, len });
    }

    let image = slots.load(slot)?;
    let data = image
        .pages(start_page, len)
        .ok_or(Error::OutOfBounds { offset, len })?;

    let mut reply = Vec::with_capacity(READ_HEADER_LEN + len);
    reply.extend_from_slice(&[frame[0], slot.index(), start_page, page_count]);
    reply.extend_from_slice(data);
    Ok(Action::Reply(reply))
}

fn move_slot<S: BlobStore>(
    frame: &[u8],
    slots: &mut SlotStore<S>,
    active: Slot,
) -> Result<Action, Error> {
    if frame.len() < 3 {
        return Err(Error::MalformedFrame);
    }

    let from = Slot::new(frame[1])?;
    let to = Slot::new(frame[2])?;
    slots.copy(from, to)?;

    // reload the active slot in case it was the target
    Ok(Action::Switch(active))
}
