use crate::BlobName;
use crate::command::Session;
use crate::control::{Action, ControlHandler};
use crate::error::Error;
use crate::platform::Board;
use crate::slots::{Slot, SlotStore};
use crate::store::BlobStore;
use crate::switch::{DEFAULT_SWITCH_DELAY_MS, SlotSwitcher};
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{info, warn};

/// Blob holding the advertised device name.
pub const NAME_BLOB: BlobName = BlobName::from_str("puck-name");
pub const MAX_NAME_LEN: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// How long the target slot is shown before it is loaded. A new request within this window
    /// replaces the pending one.
    pub switch_delay_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            switch_delay_ms: DEFAULT_SWITCH_DELAY_MS,
        }
    }
}

/// The emulator as seen by the firmware's event loop.
///
/// Every `on_*` method handles one event to completion. Time is passed in explicitly; call
/// [`Device::poll`] regularly so pending slot switches fire.
pub struct Device<B: Board, S: BlobStore> {
    board: B,
    slots: SlotStore<S>,
    session: Session,
    control: ControlHandler,
    switcher: SlotSwitcher,
    suspended: bool,
}

impl<B: Board, S: BlobStore> Device<B, S> {
    /// Makes sure every slot is stored, then starts emulating slot 0.
    pub fn new(mut board: B, store: S, settings: Settings) -> Result<Self, Error> {
        let mut slots = SlotStore::new(store)?;
        let slot = Slot::default();
        let mut session = Session::new(slots.load(slot)?, slot);
        session.start(&mut board);

        let mut device = Self {
            board,
            slots,
            session,
            control: ControlHandler::new(),
            switcher: SlotSwitcher::new(settings.switch_delay_ms),
            suspended: false,
        };

        let name = device.name()?;
        device.board.set_advertised_name(name.as_deref());

        Ok(device)
    }

    pub fn on_field_on(&mut self) {
        if !self.suspended {
            self.board.show_slot(self.session.slot().index());
        }
    }

    pub fn on_field_off(&mut self) -> Result<(), Error> {
        self.board.clear_leds();
        self.session.on_field_off(&mut self.board, &mut self.slots)
    }

    /// Answers a command frame from the reader. Exactly one response is sent per frame, none while
    /// suspended.
    pub fn on_frame(&mut self, frame: &[u8]) {
        if self.suspended {
            return;
        }
        let response = self.session.handle(frame);
        self.board.send(response);
    }

    /// Handles a management frame. Rejected frames are not answered.
    ///
    /// When the frame rewrites the active slot, reader writes the session has not persisted yet
    /// are dropped so the next flush cannot overwrite the new image.
    pub fn on_control_frame(&mut self, frame: &[u8], now_ms: u64) -> Result<(), Error> {
        if self.suspended {
            return Err(Error::Suspended);
        }

        let active = self.session.slot();
        let revision = self.slots.revision(active);
        let action = self.control.handle(frame, &mut self.slots, active);

        if self.slots.revision(active) != revision && self.session.discard_changes() {
            #[cfg(feature = "defmt")]
            warn!("on_control_frame: {} was replaced, reader writes dropped", active);

            #[cfg(feature = "debug-logs")]
            println!("device: {active:?} was replaced, reader writes dropped");
        }

        match action? {
            Action::Reply(reply) => self.board.respond(&reply),
            Action::Switch(slot) => self.request_switch(slot, now_ms),
            Action::EnableConsole => self.board.enable_console(),
            Action::None => {}
        }
        Ok(())
    }

    /// Short button press: move on to the next slot. Presses during a pending switch count from
    /// the pending target.
    pub fn on_button(&mut self, now_ms: u64) {
        if self.suspended {
            return;
        }
        let current = self.switcher.target().unwrap_or(self.session.slot());
        self.request_switch(current.next(), now_ms);
    }

    /// Stops emulation and shows `slot` until the switch fires. Cancels any pending switch and any
    /// unfinished upload.
    pub fn request_switch(&mut self, slot: Slot, now_ms: u64) {
        if self.suspended {
            return;
        }

        #[cfg(feature = "defmt")]
        info!("request_switch: {}", slot);

        self.board.stop();
        self.board.show_slot(slot.index());
        if self.control.discard_pending() {
            #[cfg(feature = "defmt")]
            warn!("request_switch: unfinished upload discarded");
        }
        self.switcher.schedule(slot, now_ms);
    }

    /// Fires a pending switch once its delay has elapsed. Returns the slot that is now active.
    ///
    /// The switch is abandoned if pending writes cannot be saved or the new image cannot be
    /// loaded. Emulation then resumes with the previous image, unsaved writes included.
    pub fn poll(&mut self, now_ms: u64) -> Result<Option<Slot>, Error> {
        if self.suspended {
            return Ok(None);
        }
        let Some(slot) = self.switcher.poll(now_ms) else {
            return Ok(None);
        };

        self.board.clear_leds();

        let loaded = self
            .session
            .flush(&mut self.slots)
            .and_then(|_| self.slots.load(slot));
        match loaded {
            Ok(image) => {
                self.session.load(slot, image, &mut self.board);
                Ok(Some(slot))
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                warn!("poll: switch to {} abandoned: {}", slot, e);

                self.session.start(&mut self.board);
                Err(e)
            }
        }
    }

    /// Long press: suspends emulation, or resumes it if already suspended.
    pub fn on_long_press(&mut self) -> Result<(), Error> {
        if self.suspended {
            self.resume();
            Ok(())
        } else {
            self.suspend()
        }
    }

    /// Stops the radio and drops pending switches and uploads. Reader writes are persisted first.
    /// Until [`Device::resume`], frames, presses and management commands are ignored.
    pub fn suspend(&mut self) -> Result<(), Error> {
        if self.suspended {
            return Ok(());
        }

        #[cfg(feature = "defmt")]
        info!("suspend");

        self.switcher.cancel();
        self.control.discard_pending();
        self.board.stop();
        self.board.clear_leds();
        self.session.reset();
        self.suspended = true;

        self.session.flush(&mut self.slots)?;
        Ok(())
    }

    /// Restarts emulation of the active slot.
    pub fn resume(&mut self) {
        if !self.suspended {
            return;
        }

        #[cfg(feature = "defmt")]
        info!("resume: {}", self.session.slot());

        self.suspended = false;
        self.session.start(&mut self.board);
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// The stored device name, if one was set.
    pub fn name(&mut self) -> Result<Option<Vec<u8>>, Error> {
        self.slots.store_mut().read_blob(&NAME_BLOB)
    }

    /// Stores and advertises a new device name. An empty name restores the default.
    pub fn set_name(&mut self, name: &[u8]) -> Result<(), Error> {
        if name.len() > MAX_NAME_LEN {
            return Err(Error::MalformedFrame);
        }

        if name.is_empty() {
            self.slots.store_mut().erase_blob(&NAME_BLOB)?;
            self.board.set_advertised_name(None);
        } else {
            self.slots.store_mut().write_blob(&NAME_BLOB, name)?;
            self.board.set_advertised_name(Some(name));
        }
        Ok(())
    }

    pub fn active_slot(&self) -> Slot {
        self.session.slot()
    }

    pub fn pending_switch(&self) -> Option<Slot> {
        self.switcher.target()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn control(&self) -> &ControlHandler {
        &self.control
    }

    pub fn slots(&self) -> &SlotStore<S> {
        &self.slots
    }

    pub fn slots_mut(&mut self) -> &mut SlotStore<S> {
        &mut self.slots
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }
}
