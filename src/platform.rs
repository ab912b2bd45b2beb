use crate::command::Response;
use crate::image::Uid;
use embedded_storage::nor_flash::NorFlash;

/// Flash backend for [`crate::store::FlashStore`].
pub trait Platform: Crc + NorFlash {}

impl<T: Crc + NorFlash> Platform for T {}

pub type FnCrc32 = fn(init: u32, data: &[u8]) -> u32;

pub trait Crc {
    fn crc32(init: u32, data: &[u8]) -> u32;
}

impl<T: Crc> Crc for &mut T {
    fn crc32(init: u32, data: &[u8]) -> u32 {
        T::crc32(init, data)
    }
}

pub trait AlignedOps: Platform {
    fn align_read(size: usize) -> usize {
        align_ceil(size, Self::READ_SIZE)
    }

    fn align_write_floor(size: usize) -> usize {
        align_floor(size, Self::WRITE_SIZE)
    }
}

#[inline(always)]
const fn align_ceil(size: usize, alignment: usize) -> usize {
    if size.is_power_of_two() {
        size.saturating_add(alignment - 1) & !(alignment - 1)
    } else {
        size.saturating_add(alignment - 1) / alignment * alignment
    }
}

#[inline(always)]
const fn align_floor(size: usize, alignment: usize) -> usize {
    if size.is_power_of_two() {
        size & !(alignment - 1)
    } else {
        size / alignment * alignment
    }
}

impl<T: Platform> AlignedOps for T {}

/// The near-field front end. Framing, anticollision and field detection happen below this trait;
/// the emulator only ever sees complete command frames.
pub trait NfcRadio {
    /// Starts tag emulation with the given UID and returns the UID the front end actually announces.
    fn start(&mut self, uid: &Uid) -> Uid;

    fn stop(&mut self);

    /// Answers the frame that is currently being processed.
    fn send(&mut self, response: Response);
}

/// Three status LEDs.
pub trait Indicators {
    fn write_leds(&mut self, leds: [bool; 3]);

    /// Shows `slot + 1` in binary. The eighth value does not fit and blanks the LEDs.
    fn show_slot(&mut self, slot: u8) {
        if slot < 7 {
            let value = slot + 1;
            self.write_leds([value & 1 != 0, value & 2 != 0, value & 4 != 0]);
        } else {
            self.clear_leds();
        }
    }

    fn clear_leds(&mut self) {
        self.write_leds([false; 3]);
    }
}

/// The wireless management channel.
pub trait ControlLink {
    /// Publishes a response frame on the read characteristic.
    fn respond(&mut self, frame: &[u8]);

    /// Hands the channel over to the diagnostic console.
    fn enable_console(&mut self);

    /// Updates the advertised device name, `None` restores the default.
    fn set_advertised_name(&mut self, name: Option<&[u8]>);
}

/// Everything the device drives apart from its storage.
pub trait Board: NfcRadio + Indicators + ControlLink {}

impl<T: NfcRadio + Indicators + ControlLink> Board for T {}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::Crc;

    impl Crc for FlashStorage<'_> {
        fn crc32(init: u32, data: &[u8]) -> u32 {
            esp_hal::rom::crc::crc32_le(init, data)
        }
    }
}
