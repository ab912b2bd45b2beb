use thiserror::Error;

/// Errors surfaced by storage and the management protocol. Rejected radio commands are not errors,
/// they are answered on the air with a NAK (see [`crate::command::Response`]).
#[derive(Error, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum Error {
    /// The partition offset has to be aligned to the size of a flash sector (4k)
    #[error("invalid partition offset")]
    InvalidPartitionOffset,

    /// The partition size has to be a non-zero multiple of the flash sector size (4k)
    #[error("invalid partition size")]
    InvalidPartitionSize,

    /// The internal error value is returned from the provided flash implementation
    #[error("internal flash error")]
    FlashError,

    /// The max blob name length is 15 bytes plus null terminator.
    #[error("name too long")]
    NameTooLong,

    /// The blob name is malformed. The last byte must be b'\0'
    #[error("name malformed")]
    NameMalformed,

    /// A blob has to fit into a single sector record.
    #[error("blob too large")]
    BlobTooLarge,

    /// A stored record failed its CRC check or has an unexpected length.
    #[error("corrupted data")]
    CorruptedData,

    /// Every sector of the partition is occupied by another blob.
    #[error("storage full")]
    StorageFull,

    /// Slot indices run from 0 to `SLOT_COUNT - 1`.
    #[error("invalid slot: {0}")]
    InvalidSlot(u8),

    /// The management frame is shorter than its command requires, or longer than the transport allows.
    #[error("malformed frame")]
    MalformedFrame,

    /// The requested byte range does not fit into a tag image.
    #[error("out of bounds: {len} bytes at offset {offset}")]
    OutOfBounds { offset: usize, len: usize },

    /// A write chunk arrived without a preceding chunk for page 0 of the same slot.
    #[error("no pending write")]
    NoPendingWrite,

    /// The management channel was handed over to the console and no longer accepts slot commands.
    #[error("console enabled")]
    ConsoleEnabled,

    /// Emulation is suspended until the next long press.
    #[error("suspended")]
    Suspended,
}
