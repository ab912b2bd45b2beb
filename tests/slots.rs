mod common;

use common::{FLASH_SECTOR_SIZE, Flash, patterned_image, slot};
use ntag_emu::image::IMAGE_LEN;
use ntag_emu::slots::DIGEST_LEN;
use ntag_emu::error::Error;
use ntag_emu::{
    BlobName, BlobStore, Digest, FlashStore, MemoryStore, SLOT_COUNT, Slot, SlotStore, TagImage,
};
use pretty_assertions::assert_eq;

fn flash_slots() -> SlotStore<FlashStore<Flash>> {
    let flash = Flash::new(SLOT_COUNT + 2);
    let store = FlashStore::new(0, (SLOT_COUNT + 2) * FLASH_SECTOR_SIZE, flash).unwrap();
    SlotStore::new(store).unwrap()
}

#[test]
fn slot_indices() {
    assert_eq!(Slot::new(6).map(Slot::index), Ok(6));
    assert_eq!(Slot::new(7), Err(Error::InvalidSlot(7)));
    assert_eq!(Slot::or(9, slot(2)), slot(2));
    assert_eq!(Slot::or(4, slot(2)), slot(4));
    assert_eq!(slot(5).next(), slot(6));
    assert_eq!(slot(6).next(), slot(0));
    assert_eq!(Slot::all().count(), SLOT_COUNT);
    assert_eq!(Slot::default(), slot(0));
}

#[test]
fn first_boot_materializes_every_slot() {
    let mut slots = SlotStore::new(MemoryStore::new()).unwrap();
    assert_eq!(slots.store().len(), SLOT_COUNT);

    for slot in Slot::all() {
        let image = slots.load(slot).unwrap();
        assert_eq!(image, TagImage::template());
        assert_eq!(slots.digest(slot), Some(&Digest::of(&image)));
    }

    let image = slots.load(slot(3)).unwrap();
    assert_eq!(image.as_bytes()[3], 0xC0);
}

#[test]
fn first_boot_on_flash() {
    let mut slots = flash_slots();
    for slot in Slot::all() {
        assert_eq!(slots.load(slot).unwrap(), TagImage::template());
    }

    let store = slots.store();
    assert_eq!(store.names().count(), SLOT_COUNT);
    assert_eq!(store.free_sectors(), 2);
}

#[test]
fn existing_slots_are_kept() {
    let mut store = MemoryStore::new();
    let image = patterned_image(0x42);
    store
        .write_blob(&BlobName::from_str("tag4.bin"), image.as_bytes())
        .unwrap();

    let mut slots = SlotStore::new(store).unwrap();
    assert_eq!(slots.load(slot(4)).unwrap(), image);
    assert_eq!(slots.load(slot(3)).unwrap(), TagImage::template());
}

#[test]
fn save_and_load() {
    let mut slots = flash_slots();
    let image = patterned_image(0x10);

    slots.save(slot(2), &image).unwrap();
    assert_eq!(slots.load(slot(2)).unwrap(), image);
    assert_eq!(slots.digest(slot(2)), Some(&Digest::of(&image)));
    assert_eq!(slots.load(slot(1)).unwrap(), TagImage::template());

    // reopening rebuilds the digests from flash
    let mut slots = SlotStore::new(reopen(slots)).unwrap();
    assert_eq!(slots.load(slot(2)).unwrap(), image);
    assert_eq!(slots.digest(slot(2)), Some(&Digest::of(&image)));
}

fn reopen(slots: SlotStore<FlashStore<Flash>>) -> FlashStore<Flash> {
    let flash = slots.into_store().release();
    let size = flash.len();
    FlashStore::new(0, size, flash).unwrap()
}

#[test]
fn digest_layout() {
    let image = patterned_image(0);
    let raw = image.as_bytes();
    let digest = Digest::of(&image);
    let digest = digest.as_bytes();

    assert_eq!(digest.len(), DIGEST_LEN);
    assert_eq!(&digest[0..8], &raw[0..8]);
    assert_eq!(&digest[8..16], &raw[16..24]);
    assert_eq!(&digest[16..20], &[0, 0, 0, 0]);
    assert_eq!(&digest[20..40], &raw[32..52]);
    assert_eq!(&digest[40..48], &raw[84..92]);
    assert_eq!(&digest[48..80], &raw[96..128]);
}

#[test]
fn copy_slot() {
    let mut slots = SlotStore::new(MemoryStore::new()).unwrap();
    let image = patterned_image(0x77);
    slots.save(slot(1), &image).unwrap();

    slots.copy(slot(1), slot(5)).unwrap();
    assert_eq!(slots.load(slot(5)).unwrap(), image);
    assert_eq!(slots.load(slot(1)).unwrap(), image);
    assert_eq!(slots.digest(slot(5)), slots.digest(slot(1)));
}

#[test]
fn truncated_slot_is_reset() {
    let mut store = MemoryStore::new();
    store
        .write_blob(&BlobName::from_str("tag0.bin"), &[0xAB; IMAGE_LEN - 4])
        .unwrap();

    let mut slots = SlotStore::new(store).unwrap();
    assert_eq!(slots.load(slot(0)).unwrap(), TagImage::template());
    assert_eq!(
        slots.store_mut().read_blob(&BlobName::from_str("tag0.bin")).unwrap().map(|raw| raw.len()),
        Some(IMAGE_LEN)
    );
}

#[test]
fn corrupted_slot_is_reset() {
    let mut slots = flash_slots();
    slots.save(slot(0), &patterned_image(1)).unwrap();

    // flip a payload byte of slot 0, which lives in the last sector written for it
    let mut flash = slots.into_store().release();
    let sector = (0..flash.len() / FLASH_SECTOR_SIZE)
        .find(|&i| flash.sector(i)[..4] == [0xFE, 0xFF, 0xFF, 0xFF] && &flash.sector(i)[4..12] == b"tag0.bin")
        .unwrap();
    flash.buf[sector * FLASH_SECTOR_SIZE + 32 + 100] ^= 0xFF;

    let size = flash.len();
    let store = FlashStore::new(0, size, flash).unwrap();
    let mut slots = SlotStore::new(store).unwrap();
    assert_eq!(slots.load(slot(0)).unwrap(), TagImage::template());
    assert_eq!(slots.digest(slot(0)), Some(&Digest::of(&TagImage::template())));
}
