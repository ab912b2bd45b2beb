mod common;

use ntag_emu::image::{IMAGE_LEN, PAGE_COUNT, TagImage, Uid};
use pretty_assertions::assert_eq;

#[test]
fn template_has_valid_check_bytes() {
    let image = TagImage::template();
    let raw = image.as_bytes();

    assert_eq!(&raw[0..3], &[0x48, 0x00, 0x00]);
    assert_eq!(raw[3], 0x48 ^ 0x00 ^ 0x00 ^ 0x88);
    assert_eq!(raw[3], 0xC0);
    assert_eq!(raw[8], 0x00);
    assert_eq!(&raw[9..19], &[0x48, 0x00, 0x00, 0xE1, 0x10, 0x3E, 0x00, 0x03, 0x00, 0xFE]);
    assert_eq!(&raw[523..530], &[0xBD, 0x04, 0x00, 0x00, 0xFF, 0x00, 0x05]);
    assert_eq!(image.expected_bcc(), (raw[3], raw[8]));
}

#[test]
fn repair_checksum_is_idempotent() {
    let mut image = common::patterned_image(7);
    image.as_bytes_mut()[..9].copy_from_slice(&[0x04, 0x11, 0x22, 0x00, 0x33, 0x44, 0x55, 0x66, 0x00]);

    assert!(image.repair_checksum());
    let once = image.clone();
    assert!(!image.repair_checksum());
    assert_eq!(image, once);

    let raw = image.as_bytes();
    assert_eq!(raw[3], 0x04 ^ 0x11 ^ 0x22 ^ 0x88);
    assert_eq!(raw[8], 0x33 ^ 0x44 ^ 0x55 ^ 0x66);
}

#[test]
fn repair_checksum_only_touches_check_bytes() {
    let mut image = common::patterned_image(3);
    image.as_bytes_mut()[3] ^= 0xFF;
    image.as_bytes_mut()[8] ^= 0x01;
    let before = image.clone();

    assert!(image.repair_checksum());
    for (i, (a, b)) in before.as_bytes().iter().zip(image.as_bytes()).enumerate() {
        if i != 3 && i != 8 {
            assert_eq!(a, b, "byte {i} changed");
        }
    }
}

#[test]
fn set_uid_recomputes_check_bytes() {
    let mut image = TagImage::template();
    let uid = Uid([0x04, 0xA1, 0xB2, 0xC3, 0xD4, 0xE5, 0xF6]);
    image.set_uid(&uid);

    assert_eq!(image.uid(), uid);
    assert_eq!(&image.as_bytes()[..9], &[0x04, 0xA1, 0xB2, 0x04 ^ 0xA1 ^ 0xB2 ^ 0x88, 0xC3, 0xD4, 0xE5, 0xF6, 0xC3 ^ 0xD4 ^ 0xE5 ^ 0xF6]);
}

#[test]
fn unlocked_image_only_locks_uid_pages() {
    let image = TagImage::template();
    let locked = image.locked_pages(false);
    assert_eq!(locked.iter().collect::<Vec<_>>(), vec![0, 1]);
}

#[test]
fn static_lock_bits() {
    let mut image = TagImage::template();
    // all of lock byte 0, including the block lock bits, and L8 + L15
    image.as_bytes_mut()[10] = 0xFF;
    image.as_bytes_mut()[11] = 0b1000_0001;

    let locked = image.locked_pages(true);
    assert_eq!(locked.iter().collect::<Vec<_>>(), vec![0, 1, 8, 9, 10, 11, 15]);
}

#[test]
fn lock_byte_0_covers_pages_8_to_11() {
    let mut image = TagImage::template();
    image.as_bytes_mut()[10] = 0b0001_0000;
    assert_eq!(image.locked_pages(true).iter().collect::<Vec<_>>(), vec![0, 1, 8]);

    image.as_bytes_mut()[10] = 0b1000_0000;
    assert_eq!(image.locked_pages(true).iter().collect::<Vec<_>>(), vec![0, 1, 11]);
}

#[test]
fn block_lock_bits_lock_nothing() {
    let mut image = TagImage::template();
    image.as_bytes_mut()[10] = 0x0F;

    assert_eq!(image.locked_pages(false).len(), 2);
}

#[test]
fn dynamic_lock_bits_only_apply_unauthenticated() {
    let mut image = TagImage::template();
    image.as_bytes_mut()[520] = 0b1000_0010;

    let locked = image.locked_pages(false);
    let expected: Vec<u8> = [0, 1]
        .into_iter()
        .chain(32..48)
        .chain([128, 129])
        .collect();
    assert_eq!(locked.iter().collect::<Vec<_>>(), expected);

    let locked = image.locked_pages(true);
    assert_eq!(locked.iter().collect::<Vec<_>>(), vec![0, 1]);
}

#[test]
fn all_dynamic_lock_bits_cover_user_memory() {
    let mut image = TagImage::template();
    image.as_bytes_mut()[520] = 0xFF;

    let locked = image.locked_pages(false);
    assert!((16..=129).all(|page| locked.contains(page)));
    assert!(!locked.contains(130));
    assert!(!locked.contains(15));
    assert_eq!(locked.len(), 2 + 114);
}

#[test]
fn pages_are_bounds_checked() {
    let image = common::patterned_image(0);

    assert_eq!(image.pages(4, 16), Some(&image.as_bytes()[16..32]));
    assert_eq!(image.pages(139, 16).map(<[u8]>::len), Some(16));
    assert_eq!(image.pages(140, 16), None);
    assert_eq!(image.pages(0, IMAGE_LEN).map(<[u8]>::len), Some(IMAGE_LEN));
    assert_eq!(PAGE_COUNT, 143);
}

#[test]
fn image_from_slice_requires_exact_length() {
    let raw = vec![0u8; IMAGE_LEN];
    assert!(TagImage::try_from(raw.as_slice()).is_ok());
    assert!(TagImage::try_from(&raw[..IMAGE_LEN - 1]).is_err());
}
