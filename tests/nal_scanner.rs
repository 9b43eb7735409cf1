//! Bitstream scanner integration tests on synthetic access units.

use framestep::{FrameType, nal, scan_packet};

/// ISO/IEC 11578 UUID plus "MDPM", as written by tagging cameras.
const MDPM_UUID: [u8; 20] = [
    0x17, 0xee, 0x8c, 0x60, 0xf8, 0x4d, 0x11, 0xd9, 0x8c, 0xd6, 0x08, 0x00, 0x20, 0x0c, 0x9a,
    0x66, 0x4d, 0x44, 0x50, 0x4d,
];

/// One SEI unit (header included) carrying an MDPM date/time pair.
///
/// `tz` is the raw timezone byte (sign bit 0x40, magnitude in half hours);
/// the remaining fields are BCD.
fn mdpm_sei_unit(tz: u8) -> Vec<u8> {
    let mut unit = vec![0x06]; // NAL header: SEI
    unit.push(5); // user_data_unregistered
    unit.push(20 + 1 + 2 * 5); // payload length
    unit.extend_from_slice(&MDPM_UUID);
    unit.push(2); // item count
    unit.extend_from_slice(&[0x18, tz, 0x20, 0x21, 0x07]); // 2021-07
    unit.extend_from_slice(&[0x19, 0x15, 0x10, 0x30, 0x45]); // 15th 10:30:45
    unit.push(0x80); // rbsp trailing
    unit
}

fn annex_b_packet(slice_header: u8) -> Vec<u8> {
    let mut data = vec![0x00, 0x00, 0x00, 0x01];
    data.extend_from_slice(&mdpm_sei_unit(0x02));
    data.extend_from_slice(&[0x00, 0x00, 0x01, slice_header]);
    data.extend_from_slice(&[0x9a, 0x3b, 0x7f, 0x00, 0x00, 0x01, 0x12]); // slice payload
    data
}

#[test]
fn annex_b_scan_finds_type_and_timestamp() {
    // ref_idc 2, type 1: a P slice.
    let summary = scan_packet(&annex_b_packet(0x41), true);
    assert_eq!(summary.frame_type, Some(FrameType::P));
    let timestamp = summary.timestamp.expect("MDPM timestamp");
    assert_eq!(timestamp.to_string(), "2021-07-15T10:30:45+01:00");
}

#[test]
fn slice_classification_from_nal_header() {
    // ref_idc 3, type 1: I. ref_idc 0, type 1: B. type 5: IDR.
    assert_eq!(
        scan_packet(&annex_b_packet(0x61), true).frame_type,
        Some(FrameType::I)
    );
    assert_eq!(
        scan_packet(&annex_b_packet(0x01), true).frame_type,
        Some(FrameType::B)
    );
    assert_eq!(
        scan_packet(&annex_b_packet(0x65), true).frame_type,
        Some(FrameType::Idr)
    );
}

#[test]
fn negative_timezone_offset() {
    let mut data = vec![0x00, 0x00, 0x00, 0x01];
    data.extend_from_slice(&mdpm_sei_unit(0x42)); // -1h
    let summary = scan_packet(&data, true);
    assert_eq!(
        summary.timestamp.expect("timestamp").to_string(),
        "2021-07-15T10:30:45-01:00"
    );
}

#[test]
fn length_prefixed_scan() {
    let sei = mdpm_sei_unit(0x00); // UTC
    let slice = [0x65, 0x88, 0x84, 0x21];

    let mut data = Vec::new();
    data.extend_from_slice(&(sei.len() as u32).to_be_bytes());
    data.extend_from_slice(&sei);
    data.extend_from_slice(&(slice.len() as u32).to_be_bytes());
    data.extend_from_slice(&slice);

    let summary = scan_packet(&data, false);
    assert_eq!(summary.frame_type, Some(FrameType::Idr));
    assert_eq!(
        summary.timestamp.expect("timestamp").to_string(),
        "2021-07-15T10:30:45Z"
    );
}

#[test]
fn packet_without_mdpm_has_no_timestamp() {
    let data = [
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xc0, 0x1e, // SPS-like
        0x00, 0x00, 0x01, 0x41, 0x9a, 0x00, // P slice
    ];
    let summary = scan_packet(&data, true);
    assert_eq!(summary.frame_type, Some(FrameType::P));
    assert!(summary.timestamp.is_none());
}

#[test]
fn truncated_sei_is_tolerated() {
    let mut unit = mdpm_sei_unit(0x02);
    unit.truncate(unit.len() / 2);
    let mut data = vec![0x00, 0x00, 0x00, 0x01];
    data.extend_from_slice(&unit);
    let summary = scan_packet(&data, true);
    assert!(summary.timestamp.is_none());
}

#[test]
fn emulation_prevention_removal() {
    // 03 dropped after two zeroes when the next byte is <= 03.
    assert_eq!(
        nal::remove_emulation_prevention(&[0x06, 0x00, 0x00, 0x03, 0x01, 0x44]),
        vec![0x06, 0x00, 0x00, 0x01, 0x44]
    );
    // 03 kept when the following byte is above 03.
    assert_eq!(
        nal::remove_emulation_prevention(&[0x06, 0x00, 0x00, 0x03, 0x80]),
        vec![0x06, 0x00, 0x00, 0x03, 0x80]
    );
    // 03 without the two-zero prefix is data.
    assert_eq!(
        nal::remove_emulation_prevention(&[0x01, 0x03, 0x02]),
        vec![0x01, 0x03, 0x02]
    );
}
