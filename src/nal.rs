//! H.264 bitstream unit scanning.
//!
//! This module inspects one encoded access unit (a demuxed packet) without
//! decoding it: it splits the payload into NAL units, classifies the primary
//! coded slice as I/IDR/P/B from the NAL header, and extracts the wall-clock
//! capture timestamp that MDPM-tagging cameras embed in SEI user data.
//!
//! Everything here is pure byte work. Malformed metadata is logged and
//! skipped; it never aborts the scan of the remaining units.

use crate::{capture::CaptureTimestamp, frame_info::FrameType};

/// ISO/IEC 11578 UUID followed by the ASCII tag "MDPM", as found at the
/// start of the SEI user-data payload written by tagging cameras.
const UUID_ISO_IEC_11578_PLUS_MDPM: [u8; 20] = [
    0x17, 0xee, 0x8c, 0x60, 0xf8, 0x4d, 0x11, 0xd9, 0x8c, 0xd6, 0x08, 0x00, 0x20, 0x0c, 0x9a,
    0x66, 0x4d, 0x44, 0x50, 0x4d,
];

const NAL_TYPE_SLICE: u8 = 0x01;
const NAL_TYPE_IDR_SLICE: u8 = 0x05;
const NAL_TYPE_SEI: u8 = 0x06;

/// What a packet scan learned about one access unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketSummary {
    /// Picture type of the primary coded slice, when one was found and its
    /// header was recognized.
    pub frame_type: Option<FrameType>,
    /// Embedded capture timestamp, when an MDPM SEI unit carried one.
    pub timestamp: Option<CaptureTimestamp>,
}

/// Scan one encoded access unit.
///
/// `annex_b` selects start-code framing (in-band streams) over the 4-byte
/// length prefixes of AVCC packets. For Annex-B data the scan stops at the
/// primary coded slice; SEI units precede it in capture order.
pub fn scan_packet(data: &[u8], annex_b: bool) -> PacketSummary {
    let mut summary = PacketSummary::default();

    let units = if annex_b {
        annex_b_units(data)
    } else {
        length_prefixed_units(data)
    };

    for unit in units {
        let Some(&header) = unit.first() else {
            continue;
        };
        let ref_idc = (header & 0xe0) >> 5;
        let nal_type = header & 0x1f;

        match nal_type {
            NAL_TYPE_SLICE => {
                summary.frame_type = match ref_idc {
                    0 => Some(FrameType::B),
                    2 => Some(FrameType::P),
                    3 => Some(FrameType::I),
                    other => {
                        log::warn!("unrecognized nal_ref_idc {other} on coded slice, skipping");
                        None
                    }
                };
            }
            NAL_TYPE_IDR_SLICE => {
                summary.frame_type = Some(FrameType::Idr);
            }
            NAL_TYPE_SEI => {
                let unescaped;
                let payload = if annex_b {
                    unescaped = remove_emulation_prevention(unit);
                    &unescaped[..]
                } else {
                    unit
                };
                if let Some(timestamp) = scan_sei(&payload[1..]) {
                    summary.timestamp = Some(timestamp);
                }
            }
            _ => {}
        }
    }

    summary
}

/// Strip `00 00 03` emulation-prevention bytes from a raw NAL unit.
///
/// A `03` byte is dropped when it follows two zero bytes and precedes a byte
/// `<= 03`; everything else is copied through.
pub fn remove_emulation_prevention(unit: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(unit.len());
    for (i, &byte) in unit.iter().enumerate() {
        if byte == 0x03
            && i >= 2
            && unit[i - 1] == 0
            && unit[i - 2] == 0
            && unit.get(i + 1).is_some_and(|&next| next <= 0x03)
        {
            continue;
        }
        out.push(byte);
    }
    out
}

/// Split Annex-B framed data on `00 00 01` / `00 00 00 01` start codes.
///
/// Stops after the unit that begins the primary coded slice (NAL type 1 or
/// 5); that unit runs to the end of the packet.
fn annex_b_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut zeroes = 0usize;
    let mut started_at: Option<usize> = None;

    let mut i = 0;
    while i < data.len() {
        let byte = data[i];
        if byte == 0 {
            zeroes += 1;
            i += 1;
            continue;
        }
        if byte == 1 && zeroes >= 2 {
            if let Some(start) = started_at {
                units.push(&data[start..i - zeroes]);
            }
            let next_type = data.get(i + 1).map(|b| b & 0x1f);
            if next_type == Some(NAL_TYPE_SLICE) || next_type == Some(NAL_TYPE_IDR_SLICE) {
                units.push(&data[i + 1..]);
                return units;
            }
            started_at = Some(i + 1);
        }
        zeroes = 0;
        i += 1;
    }

    if let Some(start) = started_at {
        units.push(&data[start..]);
    }
    units
}

/// Split AVCC data on 4-byte big-endian length prefixes.
fn length_prefixed_units(data: &[u8]) -> Vec<&[u8]> {
    let mut units = Vec::new();
    let mut index = 0usize;
    while index + 4 <= data.len() {
        let length = u32::from_be_bytes([
            data[index],
            data[index + 1],
            data[index + 2],
            data[index + 3],
        ]) as usize;
        if length < 2 || index + 4 + length > data.len() {
            log::warn!("malformed length-prefixed unit at byte {index}, stopping scan");
            return units;
        }
        index += 4;
        units.push(&data[index..index + length]);
        index += length;
    }
    units
}

/// Walk the SEI messages in an unescaped SEI payload (NAL header stripped)
/// looking for an MDPM user-data message with a capture timestamp.
fn scan_sei(mut rest: &[u8]) -> Option<CaptureTimestamp> {
    let mut found = None;

    while !rest.is_empty() {
        let message_type = rest[0];
        if message_type == 0x80 {
            // padding
            rest = &rest[1..];
            continue;
        }
        let Some(&length) = rest.get(1) else {
            break;
        };
        let length = length as usize;
        let Some(body) = rest.get(2..2 + length) else {
            log::warn!("SEI message overruns its unit, skipping remainder");
            break;
        };
        rest = &rest[2 + length..];

        if message_type != 5 {
            continue;
        }
        if length < UUID_ISO_IEC_11578_PLUS_MDPM.len()
            || body[..UUID_ISO_IEC_11578_PLUS_MDPM.len()] != UUID_ISO_IEC_11578_PLUS_MDPM
        {
            continue;
        }

        let payload = &body[UUID_ISO_IEC_11578_PLUS_MDPM.len()..];
        let Some(&item_count) = payload.first() else {
            continue;
        };
        let item_count = item_count as usize;
        if length != UUID_ISO_IEC_11578_PLUS_MDPM.len() + 1 + item_count * 5 {
            log::warn!("MDPM payload length does not match its item count, skipping");
            continue;
        }

        if let Some(timestamp) = decode_mdpm_items(&payload[1..], item_count) {
            found = Some(timestamp);
        }
    }

    found
}

/// Decode the MDPM item list (5 bytes per item) into a capture timestamp.
///
/// Item 0x18 carries the timezone byte, century, two-digit year, and month;
/// item 0x19 carries day, hour, minute, and second. All but the timezone
/// byte are BCD-coded. Both items must be present.
fn decode_mdpm_items(items: &[u8], item_count: usize) -> Option<CaptureTimestamp> {
    let mut date_item: Option<[u8; 4]> = None;
    let mut time_item: Option<[u8; 4]> = None;

    for item in 0..item_count {
        let chunk = &items[item * 5..item * 5 + 5];
        let fields = [chunk[1], chunk[2], chunk[3], chunk[4]];
        match chunk[0] {
            0x18 => date_item = Some(fields),
            0x19 => time_item = Some(fields),
            _ => {}
        }
    }

    let (date, time) = (date_item?, time_item?);

    let century = bcd(date[1])?;
    let year2 = bcd(date[2])?;
    let month = bcd(date[3])?;
    let day = bcd(time[0])?;
    let hour = bcd(time[1])?;
    let minute = bcd(time[2])?;
    let second = bcd(time[3])?;

    // Timezone byte: sign bit 0x40, magnitude in half hours.
    let tz_raw = date[0];
    let sign = if tz_raw & 0x40 != 0 { -1i32 } else { 1i32 };
    let offset_seconds = sign * (tz_raw & 0x3f) as i32 * 1800;

    let timestamp = CaptureTimestamp::from_fields(
        (100 * century + year2) as i32,
        month,
        day,
        hour,
        minute,
        second,
        offset_seconds,
    );
    if timestamp.is_none() {
        log::warn!("MDPM item fields do not form a valid datetime, skipping");
    }
    timestamp
}

/// Decode one BCD byte (`0x20` means decimal 20).
fn bcd(byte: u8) -> Option<u32> {
    let high = (byte >> 4) as u32;
    let low = (byte & 0x0f) as u32;
    if high > 9 || low > 9 {
        log::warn!("byte {byte:#04x} is not valid BCD");
        return None;
    }
    Some(high * 10 + low)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_decodes_decimal_digits() {
        assert_eq!(bcd(0x00), Some(0));
        assert_eq!(bcd(0x20), Some(20));
        assert_eq!(bcd(0x59), Some(59));
        assert_eq!(bcd(0x5a), None);
        assert_eq!(bcd(0xa0), None);
    }

    #[test]
    fn annex_b_split_finds_units() {
        // SPS-like unit, then a slice that runs to the end of the packet.
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0xaa, 0xbb, // first unit
            0x00, 0x00, 0x01, 0x65, 0x11, 0x22, 0x33, // IDR slice
        ];
        let units = annex_b_units(&data);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], &[0x67, 0xaa, 0xbb]);
        assert_eq!(units[1], &[0x65, 0x11, 0x22, 0x33]);
    }

    #[test]
    fn length_prefixed_split_rejects_overrun() {
        let data = [0x00, 0x00, 0x00, 0x08, 0x41, 0x00];
        assert!(length_prefixed_units(&data).is_empty());
    }
}
