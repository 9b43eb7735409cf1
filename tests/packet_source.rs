//! Packet source integration tests.
//!
//! Most of these need a real video at `tests/fixtures/sample.mp4` and are
//! skipped when it is absent.

use std::path::Path;

use framestep::{FrameStepError, PacketSource, probe_timing};

fn sample_path() -> &'static str {
    "tests/fixtures/sample.mp4"
}

#[test]
fn missing_file_fails_to_open() {
    let result = PacketSource::open("tests/fixtures/does_not_exist.mp4");
    assert!(matches!(result, Err(FrameStepError::FileOpen { .. })));
}

#[test]
fn read_before_seek_is_rejected() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let mut source = PacketSource::open(path).expect("open");
    assert!(matches!(source.next(), Err(FrameStepError::SourceBusy)));
}

#[test]
fn byte_rewind_reproduces_a_fresh_read() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let timing = probe_timing(path).expect("probe");
    let mut source = PacketSource::open(path).expect("open");

    source.seek(0, &timing).expect("seek");
    let mut first_pass = Vec::new();
    while let Some(packet) = source.next().expect("next") {
        first_pass.push((packet.pts(), packet.dts()));
    }
    assert!(!first_pass.is_empty(), "expected at least one packet");

    source.seek(0, &timing).expect("re-seek");
    let mut second_pass = Vec::new();
    while let Some(packet) = source.next().expect("next") {
        second_pass.push((packet.pts(), packet.dts()));
    }

    assert_eq!(first_pass, second_pass);
}

#[test]
fn extradata_presence_matches_the_probed_bitstream_format() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let timing = probe_timing(path).expect("probe");
    let source = PacketSource::open(path).expect("open");
    assert_eq!(source.has_extradata(), !timing.is_annex_b);
}

#[test]
fn forward_seek_lands_at_or_before_the_target() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let timing = probe_timing(path).expect("probe");
    let target = timing.frame_count() / 2;
    if target == 0 {
        return;
    }

    let mut source = PacketSource::open(path).expect("open");
    source.seek(target, &timing).expect("seek");
    let packet = source.next().expect("next").expect("packet after seek");
    let pts = packet.pts().or(packet.dts()).expect("timestamp");
    assert!(
        pts <= timing.pts_for_frame_number(target),
        "seek overshot: landed at tick {pts}"
    );
}
