//! Session-level integration tests.
//!
//! These need a real video at `tests/fixtures/sample.mp4` (constant frame
//! duration, at least two GOPs) and are skipped when it is absent.

use std::{future::Future, path::Path, task::Poll};

use framestep::{FrameStepError, GetFrame, SessionOptions, VideoSession};

fn sample_path() -> &'static str {
    "tests/fixtures/sample.mp4"
}

#[test]
fn open_probes_timing() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let session = VideoSession::open(path, SessionOptions::default()).expect("open");
    let timing = session.timing();
    assert!(timing.frame_count() > 0);
    assert!(timing.fps() > 0.0);
    assert!(timing.frame_duration_ticks > 0);
}

#[tokio::test]
async fn get_frame_returns_the_first_frame() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let session = VideoSession::open(path, SessionOptions::default()).expect("open");
    match session.get_frame(0).await.expect("get_frame") {
        GetFrame::Frame(frame) => {
            assert_eq!(frame.pts(), session.timing().start_tick);
            assert!(frame.width() > 0);
        }
        other => panic!("expected a frame, got {other:?}"),
    }
}

#[tokio::test]
async fn stepping_forward_hits_the_cache() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let session = VideoSession::open(path, SessionOptions::default()).expect("open");
    let upper = session.timing().frame_count().min(10);
    for n in 0..upper {
        match session.get_frame(n).await.expect("get_frame") {
            GetFrame::Frame(frame) => {
                assert_eq!(frame.pts(), session.timing().pts_for_frame_number(n));
            }
            GetFrame::Aborted => panic!("no competing request, frame {n} must not abort"),
            GetFrame::EndOfStream => panic!("frame {n} is inside the stream"),
        }
    }
}

#[tokio::test]
async fn asking_past_the_end_reports_end_of_stream() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let session = VideoSession::open(path, SessionOptions::default()).expect("open");
    let past = session.timing().frame_count() + 5;
    match session.get_frame(past).await.expect("get_frame") {
        GetFrame::EndOfStream => {}
        other => panic!("expected end of stream, got {other:?}"),
    }
}

#[tokio::test]
async fn later_request_supersedes_an_earlier_one() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let session = VideoSession::open(path, SessionOptions::default()).expect("open");
    let far = session.timing().frame_count().saturating_sub(1);

    // Register a request for the last frame and park it: the pipeline has
    // only just started, so nothing near the end can be cached yet.
    let mut first = Box::pin(session.get_frame(far));
    let parked = std::future::poll_fn(|cx| Poll::Ready(first.as_mut().poll(cx).is_pending())).await;
    assert!(parked, "a far frame cannot be ready at startup");

    match session.get_frame(0).await.expect("get_frame") {
        GetFrame::Frame(_) => {}
        other => panic!("expected frame 0, got {other:?}"),
    }

    match first.await.expect("get_frame") {
        GetFrame::Aborted => {}
        other => panic!("expected the earlier request to abort, got {other:?}"),
    }
}

#[test]
fn sequential_frames_count_up_by_one() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let mut session = VideoSession::open(path, SessionOptions::default()).expect("open");
    let mut expected = None;
    for result in session.frames().expect("frames").take(30) {
        let (frame_number, frame) = result.expect("decoded frame");
        if let Some(previous) = expected {
            assert_eq!(frame_number, previous + 1);
        }
        assert_eq!(
            frame.pts(),
            session.timing().pts_for_frame_number(frame_number)
        );
        expected = Some(frame_number);
    }
    assert!(expected.is_some(), "expected at least one frame");
}

#[tokio::test]
async fn sequence_and_random_access_are_mutually_exclusive() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let mut session = VideoSession::open(path, SessionOptions::default()).expect("open");
    let _sequence = session.frames().expect("frames");
    assert!(matches!(
        session.get_frame(0).await,
        Err(FrameStepError::PipelineInUse)
    ));
}

#[tokio::test]
async fn closed_session_rejects_requests() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let mut session = VideoSession::open(path, SessionOptions::default()).expect("open");
    session.close();
    assert!(matches!(
        session.get_frame(0).await,
        Err(FrameStepError::SessionClosed)
    ));
}

#[test]
fn scan_covers_the_stream_from_frame_zero() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let session = VideoSession::open(path, SessionOptions::default()).expect("open");
    let info = session.scan_frame_info(None, None).expect("scan");
    assert!(!info.is_empty());
    assert_eq!(info.keys().next(), Some(&0));
    for (frame_number, frame) in &info {
        assert_eq!(
            frame.pts,
            session.timing().pts_for_frame_number(*frame_number)
        );
    }
}

#[test]
fn cancelled_scan_stops_early() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let session = VideoSession::open(path, SessionOptions::default()).expect("open");
    let token = framestep::CancellationToken::new();
    token.cancel();
    assert!(matches!(
        session.scan_frame_info(None, Some(&token)),
        Err(FrameStepError::Cancelled)
    ));
}

#[test]
fn frame_info_is_disabled_by_default() {
    let path = sample_path();
    if !Path::new(path).exists() {
        return;
    }

    let session = VideoSession::open(path, SessionOptions::default()).expect("open");
    assert!(session.frame_info(0).is_none());
}
