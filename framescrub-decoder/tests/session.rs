/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

use framescrub_decoder::synthetic::{SyntheticCodec, SyntheticSpec};
use framescrub_decoder::{
    DecodeClient, Fmp4Policy, LoadedInfo, SeekReason, SeekStatus, SessionConfig, SessionError,
    SessionEvent, SessionNote, SyntheticDecoder,
};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn loaded(
    spec: &SyntheticSpec,
    decoder: SyntheticDecoder,
    config: SessionConfig,
) -> (DecodeClient, LoadedInfo) {
    init_logging();
    let mut client = DecodeClient::spawn(config, decoder);
    let info = client
        .load(spec.build(), "video/mp4", Some(30), TIMEOUT)
        .await
        .expect("load");
    (client, info)
}

#[tokio::test]
async fn keyframe_aligned_seek_has_zero_drift() {
    let spec = SyntheticSpec::default();
    let (mut client, info) = loaded(&spec, SyntheticDecoder::new(), SessionConfig::default()).await;
    assert_eq!(info.fmp4_policy, Fmp4Policy::FrameAccurate);
    assert!(info.web_codecs_support);
    assert_eq!(info.keyframe_count, 3);

    let target = spec.frame_timestamp_us(30);
    let reply = client.seek(target, SeekReason::Qa, TIMEOUT).await.unwrap();
    assert_eq!(reply.timestamp_us(), Some(target));
    assert!(!reply.from_cache());
    assert_eq!(reply.stats.skipped_to_idr_samples, 0);
    assert_eq!(reply.stats.keyframe_start_us, Some(target));
    assert_eq!(reply.stats.reason, SeekReason::Qa);
    reply.release();

    client.dispose(TIMEOUT).await.unwrap();
    assert_eq!(client.ledger().live(), 0);
}

#[tokio::test]
async fn repeated_seek_is_served_from_cache_without_decoding() {
    let spec = SyntheticSpec::default();
    let decoder = SyntheticDecoder::new();
    let decodes = decoder.decode_counter();
    let (mut client, _) = loaded(&spec, decoder, SessionConfig::default()).await;

    let target = spec.frame_timestamp_us(45);
    let first = client.seek(target, SeekReason::Preview, TIMEOUT).await.unwrap();
    assert!(!first.from_cache());
    first.release();
    let after_first = decodes.load(Ordering::Acquire);
    assert_eq!(after_first, 16);

    let second = client.seek(target, SeekReason::Preview, TIMEOUT).await.unwrap();
    assert!(second.from_cache());
    assert_eq!(second.timestamp_us(), Some(target));
    assert!(second.stats.decode_ms < 50.0);
    assert!(second.frame.is_some());
    second.release();
    assert_eq!(decodes.load(Ordering::Acquire), after_first);

    client.dispose(TIMEOUT).await.unwrap();
    assert_eq!(client.ledger().live(), 0);
    assert_eq!(client.ledger().leaked(), 0);
}

#[tokio::test]
async fn seek_between_frames_resolves_forward_and_hits_cache_again() {
    let spec = SyntheticSpec::default();
    let (mut client, _) = loaded(&spec, SyntheticDecoder::new(), SessionConfig::default()).await;

    let target = spec.frame_timestamp_us(12) + 5;
    let first = client.seek(target, SeekReason::Qa, TIMEOUT).await.unwrap();
    assert_eq!(first.timestamp_us(), Some(spec.frame_timestamp_us(13)));
    first.release();

    let again = client.seek(target, SeekReason::Qa, TIMEOUT).await.unwrap();
    assert!(again.from_cache());
    again.release();
    client.dispose(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn decoding_continues_inside_the_same_gop() {
    let spec = SyntheticSpec::default();
    let decoder = SyntheticDecoder::new();
    let decodes = decoder.decode_counter();
    let (mut client, _) = loaded(&spec, decoder, SessionConfig::default()).await;

    client
        .seek(spec.frame_timestamp_us(5), SeekReason::Preview, TIMEOUT)
        .await
        .unwrap()
        .release();
    assert_eq!(decodes.load(Ordering::Acquire), 6);

    client
        .seek(spec.frame_timestamp_us(10), SeekReason::Preview, TIMEOUT)
        .await
        .unwrap()
        .release();
    assert_eq!(decodes.load(Ordering::Acquire), 11);

    // Going backwards restarts at the keyframe.
    client
        .seek(spec.frame_timestamp_us(2), SeekReason::Preview, TIMEOUT)
        .await
        .unwrap()
        .release();
    assert_eq!(decodes.load(Ordering::Acquire), 14);
    client.dispose(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn superseded_requests_resolve_stale() {
    let spec = SyntheticSpec::default();
    let decoder = SyntheticDecoder::new().with_latency(Duration::from_millis(5));
    let (mut client, _) = loaded(&spec, decoder, SessionConfig::default()).await;

    let ids: Vec<u64> = [80, 50, 20]
        .iter()
        .map(|&frame| {
            client
                .issue_seek(spec.frame_timestamp_us(frame), SeekReason::Preview)
                .unwrap()
        })
        .collect();

    let mut statuses = HashMap::new();
    let mut frames_for = Vec::new();
    while statuses.len() < ids.len() {
        let event = tokio::time::timeout(TIMEOUT, client.next_event())
            .await
            .unwrap()
            .unwrap();
        match event {
            SessionEvent::Frame {
                request_id, frame, ..
            } => {
                frames_for.push(request_id);
                statuses.insert(request_id, "ok");
                frame.release();
            }
            SessionEvent::SeekResult(result) => {
                statuses.insert(result.request_id, result.status.label());
                if let Some(frame) = result.frame {
                    frame.release();
                }
            }
            other => other.release(),
        }
    }

    assert_eq!(statuses[&ids[0]], "stale");
    assert_eq!(statuses[&ids[1]], "stale");
    assert_eq!(statuses[&ids[2]], "ok");
    assert_eq!(frames_for, vec![ids[2]]);

    client.dispose(TIMEOUT).await.unwrap();
    assert_eq!(client.ledger().live(), 0);
    assert_eq!(client.ledger().leaked(), 0);
}

#[tokio::test]
async fn no_late_success_after_supersession_mid_decode() {
    let spec = SyntheticSpec::default();
    let decoder = SyntheticDecoder::new().with_latency(Duration::from_millis(20));
    let (mut client, _) = loaded(&spec, decoder, SessionConfig::default()).await;

    let slow = client
        .issue_seek(spec.frame_timestamp_us(89), SeekReason::Preview)
        .unwrap();
    // Let the slow seek get a few chunks into its GOP.
    tokio::time::sleep(Duration::from_millis(70)).await;
    let fast = client
        .issue_seek(spec.frame_timestamp_us(0), SeekReason::Preview)
        .unwrap();

    let mut seen = Vec::new();
    while seen.len() < 2 {
        let event = tokio::time::timeout(TIMEOUT, client.next_event())
            .await
            .unwrap()
            .unwrap();
        match event {
            SessionEvent::Frame {
                request_id, frame, ..
            } => {
                seen.push((request_id, "frame"));
                frame.release();
            }
            SessionEvent::SeekResult(result) => {
                seen.push((result.request_id, result.status.label()));
                if let Some(frame) = result.frame {
                    frame.release();
                }
            }
            other => other.release(),
        }
    }

    assert_eq!(seen, vec![(slow, "stale"), (fast, "frame")]);
    client.dispose(TIMEOUT).await.unwrap();
    assert_eq!(client.ledger().live(), 0);
}

/// Collects every remaining event until the session stops, keyed by request id.
async fn drain_replies(client: &mut DecodeClient) -> (HashMap<u64, Vec<String>>, bool) {
    let mut replies: HashMap<u64, Vec<String>> = HashMap::new();
    let mut saw_loaded = false;
    while let Some(event) = tokio::time::timeout(TIMEOUT, client.next_event())
        .await
        .unwrap()
    {
        match event {
            SessionEvent::Frame {
                request_id, frame, ..
            } => {
                frame.release();
                replies.entry(request_id).or_default().push("frame".to_string());
            }
            SessionEvent::SeekResult(result) => {
                let label = match &result.status {
                    SeekStatus::Error { message } => message.clone(),
                    other => other.label().to_string(),
                };
                if let Some(frame) = result.frame {
                    frame.release();
                }
                replies.entry(result.request_id).or_default().push(label);
            }
            SessionEvent::Loaded(_) => saw_loaded = true,
            other => other.release(),
        }
    }
    (replies, saw_loaded)
}

#[tokio::test]
async fn dispose_fails_in_flight_and_queued_seeks() {
    let spec = SyntheticSpec::default();
    let decoder = SyntheticDecoder::new().with_latency(Duration::from_millis(20));
    let (mut client, _) = loaded(&spec, decoder, SessionConfig::default()).await;

    let in_flight = client
        .issue_seek(spec.frame_timestamp_us(89), SeekReason::Preview)
        .unwrap();
    // A few chunks into the GOP, far from the target.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.handle().dispose();
    let queued: Vec<u64> = [10, 20]
        .iter()
        .map(|&frame| {
            client
                .issue_seek(spec.frame_timestamp_us(frame), SeekReason::Preview)
                .unwrap()
        })
        .collect();

    let (replies, _) = drain_replies(&mut client).await;
    assert_eq!(replies.len(), 3);
    for id in std::iter::once(in_flight).chain(queued) {
        assert_eq!(replies[&id], vec!["disposed".to_string()], "request {id}");
    }

    assert!(client.ledger().allocated() > 0);
    assert_eq!(client.ledger().live(), 0);
    assert_eq!(client.ledger().leaked(), 0);
}

#[tokio::test]
async fn load_queued_ahead_of_dispose_is_skipped() {
    init_logging();
    let decoder = SyntheticDecoder::new();
    let decodes = decoder.decode_counter();
    let mut client = DecodeClient::spawn(SessionConfig::default(), decoder);
    client
        .handle()
        .load(SyntheticSpec::default().build(), "video/mp4", None)
        .unwrap();
    client.handle().dispose();

    let (replies, saw_loaded) = drain_replies(&mut client).await;
    assert!(replies.is_empty());
    assert!(!saw_loaded);
    assert_eq!(decodes.load(Ordering::Acquire), 0);
    assert_eq!(client.ledger().allocated(), 0);
}

#[tokio::test]
async fn nearby_seek_within_tolerance_is_served_from_cache() {
    let spec = SyntheticSpec::default();
    let decoder = SyntheticDecoder::new();
    let decodes = decoder.decode_counter();
    let config = SessionConfig {
        cache_tolerance_us: 40_000,
        ..Default::default()
    };
    let (mut client, _) = loaded(&spec, decoder, config).await;

    client
        .seek(spec.frame_timestamp_us(10), SeekReason::Qa, TIMEOUT)
        .await
        .unwrap()
        .release();
    let after_first = decodes.load(Ordering::Acquire);
    assert_eq!(after_first, 11);

    // One frame later is inside the tolerance: the cached frame answers.
    let nearby = client
        .seek(spec.frame_timestamp_us(11), SeekReason::Qa, TIMEOUT)
        .await
        .unwrap();
    assert!(nearby.from_cache());
    assert_eq!(nearby.timestamp_us(), Some(spec.frame_timestamp_us(10)));
    nearby.release();
    assert_eq!(decodes.load(Ordering::Acquire), after_first);

    // Two frames later is not.
    let far = client
        .seek(spec.frame_timestamp_us(12), SeekReason::Qa, TIMEOUT)
        .await
        .unwrap();
    assert!(!far.from_cache());
    assert_eq!(far.timestamp_us(), Some(spec.frame_timestamp_us(12)));
    far.release();
    assert_eq!(decodes.load(Ordering::Acquire), after_first + 2);

    client.dispose(TIMEOUT).await.unwrap();
    assert_eq!(client.ledger().live(), 0);
    assert_eq!(client.ledger().leaked(), 0);
}

#[tokio::test]
async fn eviction_and_dispose_release_every_frame() {
    let spec = SyntheticSpec::default();
    let config = SessionConfig {
        cache_capacity: 2,
        ..Default::default()
    };
    let (mut client, _) = loaded(&spec, SyntheticDecoder::new(), config).await;

    for frame in [3, 17, 31, 48, 62, 75, 89] {
        let reply = client
            .seek(spec.frame_timestamp_us(frame), SeekReason::Qa, TIMEOUT)
            .await
            .unwrap();
        assert!(matches!(reply.status, SeekStatus::Ok { .. }));
        reply.release();
        assert!(client.ledger().live() <= 2);
    }

    client.dispose(TIMEOUT).await.unwrap();
    assert_eq!(client.ledger().live(), 0);
    assert_eq!(client.ledger().leaked(), 0);
}

#[tokio::test]
async fn non_idr_keyframes_are_walked_back() {
    let spec = SyntheticSpec {
        gop: 15,
        non_idr_keyframes: vec![30],
        ..Default::default()
    };
    let (mut client, info) =
        loaded(&spec, SyntheticDecoder::new(), SessionConfig::default()).await;
    assert_eq!(info.timestamp_audit.as_ref().unwrap().issue_count, 0);

    let target = spec.frame_timestamp_us(35);
    let reply = client.seek(target, SeekReason::Qa, TIMEOUT).await.unwrap();
    assert_eq!(reply.timestamp_us(), Some(target));
    assert_eq!(reply.stats.skipped_to_idr_samples, 1);
    assert_eq!(reply.stats.keyframe_start_us, Some(spec.frame_timestamp_us(15)));
    reply.release();
    client.dispose(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn decode_errors_are_reported_and_the_session_survives() {
    let spec = SyntheticSpec::default();
    let decoder = SyntheticDecoder::new().with_fault(40);
    let (mut client, _) = loaded(&spec, decoder, SessionConfig::default()).await;

    let failed = client
        .seek(spec.frame_timestamp_us(45), SeekReason::Qa, TIMEOUT)
        .await
        .unwrap();
    assert!(matches!(failed.status, SeekStatus::Error { .. }));
    failed.release();

    let notes = client.take_notes();
    let report = notes
        .iter()
        .find_map(|note| match note {
            SessionNote::DecoderError(report) => Some(report.clone()),
            _ => None,
        })
        .expect("decoder error report");
    assert_eq!(report.name, "EncodingError");
    assert_eq!(report.last_chunk.map(|c| c.sample_index), Some(40));
    assert!(report.config.codec.starts_with("avc1."));
    assert!(report.config.description_length > 0);

    let recovered = client
        .seek(spec.frame_timestamp_us(20), SeekReason::Qa, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(recovered.timestamp_us(), Some(spec.frame_timestamp_us(20)));
    recovered.release();
    client.dispose(TIMEOUT).await.unwrap();
    assert_eq!(client.ledger().live(), 0);
}

#[tokio::test]
async fn fragmented_sources_take_the_fallback_path() {
    let spec = SyntheticSpec {
        fragmented: true,
        ..Default::default()
    };
    let (mut client, info) =
        loaded(&spec, SyntheticDecoder::new(), SessionConfig::default()).await;
    assert!(info.is_fragmented);
    assert_eq!(info.fmp4_policy, Fmp4Policy::Fallback);
    assert!(!info.is_frame_accurate());

    let target = spec.frame_timestamp_us(40);
    for _ in 0..2 {
        let reply = client.seek(target, SeekReason::Preview, TIMEOUT).await.unwrap();
        assert!(!reply.from_cache());
        assert_eq!(reply.timestamp_us(), Some(spec.frame_timestamp_us(30)));
        reply.release();
    }
    client.dispose(TIMEOUT).await.unwrap();
    assert_eq!(client.ledger().live(), 0);
}

#[tokio::test]
async fn unsupported_codec_answers_with_errors() {
    let spec = SyntheticSpec {
        codec: SyntheticCodec::Mpeg4,
        ..Default::default()
    };
    let (mut client, info) =
        loaded(&spec, SyntheticDecoder::new(), SessionConfig::default()).await;
    assert!(!info.web_codecs_support);
    assert_eq!(info.codec, "mp4v");

    let reply = client.seek(0, SeekReason::Qa, TIMEOUT).await.unwrap();
    assert_eq!(
        reply.status,
        SeekStatus::Error {
            message: "unsupported-codec".to_string()
        }
    );
    client.dispose(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn corrupt_index_fails_the_load() {
    init_logging();
    let spec = SyntheticSpec {
        fragmented: true,
        rewind_fragment: Some(2),
        ..Default::default()
    };
    let mut client = DecodeClient::spawn(SessionConfig::default(), SyntheticDecoder::new());
    let err = client
        .load(spec.build(), "video/mp4", None, TIMEOUT)
        .await
        .unwrap_err();
    match err {
        SessionError::Ingest(message) => assert!(message.starts_with("CorruptIndex"), "{message}"),
        other => panic!("unexpected {other:?}"),
    }

    // The session is still usable for a good source.
    let info = client
        .load(SyntheticSpec::default().build(), "video/mp4", None, TIMEOUT)
        .await
        .unwrap();
    assert_eq!(info.keyframe_count, 3);
    client.dispose(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn audit_reports_zero_durations() {
    let spec = SyntheticSpec {
        zero_duration_at: Some(3),
        ..Default::default()
    };
    let (mut client, info) =
        loaded(&spec, SyntheticDecoder::new(), SessionConfig::default()).await;
    let audit = info.timestamp_audit.expect("audit");
    assert_eq!(audit.samples.len(), 30);
    assert_eq!(audit.issue_count, 1);
    assert_eq!(audit.samples[3].duration_us, 0);
    client.dispose(TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn seeks_after_dispose_fail() {
    let spec = SyntheticSpec::default();
    let (mut client, _) = loaded(&spec, SyntheticDecoder::new(), SessionConfig::default()).await;
    client.dispose(TIMEOUT).await.unwrap();
    client.dispose(TIMEOUT).await.unwrap();

    let err = client.seek(0, SeekReason::Preview, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, SessionError::Disposed));
    assert!(err.is_transient());
}
