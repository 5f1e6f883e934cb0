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
use framescrub_decoder::frame::EncodedChunk;
use framescrub_decoder::{
    DecodeError, DecodePrimitive, DecodedFrame, DecoderConfig, ResourceLedger, SessionNote,
    SyntheticDecoder,
};
use framescrub_qa::{
    run_suite, ArtifactStore, Manifest, ProfileSpec, QaConfig, QaHarness, RunRequest,
    RunStatus, ScenarioStatus, Thresholds,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn avc() -> SyntheticSpec {
    SyntheticSpec {
        fps: 30.0,
        frame_count: 60,
        gop: 15,
        ..SyntheticSpec::default()
    }
}

fn harness(profiles: Vec<ProfileSpec>) -> QaHarness {
    let config = QaConfig {
        scenario_count: 8,
        ..QaConfig::default()
    };
    QaHarness::new(config, Thresholds::default(), Manifest { profiles })
}

#[tokio::test]
async fn clean_avc_profile_passes_with_zero_drift_at_edges() {
    let harness = harness(vec![ProfileSpec::synthetic("avc", avc())]);
    let report = harness.run(RunRequest::new("avc")).await.unwrap();

    assert_eq!(report.verdict.status, RunStatus::Pass);
    assert!(report.verdict.pass);
    assert_eq!(report.metric.total_scenarios, 8);
    assert_eq!(report.metric.seek_success_pct, 100.0);
    assert_eq!(report.metric.drift_within_1frame_pct, 100.0);
    assert_eq!(report.metric.decode_errors, 0);
    assert!(report.metric.time_to_first_frame_ms.is_some());

    // Target 0 lands exactly on the first frame.
    let first = &report.scenarios[0];
    assert_eq!(first.target_us, 0);
    assert_eq!(first.drift_us, Some(0));

    assert_eq!(report.diagnostics.attempts, 1);
    assert_eq!(report.diagnostics.live_frames_after_dispose, 0);
    assert_eq!(report.candidates.len(), 8);
    assert!(report.candidates.iter().all(|c| c.config.codec.starts_with("avc1")));
}

#[tokio::test]
async fn request_scenario_count_overrides_config() {
    let harness = harness(vec![ProfileSpec::synthetic("avc", avc())]);
    let report = harness
        .run(RunRequest::new("avc").with_scenarios(3))
        .await
        .unwrap();
    assert_eq!(report.scenarios.len(), 3);
    assert_eq!(report.metric.total_scenarios, 3);
}

#[tokio::test]
async fn fragmented_source_is_a_passing_skip() {
    let spec = SyntheticSpec {
        fragmented: true,
        ..avc()
    };
    let harness = harness(vec![ProfileSpec::synthetic("fmp4", spec)]);
    let report = harness.run(RunRequest::new("fmp4")).await.unwrap();

    assert_eq!(report.verdict.status, RunStatus::SkippedFmp4FallbackPolicy);
    assert!(report.verdict.pass);
    let loaded = report.diagnostics.loaded.as_ref().unwrap();
    assert!(loaded.is_fragmented);
    assert!(!loaded.is_frame_accurate());
    // Preview seeks still answer, just not frame-accurately.
    assert!(report
        .scenarios
        .iter()
        .all(|s| s.status == ScenarioStatus::Ok && !s.from_cache));
}

#[tokio::test]
async fn unsupported_codec_skips_without_scenarios() {
    let spec = SyntheticSpec {
        codec: SyntheticCodec::Mpeg4,
        ..avc()
    };
    let harness = harness(vec![ProfileSpec::synthetic("mpeg4", spec)]);
    let report = harness.run(RunRequest::new("mpeg4")).await.unwrap();

    assert_eq!(report.verdict.status, RunStatus::SkippedUnsupportedWebcodecsCodec);
    assert!(report.verdict.pass);
    assert!(report.scenarios.is_empty());
}

#[tokio::test]
async fn corrupt_source_reports_missing_metric() {
    let spec = SyntheticSpec {
        fragmented: true,
        fragment_frames: 10,
        rewind_fragment: Some(2),
        ..avc()
    };
    let harness = harness(vec![ProfileSpec::synthetic("broken", spec)]);
    let report = harness.run(RunRequest::new("broken")).await.unwrap();

    assert_eq!(report.verdict.status, RunStatus::MissingMetric);
    assert!(!report.verdict.pass);
    assert_eq!(report.metric.total_scenarios, 0);
    assert!(report.diagnostics.loaded.is_none());
    let load_error = report.diagnostics.load_error.as_deref().unwrap();
    assert!(load_error.contains("CorruptIndex"), "{load_error}");
    // A real answer from the session is never retried.
    assert_eq!(report.diagnostics.attempts, 1);
}

#[tokio::test]
async fn decode_fault_fails_thresholds_with_reasons() {
    let harness = harness(vec![ProfileSpec::synthetic("avc", avc())]).with_primitive_factory(
        Arc::new(|| Box::new(SyntheticDecoder::new().with_fault(20)) as Box<dyn DecodePrimitive>),
    );
    let report = harness.run(RunRequest::new("avc")).await.unwrap();

    assert_eq!(report.verdict.status, RunStatus::ThresholdFailed);
    assert!(!report.verdict.pass);
    assert_eq!(report.metric.decode_errors, 1);
    assert!(report
        .verdict
        .reasons
        .iter()
        .any(|r| r.starts_with("decode_errors=1")));
    assert!(report
        .diagnostics
        .session_notes
        .iter()
        .any(|n| matches!(n, SessionNote::DecoderError(_))));
    // Frames decoded before the fault were still released.
    assert_eq!(report.diagnostics.live_frames_after_dispose, 0);
}

#[tokio::test]
async fn seek_timeouts_become_scenario_errors() {
    let config = QaConfig {
        scenario_count: 2,
        seek_timeout_ms: 5,
        ..QaConfig::default()
    };
    let harness = QaHarness::new(
        config,
        Thresholds::default(),
        Manifest {
            profiles: vec![ProfileSpec::synthetic("slow", avc())],
        },
    )
    .with_primitive_factory(Arc::new(|| {
        Box::new(SyntheticDecoder::new().with_latency(Duration::from_millis(40)))
            as Box<dyn DecodePrimitive>
    }));
    let report = harness.run(RunRequest::new("slow")).await.unwrap();

    assert_eq!(report.scenarios.len(), 2);
    for scenario in &report.scenarios {
        assert_eq!(scenario.status, ScenarioStatus::Error);
        assert_eq!(scenario.message.as_deref(), Some("timeout waiting for seek"));
    }
    assert_eq!(report.verdict.status, RunStatus::ThresholdFailed);
}

/// Takes `delay` to accept a configuration, then decodes like the synthetic decoder.
struct SlowToConfigure {
    inner: SyntheticDecoder,
    delay: Duration,
}

impl DecodePrimitive for SlowToConfigure {
    fn name(&self) -> &'static str {
        "slow-to-configure"
    }

    fn is_supported(&self, config: &DecoderConfig) -> bool {
        self.inner.is_supported(config)
    }

    fn configure(&mut self, config: &DecoderConfig) -> Result<(), DecodeError> {
        std::thread::sleep(self.delay);
        self.inner.configure(config)
    }

    fn decode(
        &mut self,
        chunk: &EncodedChunk,
        ledger: &Arc<ResourceLedger>,
    ) -> Result<DecodedFrame, DecodeError> {
        self.inner.decode(chunk, ledger)
    }

    fn reset(&mut self) {
        self.inner.reset()
    }
}

#[tokio::test]
async fn notes_from_a_retried_attempt_are_kept() {
    let config = QaConfig {
        scenario_count: 2,
        // The first session outlives the load timeout but finishes within the dispose drain.
        load_timeout_ms: 400,
        ..QaConfig::default()
    };
    let sessions = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&sessions);
    let harness = QaHarness::new(
        config,
        Thresholds::default(),
        Manifest {
            profiles: vec![ProfileSpec::synthetic("avc", avc())],
        },
    )
    .with_primitive_factory(Arc::new(move || {
        if counter.fetch_add(1, Ordering::AcqRel) == 0 {
            Box::new(SlowToConfigure {
                inner: SyntheticDecoder::new(),
                delay: Duration::from_millis(600),
            }) as Box<dyn DecodePrimitive>
        } else {
            Box::new(SyntheticDecoder::new())
        }
    }));
    let report = harness.run(RunRequest::new("avc")).await.unwrap();

    assert_eq!(report.diagnostics.attempts, 2);
    assert_eq!(sessions.load(Ordering::Acquire), 2);
    assert!(report.diagnostics.loaded.is_some());
    assert_eq!(report.metric.total_scenarios, 2);
    let loads = report
        .diagnostics
        .session_notes
        .iter()
        .filter(|n| matches!(n, SessionNote::Log { message } if message.starts_with("loaded")))
        .count();
    assert_eq!(loads, 2, "{:?}", report.diagnostics.session_notes);
}

#[tokio::test]
async fn unknown_profile_is_an_error() {
    let harness = harness(vec![ProfileSpec::synthetic("avc", avc())]);
    let err = harness.run(RunRequest::new("nope")).await.unwrap_err();
    assert!(err.to_string().contains("nope"));
}

#[tokio::test]
async fn suite_writes_artifacts_and_ranks_outliers_across_profiles() {
    let dir = tempfile::tempdir().unwrap();
    let store = ArtifactStore::new(dir.path());
    let mut config = QaConfig {
        scenario_count: 6,
        ..QaConfig::default()
    };
    config.outlier_limit = 4;
    let harness = QaHarness::new(
        config,
        Thresholds::default(),
        Manifest {
            profiles: vec![
                ProfileSpec::synthetic("avc", avc()),
                ProfileSpec::synthetic(
                    "hevc-25",
                    SyntheticSpec {
                        fps: 25.0,
                        frame_count: 50,
                        gop: 25,
                        codec: SyntheticCodec::Hevc,
                        ..SyntheticSpec::default()
                    },
                ),
                ProfileSpec::synthetic(
                    "fmp4",
                    SyntheticSpec {
                        fragmented: true,
                        ..avc()
                    },
                ),
            ],
        },
    );

    let outcome = run_suite(&harness, &[], None, Some(&store)).await.unwrap();
    assert!(outcome.pass());
    assert_eq!(outcome.reports.len(), 3);

    let statuses: Vec<RunStatus> = outcome.summary.profiles.iter().map(|p| p.status).collect();
    assert_eq!(
        statuses,
        vec![
            RunStatus::Pass,
            RunStatus::Pass,
            RunStatus::SkippedFmp4FallbackPolicy
        ]
    );
    assert!(outcome.summary.profiles.iter().all(|p| p.fmp4_policy_compliant));

    let ranked = &outcome.outliers.outliers;
    assert!(ranked.len() <= 4);
    assert!(ranked
        .windows(2)
        .all(|w| w[0].drift_frames.unsigned_abs() >= w[1].drift_frames.unsigned_abs()));

    for report in &outcome.reports {
        assert!(store.latest_path(&report.profile).exists());
        assert!(store
            .history_path(&report.profile, report.metric.run_at_ms)
            .exists());
    }
    assert!(store.summary_path().exists());
    assert!(store.outliers_path().exists());

    let latest = store.read_latest("avc").await.unwrap();
    assert_eq!(latest["verdict"]["status"], "pass");
    assert_eq!(latest["metric"]["totalScenarios"], 6);

    // History records are immutable: a second write with the same run time gets its own record.
    let first = &outcome.reports[0];
    let original = store.history_path(&first.profile, first.metric.run_at_ms);
    let original_bytes = tokio::fs::read(&original).await.unwrap();
    let duplicate = store.write_report(&outcome.reports[0]).await.unwrap();
    assert_ne!(duplicate, original);
    assert!(duplicate.exists());
    assert_eq!(tokio::fs::read(&original).await.unwrap(), original_bytes);
    // Latest is not: a rerun of the same report with a new timestamp overwrites it.
    let mut rerun = outcome.reports[0].clone();
    rerun.metric.run_at_ms += 1;
    store.write_report(&rerun).await.unwrap();
}

#[tokio::test]
async fn suite_fails_when_any_profile_fails() {
    let corrupt = SyntheticSpec {
        fragmented: true,
        fragment_frames: 10,
        rewind_fragment: Some(2),
        ..avc()
    };
    let harness = harness(vec![
        ProfileSpec::synthetic("avc", avc()),
        ProfileSpec::synthetic("broken", corrupt),
    ]);
    let outcome = run_suite(&harness, &[], Some(4), None).await.unwrap();

    assert!(!outcome.pass());
    let broken = &outcome.summary.profiles[1];
    assert_eq!(broken.status, RunStatus::MissingMetric);
    assert_eq!(broken.reasons, vec!["missing-metric".to_string()]);
}
