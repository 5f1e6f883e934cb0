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

//! The QA harness: drives one decode session per profile through a battery of seeks.
//!
//! The harness only talks to the session through its public protocol. Scenarios are issued
//! one at a time and each is awaited before the next, so drift is always attributable.

use crate::config::QaConfig;
use crate::manifest::{Manifest, ProfileSpec};
use crate::metric::{aggregate, Metric, ScenarioRecord, ScenarioStatus};
use crate::outliers::{CandidateConfig, OutlierCandidate};
use crate::scenario::generate_targets;
use crate::thresholds::{classify, Thresholds, Verdict};
use anyhow::{Context, Result};
use framescrub_decoder::{
    DecodeClient, DecodePrimitive, LoadedInfo, SeekReason, SessionError, SessionNote,
    SyntheticDecoder,
};
use framescrub_diagnostics::{metric, now_ms, publish, DiagEvent};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Builds a fresh decode primitive for every session the harness starts.
pub type PrimitiveFactory = Arc<dyn Fn() -> Box<dyn DecodePrimitive> + Send + Sync>;

/// Pause between attempts after a transient failure.
const RETRY_BACKOFF: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub profile: String,
    /// Overrides the profile's and the harness's scenario count.
    pub scenario_count: Option<usize>,
}

impl RunRequest {
    pub fn new(profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            scenario_count: None,
        }
    }

    pub fn with_scenarios(mut self, count: usize) -> Self {
        self.scenario_count = Some(count);
        self
    }
}

/// Everything observed while running a profile, apart from the scenarios themselves.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDiagnostics {
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<LoadedInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
    pub session_notes: Vec<SessionNote>,
    /// Frame resources still alive after the session was disposed; anything but 0 is a leak.
    pub live_frames_after_dispose: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub profile: String,
    pub metric: Metric,
    pub verdict: Verdict,
    pub thresholds: Thresholds,
    pub scenarios: Vec<ScenarioRecord>,
    pub diagnostics: RunDiagnostics,
    #[serde(skip)]
    pub candidates: Vec<OutlierCandidate>,
}

pub struct QaHarness {
    config: QaConfig,
    thresholds: Thresholds,
    manifest: Manifest,
    primitives: PrimitiveFactory,
}

impl QaHarness {
    pub fn new(config: QaConfig, thresholds: Thresholds, manifest: Manifest) -> Self {
        Self {
            config,
            thresholds,
            manifest,
            primitives: Arc::new(|| Box::new(SyntheticDecoder::new())),
        }
    }

    pub fn with_primitive_factory(mut self, primitives: PrimitiveFactory) -> Self {
        self.primitives = primitives;
        self
    }

    pub fn config(&self) -> &QaConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Runs one profile, retrying environmental failures up to `max_attempts` times.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        let profile = self
            .manifest
            .profile(&request.profile)
            .with_context(|| format!("Unknown profile '{}'", request.profile))?;
        let scenario_count = request
            .scenario_count
            .or(profile.scenario_count)
            .unwrap_or(self.config.scenario_count);
        let thresholds = profile.thresholds.unwrap_or(self.thresholds);
        let max_attempts = self.config.max_attempts.max(1);

        let mut attempt = 0;
        // Notes from every attempt, failed ones included.
        let mut notes = Vec::new();
        let outcome = loop {
            attempt += 1;
            match self.attempt(profile, scenario_count, &mut notes).await {
                Ok(outcome) => break outcome,
                Err(e) if is_transient(&e) && attempt < max_attempts => {
                    warn!(
                        "[QA] profile {} attempt {}/{} failed: {:#}; retrying",
                        profile.name, attempt, max_attempts, e
                    );
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(e) if is_transient(&e) => {
                    warn!("[QA] profile {} gave up after {} attempts", profile.name, attempt);
                    break Outcome::failed_load(format!("{e:#}"));
                }
                Err(e) => break Outcome::failed_load(format!("{e:#}")),
            }
        };

        let report = self.report(profile, thresholds, attempt, outcome, notes);
        publish_summary(&report);
        info!(
            "[QA] profile {}: {:?} ({} scenarios, {:.2}% success)",
            report.profile,
            report.verdict.status,
            report.metric.total_scenarios,
            report.metric.seek_success_pct
        );
        Ok(report)
    }

    /// One session lifetime: load, run the scenarios, dispose.
    ///
    /// Session notes are appended to `notes` whether or not the attempt succeeds.
    async fn attempt(
        &self,
        profile: &ProfileSpec,
        scenario_count: usize,
        notes: &mut Vec<SessionNote>,
    ) -> Result<Outcome> {
        let bytes = profile.media()?.read().await?;

        let mut session_config = self.config.session.clone();
        session_config.stream_id = profile.name.clone();
        let mut client = DecodeClient::spawn(session_config, (self.primitives)());

        let loaded = match client
            .load(
                bytes,
                &profile.mime_type,
                Some(self.config.audit_samples),
                self.config.load_timeout(),
            )
            .await
        {
            Ok(loaded) => loaded,
            Err(SessionError::Ingest(message)) => {
                let mut outcome = Outcome::failed_load(message);
                notes.extend(self.shutdown(&mut client).await);
                outcome.live_after_dispose = client.ledger().live();
                return Ok(outcome);
            }
            Err(e) => {
                notes.extend(self.shutdown(&mut client).await);
                return Err(e.into());
            }
        };
        debug!(
            "[QA] {} loaded: {} {}x{} @ {:.3} fps, {}us",
            profile.name, loaded.codec, loaded.width, loaded.height, loaded.fps, loaded.duration_us
        );

        let mut scenarios = Vec::new();
        // Unsupported codecs have no decode path to measure.
        if loaded.web_codecs_support {
            let frame_duration_us = (loaded.fps > 0.0).then(|| 1_000_000.0 / loaded.fps);
            let targets =
                generate_targets(loaded.duration_us, scenario_count, self.config.target_scheme);
            for (scenario_id, target_us) in targets.into_iter().enumerate() {
                match client
                    .seek(target_us, SeekReason::Qa, self.config.seek_timeout())
                    .await
                {
                    Ok(reply) => {
                        scenarios.push(ScenarioRecord::from_reply(
                            scenario_id,
                            target_us,
                            &reply,
                            frame_duration_us,
                        ));
                        reply.release();
                    }
                    Err(SessionError::Timeout(what)) => {
                        warn!("[QA] {} scenario {} timed out", profile.name, scenario_id);
                        scenarios.push(ScenarioRecord::failed(
                            scenario_id,
                            target_us,
                            format!("timeout waiting for {what}"),
                        ));
                    }
                    Err(e) => {
                        notes.extend(self.shutdown(&mut client).await);
                        return Err(e.into());
                    }
                }
            }
        }

        notes.extend(self.shutdown(&mut client).await);
        Ok(Outcome {
            loaded: Some(loaded),
            load_error: None,
            scenarios,
            live_after_dispose: client.ledger().live(),
        })
    }

    async fn shutdown(&self, client: &mut DecodeClient) -> Vec<SessionNote> {
        if let Err(e) = client.dispose(self.config.load_timeout()).await {
            warn!("[QA] session did not shut down cleanly: {}", e);
        }
        client.take_notes()
    }

    fn report(
        &self,
        profile: &ProfileSpec,
        thresholds: Thresholds,
        attempts: u32,
        outcome: Outcome,
        session_notes: Vec<SessionNote>,
    ) -> RunReport {
        let metric = aggregate(&profile.name, now_ms(), &outcome.scenarios);
        let verdict = classify(outcome.loaded.as_ref(), &metric, &thresholds);
        let candidates = outcome
            .loaded
            .as_ref()
            .map(|loaded| self.candidates(&profile.name, loaded, &outcome.scenarios))
            .unwrap_or_default();

        RunReport {
            profile: profile.name.clone(),
            metric,
            verdict,
            thresholds,
            scenarios: outcome.scenarios,
            diagnostics: RunDiagnostics {
                attempts,
                loaded: outcome.loaded,
                load_error: outcome.load_error,
                session_notes,
                live_frames_after_dispose: outcome.live_after_dispose,
            },
            candidates,
        }
    }

    fn candidates(
        &self,
        profile: &str,
        loaded: &LoadedInfo,
        scenarios: &[ScenarioRecord],
    ) -> Vec<OutlierCandidate> {
        let config = CandidateConfig {
            codec: loaded.codec.clone(),
            coded_width: loaded.coded_width,
            coded_height: loaded.coded_height,
            fps: loaded.fps,
            cache_capacity: self.config.session.cache_capacity,
        };
        scenarios
            .iter()
            .filter(|s| s.status == ScenarioStatus::Ok)
            .filter_map(|s| {
                Some(OutlierCandidate {
                    scenario_id: s.scenario_id,
                    target_us: s.target_us,
                    decoded_us: s.decoded_us?,
                    drift_us: s.drift_us?,
                    drift_frames: s.drift_frames?,
                    profile: profile.to_string(),
                    cache_hit: s.from_cache,
                    idr_skip_count: s.skipped_to_idr_samples,
                    config: config.clone(),
                })
            })
            .collect()
    }
}

/// What one attempt produced.
struct Outcome {
    loaded: Option<LoadedInfo>,
    load_error: Option<String>,
    scenarios: Vec<ScenarioRecord>,
    live_after_dispose: u64,
}

impl Outcome {
    fn failed_load(message: String) -> Self {
        Self {
            loaded: None,
            load_error: Some(message),
            scenarios: Vec::new(),
            live_after_dispose: 0,
        }
    }
}

fn is_transient(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<SessionError>()
        .is_some_and(SessionError::is_transient)
}

fn publish_summary(report: &RunReport) {
    let metric = &report.metric;
    publish(DiagEvent {
        subsystem: "qa",
        stream_id: Some(report.profile.clone()),
        ts_ms: metric.run_at_ms,
        metrics: vec![
            metric!("total_scenarios", metric.total_scenarios),
            metric!("seek_success_pct", metric.seek_success_pct),
            metric!("drift_within_1frame_pct", metric.drift_within_1frame_pct),
            metric!("decode_errors", metric.decode_errors),
            metric!("stale_results", metric.stale_results),
            metric!("max_drift_ms", metric.max_drift_ms),
            metric!("pass", report.verdict.pass),
        ],
    });
}
