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

//! Per-scenario records and their aggregation into one run metric.

use framescrub_decoder::{SeekReply, SeekStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Ok,
    Error,
    Stale,
}

/// Outcome of one QA seek.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRecord {
    pub scenario_id: usize,
    pub target_us: i64,
    pub status: ScenarioStatus,
    pub decoded_us: Option<i64>,
    pub drift_us: Option<i64>,
    pub drift_frames: Option<i64>,
    pub decode_ms: f64,
    pub from_cache: bool,
    pub skipped_to_idr_samples: usize,
    pub keyframe_start_us: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ScenarioRecord {
    /// Builds the record for a seek reply. `frame_duration_us` converts drift to frames.
    pub fn from_reply(
        scenario_id: usize,
        target_us: i64,
        reply: &SeekReply,
        frame_duration_us: Option<f64>,
    ) -> Self {
        let (status, message) = match &reply.status {
            SeekStatus::Ok { .. } => (ScenarioStatus::Ok, None),
            SeekStatus::Error { message } => (ScenarioStatus::Error, Some(message.clone())),
            SeekStatus::Stale => (ScenarioStatus::Stale, None),
        };
        let decoded_us = reply.timestamp_us();
        let drift_us = decoded_us.map(|decoded| decoded - target_us);
        Self {
            scenario_id,
            target_us,
            status,
            decoded_us,
            drift_us,
            drift_frames: drift_us.and_then(|drift| drift_in_frames(drift, frame_duration_us)),
            decode_ms: reply.stats.decode_ms,
            from_cache: reply.from_cache(),
            skipped_to_idr_samples: reply.stats.skipped_to_idr_samples,
            keyframe_start_us: reply.stats.keyframe_start_us,
            message,
        }
    }

    /// A scenario that never got a reply.
    pub fn failed(scenario_id: usize, target_us: i64, message: impl Into<String>) -> Self {
        Self {
            scenario_id,
            target_us,
            status: ScenarioStatus::Error,
            decoded_us: None,
            drift_us: None,
            drift_frames: None,
            decode_ms: 0.0,
            from_cache: false,
            skipped_to_idr_samples: 0,
            keyframe_start_us: None,
            message: Some(message.into()),
        }
    }
}

/// `round(drift / frame duration)`, `None` without a usable frame duration.
pub fn drift_in_frames(drift_us: i64, frame_duration_us: Option<f64>) -> Option<i64> {
    let frame = frame_duration_us.filter(|d| *d > 0.0)?;
    Some((drift_us as f64 / frame).round() as i64)
}

/// Aggregate over one QA run of one profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub profile: String,
    #[serde(rename = "runAt")]
    pub run_at_ms: u64,
    #[serde(rename = "totalScenarios")]
    pub total_scenarios: usize,
    pub time_to_first_frame_ms: Option<f64>,
    pub seek_success_pct: f64,
    pub decode_errors: usize,
    pub stale_results: usize,
    pub drift_within_1frame_pct: f64,
    pub avg_drift_ms: f64,
    pub max_drift_ms: f64,
}

impl Metric {
    /// Metric of a run that issued nothing.
    pub fn empty(profile: &str, run_at_ms: u64) -> Self {
        aggregate(profile, run_at_ms, &[])
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

/// Folds scenario records into a [`Metric`]. Stale results count only toward `stale_results`.
pub fn aggregate(profile: &str, run_at_ms: u64, scenarios: &[ScenarioRecord]) -> Metric {
    let stale = scenarios
        .iter()
        .filter(|s| s.status == ScenarioStatus::Stale)
        .count();
    let errors = scenarios
        .iter()
        .filter(|s| s.status == ScenarioStatus::Error)
        .count();
    let ok: Vec<&ScenarioRecord> = scenarios
        .iter()
        .filter(|s| s.status == ScenarioStatus::Ok)
        .collect();

    let within_one = ok
        .iter()
        .filter(|s| s.drift_frames.is_some_and(|f| f.abs() <= 1))
        .count();
    let drifts_ms: Vec<f64> = ok
        .iter()
        .filter_map(|s| s.drift_us)
        .map(|d| d.abs() as f64 / 1000.0)
        .collect();
    let avg_drift_ms = if drifts_ms.is_empty() {
        0.0
    } else {
        drifts_ms.iter().sum::<f64>() / drifts_ms.len() as f64
    };

    Metric {
        profile: profile.to_string(),
        run_at_ms,
        total_scenarios: scenarios.len(),
        time_to_first_frame_ms: scenarios.first().map(|s| s.decode_ms),
        seek_success_pct: pct(ok.len(), scenarios.len() - stale),
        decode_errors: errors,
        stale_results: stale,
        drift_within_1frame_pct: pct(within_one, ok.len()),
        avg_drift_ms,
        max_drift_ms: drifts_ms.iter().copied().fold(0.0, f64::max),
    }
}
