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

//! Threshold evaluation and the per-profile verdict.

use crate::metric::Metric;
use framescrub_decoder::LoadedInfo;
use serde::{Deserialize, Serialize};

pub const MISSING_METRIC: &str = "missing-metric";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Minimum share of non-stale seeks that succeed.
    pub seek_success_pct: f64,
    /// Minimum share of successful seeks landing within one frame of the target.
    pub drift_within_1frame_pct: f64,
    /// Exact number of decode errors expected.
    pub decode_errors: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            seek_success_pct: 98.0,
            drift_within_1frame_pct: 95.0,
            decode_errors: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub pass: bool,
    pub reasons: Vec<String>,
}

/// Compares a metric against thresholds. A run that issued no scenarios never passes.
pub fn evaluate(metric: &Metric, thresholds: &Thresholds) -> Evaluation {
    if metric.total_scenarios == 0 {
        return Evaluation {
            pass: false,
            reasons: vec![MISSING_METRIC.to_string()],
        };
    }

    let mut reasons = Vec::new();
    if metric.seek_success_pct < thresholds.seek_success_pct {
        reasons.push(format!(
            "seek_success_pct={:.2} < {}",
            metric.seek_success_pct, thresholds.seek_success_pct
        ));
    }
    if metric.drift_within_1frame_pct < thresholds.drift_within_1frame_pct {
        reasons.push(format!(
            "drift_within_1frame_pct={:.2} < {}",
            metric.drift_within_1frame_pct, thresholds.drift_within_1frame_pct
        ));
    }
    if metric.decode_errors != thresholds.decode_errors {
        reasons.push(format!(
            "decode_errors={} != {}",
            metric.decode_errors, thresholds.decode_errors
        ));
    }

    Evaluation {
        pass: reasons.is_empty(),
        reasons,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Pass,
    ThresholdFailed,
    MissingMetric,
    SkippedFmp4FallbackPolicy,
    SkippedUnsupportedWebcodecsCodec,
}

impl RunStatus {
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            RunStatus::SkippedFmp4FallbackPolicy | RunStatus::SkippedUnsupportedWebcodecsCodec
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: RunStatus,
    pub pass: bool,
    pub reasons: Vec<String>,
}

/// Final verdict for a profile.
///
/// Fragmented and unsupported sources are served by the fallback path; they pass as skips
/// whatever their measured numbers.
pub fn classify(loaded: Option<&LoadedInfo>, metric: &Metric, thresholds: &Thresholds) -> Verdict {
    if let Some(info) = loaded {
        if info.is_fragmented {
            return Verdict {
                status: RunStatus::SkippedFmp4FallbackPolicy,
                pass: true,
                reasons: Vec::new(),
            };
        }
        if !info.web_codecs_support {
            return Verdict {
                status: RunStatus::SkippedUnsupportedWebcodecsCodec,
                pass: true,
                reasons: vec![format!("codec {} has no frame-accurate decoder", info.codec)],
            };
        }
    }

    let evaluation = evaluate(metric, thresholds);
    let status = if evaluation.pass {
        RunStatus::Pass
    } else if metric.total_scenarios == 0 {
        RunStatus::MissingMetric
    } else {
        RunStatus::ThresholdFailed
    };
    Verdict {
        status,
        pass: evaluation.pass,
        reasons: evaluation.reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(success: f64, within: f64, errors: usize) -> Metric {
        Metric {
            total_scenarios: 24,
            seek_success_pct: success,
            drift_within_1frame_pct: within,
            decode_errors: errors,
            ..Metric::empty("p", 0)
        }
    }

    #[test]
    fn low_success_fails_with_reason() {
        let evaluation = evaluate(&metric(97.0, 96.0, 0), &Thresholds::default());
        assert!(!evaluation.pass);
        assert_eq!(evaluation.reasons, vec!["seek_success_pct=97.00 < 98"]);
    }

    #[test]
    fn decode_errors_must_match_exactly() {
        let thresholds = Thresholds {
            decode_errors: 1,
            ..Default::default()
        };
        let evaluation = evaluate(&metric(100.0, 100.0, 0), &thresholds);
        assert_eq!(evaluation.reasons, vec!["decode_errors=0 != 1"]);
        assert!(evaluate(&metric(100.0, 100.0, 1), &thresholds).pass);
    }

    #[test]
    fn every_failed_threshold_is_listed() {
        let evaluation = evaluate(&metric(50.0, 12.5, 3), &Thresholds::default());
        assert_eq!(
            evaluation.reasons,
            vec![
                "seek_success_pct=50.00 < 98",
                "drift_within_1frame_pct=12.50 < 95",
                "decode_errors=3 != 0",
            ]
        );
    }

    #[test]
    fn zero_scenarios_is_missing_metric() {
        let empty = Metric::empty("p", 0);
        let evaluation = evaluate(&empty, &Thresholds::default());
        assert!(!evaluation.pass);
        assert_eq!(evaluation.reasons, vec![MISSING_METRIC]);

        let verdict = classify(None, &empty, &Thresholds::default());
        assert_eq!(verdict.status, RunStatus::MissingMetric);
        assert!(!verdict.pass);
    }

    #[test]
    fn status_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_value(RunStatus::SkippedFmp4FallbackPolicy).unwrap(),
            "skipped-fmp4-fallback-policy"
        );
        assert_eq!(
            serde_json::to_value(RunStatus::SkippedUnsupportedWebcodecsCodec).unwrap(),
            "skipped-unsupported-webcodecs-codec"
        );
        assert_eq!(
            serde_json::to_value(RunStatus::ThresholdFailed).unwrap(),
            "threshold-failed"
        );
    }
}
