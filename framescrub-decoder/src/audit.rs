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

//! Load-time timestamp auditing of the first chunks of a source.

use crate::frame::Chunk;
use serde::{Deserialize, Serialize};

/// One problem found on a sampled chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AuditIssue {
    /// Presentation time went backwards relative to the previous sampled chunk.
    TimestampRegression {
        #[serde(rename = "previousUs")]
        previous_us: i64,
    },
    NonPositiveDuration,
    /// Container sync flag and bitstream IDR flag disagree.
    KeyIdrMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditSample {
    pub sample_index: usize,
    pub timestamp_us: i64,
    pub duration_us: i64,
    pub is_key: bool,
    pub is_idr: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<AuditIssue>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampAudit {
    pub issue_count: usize,
    pub samples: Vec<AuditSample>,
}

impl TimestampAudit {
    pub fn is_clean(&self) -> bool {
        self.issue_count == 0
    }
}

/// Audits the first `samples` chunks in decode order.
///
/// Presentation timestamps may legitimately reorder with B-frames; every regression is still
/// counted, since the decode path here assumes output in decode order.
pub fn audit_chunks(chunks: &[Chunk], samples: usize) -> TimestampAudit {
    let mut audit = TimestampAudit::default();
    let mut previous: Option<i64> = None;

    for chunk in chunks.iter().take(samples) {
        let mut issues = Vec::new();
        if let Some(previous_us) = previous {
            if chunk.timestamp_us < previous_us {
                issues.push(AuditIssue::TimestampRegression { previous_us });
            }
        }
        if chunk.duration_us <= 0 {
            issues.push(AuditIssue::NonPositiveDuration);
        }
        if chunk.is_idr.is_some_and(|idr| idr != chunk.is_key) {
            issues.push(AuditIssue::KeyIdrMismatch);
        }
        previous = Some(chunk.timestamp_us);

        audit.issue_count += issues.len();
        audit.samples.push(AuditSample {
            sample_index: chunk.sample_index,
            timestamp_us: chunk.timestamp_us,
            duration_us: chunk.duration_us,
            is_key: chunk.is_key,
            is_idr: chunk.is_idr,
            issues,
        });
    }
    audit
}
