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

//! Cross-profile ranking of the worst-drift scenarios.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

/// Decoder setup the candidate was measured under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateConfig {
    pub codec: String,
    pub coded_width: u32,
    pub coded_height: u32,
    pub fps: f64,
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierCandidate {
    pub scenario_id: usize,
    pub target_us: i64,
    pub decoded_us: i64,
    pub drift_us: i64,
    pub drift_frames: i64,
    pub profile: String,
    pub cache_hit: bool,
    pub idr_skip_count: usize,
    pub config: CandidateConfig,
}

/// Sorts by `|drift_frames|` descending and keeps the first `limit`. Ties keep encounter order.
pub fn rank_outliers(mut candidates: Vec<OutlierCandidate>, limit: usize) -> Vec<OutlierCandidate> {
    candidates.sort_by_key(|c| Reverse(c.drift_frames.unsigned_abs()));
    candidates.truncate(limit);
    candidates
}
