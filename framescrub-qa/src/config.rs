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

//! QA run configuration.

use crate::scenario::TargetScheme;
use framescrub_decoder::SessionConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QaConfig {
    /// Seeks issued per profile when neither the request nor the profile says otherwise.
    pub scenario_count: usize,
    pub target_scheme: TargetScheme,
    pub load_timeout_ms: u64,
    pub seek_timeout_ms: u64,
    /// Attempts per profile when a run fails for environmental reasons.
    pub max_attempts: u32,
    /// Candidates kept in the cross-profile outlier report.
    pub outlier_limit: usize,
    /// Chunks audited at load.
    pub audit_samples: usize,
    pub session: SessionConfig,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            scenario_count: 24,
            target_scheme: TargetScheme::Even,
            load_timeout_ms: 10_000,
            seek_timeout_ms: 5_000,
            max_attempts: 3,
            outlier_limit: 20,
            audit_samples: 60,
            session: SessionConfig::default(),
        }
    }
}

impl QaConfig {
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn seek_timeout(&self) -> Duration {
        Duration::from_millis(self.seek_timeout_ms)
    }
}
