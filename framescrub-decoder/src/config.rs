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

//! Session configuration.

use serde::{Deserialize, Serialize};

/// Frames kept by default: enough for scrubbing back and forth, far from a whole asset.
pub const DEFAULT_CACHE_CAPACITY: usize = 32;

/// Chunks audited at load when the caller does not say otherwise.
pub const DEFAULT_AUDIT_SAMPLES: usize = 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// Maximum decoded frames held by the cache (0 disables caching).
    pub cache_capacity: usize,
    /// A cached frame up to this far before the resolved timestamp still satisfies a seek.
    pub cache_tolerance_us: i64,
    /// Audit sample count used when `load` does not carry one.
    pub default_audit_samples: usize,
    /// Label attached to diagnostics events.
    pub stream_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_tolerance_us: 0,
            default_audit_samples: DEFAULT_AUDIT_SAMPLES,
            stream_id: "session".to_string(),
        }
    }
}
