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

//! Deterministic seek target generation.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum TargetScheme {
    /// Evenly spaced across the duration.
    #[default]
    Even,
    /// Uniformly random, reproducible from the seed.
    Seeded { seed: u64 },
}

/// Produces `count` targets in `[0, duration_us)`.
///
/// The first and last targets are always the edge cases `0` and `duration_us - 1`; the rest
/// follow the scheme.
pub fn generate_targets(duration_us: i64, count: usize, scheme: TargetScheme) -> Vec<i64> {
    if count == 0 {
        return Vec::new();
    }
    let last = (duration_us - 1).max(0);
    if count == 1 {
        return vec![0];
    }

    let interior = count - 2;
    let mut targets = Vec::with_capacity(count);
    targets.push(0);
    match scheme {
        TargetScheme::Even => {
            let steps = (count - 1) as i64;
            targets.extend((1..=interior as i64).map(|i| duration_us.max(0) * i / steps));
        }
        TargetScheme::Seeded { seed } => {
            let mut rng = StdRng::seed_from_u64(seed);
            targets.extend((0..interior).map(|_| {
                if last > 0 {
                    rng.gen_range(0..=last)
                } else {
                    0
                }
            }));
        }
    }
    targets.push(last);
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn even_targets_include_edges() {
        let targets = generate_targets(1_000_000, 5, TargetScheme::Even);
        assert_eq!(targets, vec![0, 250_000, 500_000, 750_000, 999_999]);
    }

    #[test]
    fn small_counts() {
        assert!(generate_targets(1_000, 0, TargetScheme::Even).is_empty());
        assert_eq!(generate_targets(1_000, 1, TargetScheme::Even), vec![0]);
        assert_eq!(generate_targets(1_000, 2, TargetScheme::Even), vec![0, 999]);
    }

    #[test]
    fn seeded_targets_are_reproducible_and_in_range() {
        let scheme = TargetScheme::Seeded { seed: 42 };
        let a = generate_targets(3_000_000, 24, scheme);
        let b = generate_targets(3_000_000, 24, scheme);
        assert_eq!(a, b);
        assert_eq!(a.len(), 24);
        assert!(a.iter().all(|&t| (0..3_000_000).contains(&t)));
        assert_ne!(a, generate_targets(3_000_000, 24, TargetScheme::Seeded { seed: 7 }));
    }

    #[test]
    fn scheme_parses_from_json() {
        let scheme: TargetScheme = serde_json::from_str(r#"{"scheme":"seeded","seed":9}"#).unwrap();
        assert_eq!(scheme, TargetScheme::Seeded { seed: 9 });
    }
}
