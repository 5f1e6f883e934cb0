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

//! Seek-accuracy QA for `framescrub-decoder` sessions.
//!
//! A [`harness::QaHarness`] loads each profile of a [`manifest::Manifest`] into a fresh
//! session, issues a battery of seeks and folds the replies into a [`metric::Metric`]. The
//! [`thresholds`] module turns a metric into a verdict, [`outliers`] ranks the worst drift
//! across a run and [`artifacts`] persists everything as JSON.

pub mod artifacts;
pub mod config;
pub mod harness;
pub mod manifest;
pub mod metric;
pub mod outliers;
pub mod scenario;
pub mod suite;
pub mod thresholds;

pub use artifacts::{ArtifactStore, OutlierReport, ProfileSummary, RunSummary};
pub use config::QaConfig;
pub use harness::{PrimitiveFactory, QaHarness, RunDiagnostics, RunReport, RunRequest};
pub use manifest::{Manifest, MediaSource, ProfileSpec};
pub use metric::{aggregate, Metric, ScenarioRecord, ScenarioStatus};
pub use outliers::{rank_outliers, CandidateConfig, OutlierCandidate};
pub use scenario::{generate_targets, TargetScheme};
pub use suite::{run_suite, SuiteOutcome};
pub use thresholds::{classify, evaluate, Evaluation, RunStatus, Thresholds, Verdict};
