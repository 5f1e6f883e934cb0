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

//! Runs a set of profiles and persists the run's artifacts.

use crate::artifacts::{ArtifactStore, OutlierReport, RunSummary};
use crate::harness::{QaHarness, RunReport, RunRequest};
use crate::outliers::rank_outliers;
use anyhow::Result;
use framescrub_diagnostics::now_ms;
use log::{error, info};

#[derive(Debug, Clone)]
pub struct SuiteOutcome {
    pub reports: Vec<RunReport>,
    pub summary: RunSummary,
    pub outliers: OutlierReport,
}

impl SuiteOutcome {
    pub fn pass(&self) -> bool {
        self.summary.pass
    }
}

/// Runs `profiles` (every manifest profile when empty) one after another.
///
/// Profiles never share a session. Artifacts are written only when `store` is given.
pub async fn run_suite(
    harness: &QaHarness,
    profiles: &[String],
    scenario_count: Option<usize>,
    store: Option<&ArtifactStore>,
) -> Result<SuiteOutcome> {
    let run_at_ms = now_ms();
    let names: Vec<String> = harness
        .manifest()
        .select(profiles)?
        .into_iter()
        .map(|p| p.name.clone())
        .collect();

    let mut reports = Vec::with_capacity(names.len());
    for name in names {
        let mut request = RunRequest::new(name);
        request.scenario_count = scenario_count;
        let report = harness.run(request).await?;
        if !report.verdict.pass {
            for reason in &report.verdict.reasons {
                error!("[QA] {}: {}", report.profile, reason);
            }
        }
        if let Some(store) = store {
            store.write_report(&report).await?;
        }
        reports.push(report);
    }

    let candidates = reports
        .iter()
        .flat_map(|r| r.candidates.iter().cloned())
        .collect();
    let outliers = OutlierReport {
        run_at_ms,
        outliers: rank_outliers(candidates, harness.config().outlier_limit),
    };
    let summary = RunSummary::new(run_at_ms, &reports);

    if let Some(store) = store {
        store.write_summary(&summary).await?;
        store.write_outliers(&outliers).await?;
    }
    info!(
        "[QA] suite finished: {}/{} profiles passed",
        summary.profiles.iter().filter(|p| p.pass).count(),
        summary.profiles.len()
    );

    Ok(SuiteOutcome {
        reports,
        summary,
        outliers,
    })
}
