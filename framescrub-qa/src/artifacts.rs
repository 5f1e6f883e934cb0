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

//! On-disk artifacts of a QA run.
//!
//! ```text
//! <root>/latest/<profile>.json              overwritten every run
//! <root>/history/<profile>-<runAtMs>.json   written once, never replaced
//! <root>/history/<profile>-<runAtMs>-N.json same run time written again
//! <root>/summary.json                       pass/fail of every profile in the run
//! <root>/outliers.json                      worst drift candidates across the run
//! ```

use crate::harness::RunReport;
use crate::outliers::OutlierCandidate;
use crate::thresholds::RunStatus;
use anyhow::{Context, Result};
use framescrub_decoder::Fmp4Policy;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Suffixes tried before giving up on a history name.
const MAX_HISTORY_COLLISIONS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub profile: String,
    pub status: RunStatus,
    pub pass: bool,
    pub reasons: Vec<String>,
    pub is_fragmented: Option<bool>,
    pub fmp4_policy: Option<Fmp4Policy>,
    /// Fragmented sources must be served by the fallback path, never frame-accurately.
    pub fmp4_policy_compliant: bool,
}

impl From<&RunReport> for ProfileSummary {
    fn from(report: &RunReport) -> Self {
        let loaded = report.diagnostics.loaded.as_ref();
        let is_fragmented = loaded.map(|l| l.is_fragmented);
        let fmp4_policy = loaded.map(|l| l.fmp4_policy);
        let fmp4_policy_compliant = match loaded {
            Some(l) if l.is_fragmented => {
                l.fmp4_policy == Fmp4Policy::Fallback
                    && report.verdict.status == RunStatus::SkippedFmp4FallbackPolicy
            }
            _ => true,
        };
        Self {
            profile: report.profile.clone(),
            status: report.verdict.status,
            pass: report.verdict.pass,
            reasons: report.verdict.reasons.clone(),
            is_fragmented,
            fmp4_policy,
            fmp4_policy_compliant,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    #[serde(rename = "runAt")]
    pub run_at_ms: u64,
    pub pass: bool,
    pub profiles: Vec<ProfileSummary>,
}

impl RunSummary {
    pub fn new(run_at_ms: u64, reports: &[RunReport]) -> Self {
        let profiles: Vec<ProfileSummary> = reports.iter().map(ProfileSummary::from).collect();
        Self {
            run_at_ms,
            pass: profiles.iter().all(|p| p.pass && p.fmp4_policy_compliant),
            profiles,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierReport {
    #[serde(rename = "runAt")]
    pub run_at_ms: u64,
    pub outliers: Vec<OutlierCandidate>,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn latest_path(&self, profile: &str) -> PathBuf {
        self.root
            .join("latest")
            .join(format!("{}.json", file_stem(profile)))
    }

    pub fn history_path(&self, profile: &str, run_at_ms: u64) -> PathBuf {
        self.root
            .join("history")
            .join(format!("{}-{}.json", file_stem(profile), run_at_ms))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("summary.json")
    }

    pub fn outliers_path(&self) -> PathBuf {
        self.root.join("outliers.json")
    }

    /// Writes a profile's report as "latest" and appends it to the history.
    ///
    /// History entries are never replaced. Returns the history record that was created.
    pub async fn write_report(&self, report: &RunReport) -> Result<PathBuf> {
        let json = serde_json::to_vec_pretty(report).context("Failed to serialize run report")?;

        let latest = self.latest_path(&report.profile);
        write_file(&latest, &json).await?;

        let history = self
            .create_history(&report.profile, report.metric.run_at_ms, &json)
            .await?;

        debug!(
            "[ARTIFACTS] {} -> {} and {}",
            report.profile,
            latest.display(),
            history.display()
        );
        Ok(history)
    }

    /// Creates a new history record. When the run time is already taken the name gets a
    /// `-1`, `-2`, ... suffix.
    async fn create_history(
        &self,
        profile: &str,
        run_at_ms: u64,
        contents: &[u8],
    ) -> Result<PathBuf> {
        let first = self.history_path(profile, run_at_ms);
        ensure_parent(&first).await?;

        for collision in 0..=MAX_HISTORY_COLLISIONS {
            let path = if collision == 0 {
                first.clone()
            } else {
                let name = format!("{}-{}-{}.json", file_stem(profile), run_at_ms, collision);
                first.with_file_name(name)
            };
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            let mut file = match opened {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!("[ARTIFACTS] {} already exists", path.display());
                    continue;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to create {}", path.display()))
                }
            };
            file.write_all(contents)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            file.flush()
                .await
                .with_context(|| format!("Failed to flush {}", path.display()))?;
            return Ok(path);
        }
        anyhow::bail!(
            "No free history record for {} at {} after {} attempts",
            profile,
            run_at_ms,
            MAX_HISTORY_COLLISIONS + 1
        )
    }

    pub async fn write_summary(&self, summary: &RunSummary) -> Result<()> {
        let json = serde_json::to_vec_pretty(summary).context("Failed to serialize summary")?;
        write_file(&self.summary_path(), &json).await?;
        info!(
            "[ARTIFACTS] summary of {} profiles written to {}",
            summary.profiles.len(),
            self.summary_path().display()
        );
        Ok(())
    }

    pub async fn write_outliers(&self, outliers: &OutlierReport) -> Result<()> {
        let json = serde_json::to_vec_pretty(outliers).context("Failed to serialize outliers")?;
        write_file(&self.outliers_path(), &json).await
    }

    /// Reads back the latest report of a profile as raw JSON.
    pub async fn read_latest(&self, profile: &str) -> Result<serde_json::Value> {
        let path = self.latest_path(profile);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("Invalid JSON in {}", path.display()))
    }
}

/// Profile names become file names; anything outside `[A-Za-z0-9._-]` is replaced.
fn file_stem(profile: &str) -> String {
    profile
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}

async fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    ensure_parent(path).await?;
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
