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

//! Profile manifest: which media each QA profile runs against.

use crate::thresholds::Thresholds;
use anyhow::{bail, Context, Result};
use framescrub_decoder::synthetic::SyntheticSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    pub name: String,
    /// Media file, relative paths resolved against the manifest's directory.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Generated media instead of a file.
    #[serde(default)]
    pub synthetic: Option<SyntheticSpec>,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
    #[serde(default)]
    pub scenario_count: Option<usize>,
    #[serde(default)]
    pub thresholds: Option<Thresholds>,
}

fn default_mime_type() -> String {
    "video/mp4".to_string()
}

/// Where a profile's bytes come from.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    File(PathBuf),
    Synthetic(SyntheticSpec),
}

impl MediaSource {
    pub async fn read(&self) -> Result<Vec<u8>> {
        match self {
            MediaSource::File(path) => tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read media {}", path.display())),
            MediaSource::Synthetic(spec) => Ok(spec.build()),
        }
    }
}

impl ProfileSpec {
    pub fn synthetic(name: impl Into<String>, spec: SyntheticSpec) -> Self {
        Self {
            name: name.into(),
            file: None,
            synthetic: Some(spec),
            mime_type: default_mime_type(),
            scenario_count: None,
            thresholds: None,
        }
    }

    pub fn media(&self) -> Result<MediaSource> {
        match (&self.file, &self.synthetic) {
            (Some(path), None) => Ok(MediaSource::File(path.clone())),
            (None, Some(spec)) => Ok(MediaSource::Synthetic(spec.clone())),
            (Some(_), Some(_)) => bail!("profile '{}' names both a file and a synthetic source", self.name),
            (None, None) => bail!("profile '{}' names no media", self.name),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub profiles: Vec<ProfileSpec>,
}

impl Manifest {
    pub fn from_json(json: &str) -> Result<Self> {
        let manifest: Manifest = serde_json::from_str(json).context("Invalid manifest JSON")?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Reads a manifest file and resolves relative media paths against its directory.
    pub async fn load(path: &Path) -> Result<Self> {
        let json = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read manifest {}", path.display()))?;
        let mut manifest = Self::from_json(&json)
            .with_context(|| format!("Failed to load manifest {}", path.display()))?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for profile in &mut manifest.profiles {
            if let Some(file) = profile.file.as_mut() {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        for (i, profile) in self.profiles.iter().enumerate() {
            profile.media()?;
            if self.profiles[..i].iter().any(|p| p.name == profile.name) {
                bail!("duplicate profile '{}'", profile.name);
            }
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&ProfileSpec> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// The named profiles in manifest order, or all of them when `names` is empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<&ProfileSpec>> {
        if names.is_empty() {
            return Ok(self.profiles.iter().collect());
        }
        names
            .iter()
            .map(|name| {
                self.profile(name)
                    .with_context(|| format!("Unknown profile '{name}'"))
            })
            .collect()
    }
}
