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

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use framescrub_qa::{
    run_suite, ArtifactStore, Manifest, QaConfig, QaHarness, TargetScheme, Thresholds,
};
use log::{error, info};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[clap(about = "Seek-accuracy QA for frame-accurate decode sessions", version)]
struct Args {
    #[clap(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the QA battery against the profiles of a manifest
    Run {
        #[clap(long, help = "Path to the profile manifest (JSON)")]
        manifest: PathBuf,

        #[clap(
            long,
            default_value = "qa-artifacts",
            help = "Directory receiving the run artifacts"
        )]
        out: PathBuf,

        #[clap(long = "profile", help = "Profile to run; repeat for several (default: all)")]
        profiles: Vec<String>,

        #[clap(long, help = "Seeks per profile, overriding manifest and config")]
        scenarios: Option<usize>,

        #[clap(long, help = "Path to a thresholds JSON file")]
        thresholds: Option<PathBuf>,

        #[clap(long, help = "Path to a QA configuration JSON file")]
        config: Option<PathBuf>,

        #[clap(long, help = "Use seeded random targets instead of evenly spaced ones")]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level));
    if args.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    match execute(args.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn execute(command: Command) -> Result<bool> {
    match command {
        Command::Run {
            manifest,
            out,
            profiles,
            scenarios,
            thresholds,
            config,
            seed,
        } => {
            let manifest = Manifest::load(&manifest).await?;
            let thresholds: Thresholds = read_optional_json(thresholds.as_deref()).await?;
            let mut config: QaConfig = read_optional_json(config.as_deref()).await?;
            if let Some(seed) = seed {
                config.target_scheme = TargetScheme::Seeded { seed };
            }

            info!(
                "Running {} of {} profiles into {}",
                if profiles.is_empty() {
                    "all".to_string()
                } else {
                    profiles.len().to_string()
                },
                manifest.profiles.len(),
                out.display()
            );

            let harness = QaHarness::new(config, thresholds, manifest);
            let store = ArtifactStore::new(out);
            let outcome = run_suite(&harness, &profiles, scenarios, Some(&store)).await?;

            for profile in &outcome.summary.profiles {
                info!(
                    "{:<24} {:<40} pass={}",
                    profile.profile,
                    serde_json::to_string(&profile.status)?,
                    profile.pass
                );
            }
            Ok(outcome.pass())
        }
    }
}

async fn read_optional_json<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let json = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&json).with_context(|| format!("Invalid JSON in {}", path.display()))
}
