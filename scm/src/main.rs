// Copyright 2024 BlockSCM Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Context;
use blockscm::{ScmConfig, start};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Storage container manager for a block storage cluster
#[derive(Debug, Parser)]
#[command(name = "blockscm", version, about)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "BLOCKSCM_CONFIG")]
    config: Option<PathBuf>,

    /// Overrides `metadata_dir` from the configuration
    #[arg(long)]
    metadata_dir: Option<PathBuf>,

    /// Overrides `cluster_id` from the configuration
    #[arg(long)]
    cluster_id: Option<String>,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<ScmConfig> {
        let mut config = match &self.config {
            Some(path) => ScmConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => ScmConfig::default(),
        };
        if let Some(dir) = &self.metadata_dir {
            config.metadata_dir = dir.clone();
        }
        if let Some(id) = &self.cluster_id {
            config.cluster_id = id.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match cli.load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log_level);

    let mut manager = match start(&config).await {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "Startup failed");
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    info!(cluster_id = manager.cluster_id(), "Control plane running");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to wait for shutdown signal");
    }
    manager.shutdown();
    ExitCode::SUCCESS
}
