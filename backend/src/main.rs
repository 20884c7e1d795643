use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use generator::DetectionGenerator;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::{BackendConfig, Runner};

mod api;
mod generator;
mod repository;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Minewatch detection service")]
struct Args {
    /// Load the service config from YAML
    #[arg(long)]
    config: Option<PathBuf>,
    /// Address to listen on
    #[arg(long)]
    bind: Option<SocketAddr>,
    /// Synthetic detections inserted at startup
    #[arg(long)]
    seed_count: Option<usize>,
    /// Insert a generated detection every N seconds (0 disables)
    #[arg(long)]
    emit_interval: Option<u64>,
    /// Seed for the synthetic data generator
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut BackendConfig) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(count) = self.seed_count {
            config.generator.count = count;
        }
        if let Some(secs) = self.emit_interval {
            config.emit_interval_secs = Some(secs);
        }
        if let Some(seed) = self.seed {
            config.generator.seed = seed;
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = if let Some(path) = &args.config {
        BackendConfig::load(path)?
    } else {
        BackendConfig::default()
    };
    args.apply(&mut config);

    let runner = Runner::new(config.clone());
    let mut generator =
        DetectionGenerator::new(config.generator.clone()).context("building detection generator")?;
    runner.seed(&mut generator, Utc::now())?;

    let runtime = TokioBuilder::new_multi_thread()
        .enable_all()
        .build()
        .context("creating runtime for the detection service")?;
    runtime.block_on(async {
        runner
            .serve(generator, async {
                if let Err(err) = signal::ctrl_c().await {
                    log::warn!("awaiting Ctrl+C failed: {}", err);
                }
            })
            .await
    })?;

    Ok(())
}
