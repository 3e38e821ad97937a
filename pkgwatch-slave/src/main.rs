use std::path::PathBuf;

use clap::Parser;

use pkgwatch_engine::sim::SimEngine;
use pkgwatch_engine::{CacheEngine, EngineConfig};
use pkgwatch_slave::{run_session, ProcessSpawner, SlaveError, SlaveOptions};

/// Package catalog monitor slave. Speaks the framed protocol on
/// stdin/stdout; logs go to stderr.
#[derive(Debug, Parser)]
#[command(name = "pkgwatch-slave")]
struct Args {
    /// Cache engine to run against. Only the scripted `sim` engine is
    /// compiled into this build.
    #[arg(long, default_value = "sim")]
    engine: String,

    /// Config file path (defaults to ~/.pkgwatch/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> Result<(), SlaveError> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::load_default()?,
    };

    if args.engine != "sim" {
        return Err(SlaveError::Session(format!(
            "unknown engine '{}' (this build only carries 'sim')",
            args.engine
        )));
    }
    let mut engine = SimEngine::new();
    if let Some(dir) = &config.list_dir {
        engine.set_list_dir(dir);
    }
    if let Some(dir) = &config.archive_dir {
        engine.set_archive_dir(dir);
    }

    let options = SlaveOptions {
        security_origin: config.security_origin.clone(),
        ..SlaveOptions::default()
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| SlaveError::Io {
            path: "tokio-runtime".into(),
            source: e,
        })?;
    runtime.block_on(run_session(
        tokio::io::stdin(),
        tokio::io::stdout(),
        engine,
        ProcessSpawner::new(),
        options,
    ))
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    // stdout is the protocol channel; diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
