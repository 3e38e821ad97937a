use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use pkgwatch_auth_helper::{
    run, CredentialAuthority, DenyingAuthority, NullAuthority, SessionConfig,
};
use pkgwatch_engine::EngineConfig;

/// Privileged helper. Speaks the credential frames on stdin/stdout,
/// then runs one command as root.
#[derive(Debug, Parser)]
#[command(name = "pkgwatch-auth-helper")]
struct Args {
    /// Run the command inside an xterm instead of detached.
    #[arg(short = 'x', long)]
    terminal: bool,

    /// Config file path (defaults to ~/.pkgwatch/config.yaml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Shell command to run once authentication succeeds.
    command: String,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    if args.terminal && std::env::var_os("DISPLAY").is_none() {
        bail!("--terminal needs an X display, but DISPLAY is not set");
    }

    let engine_config = match &args.config {
        Some(path) => EngineConfig::load(path).context("loading the config file")?,
        None => EngineConfig::load_default().context("loading the default config file")?,
    };

    let config = SessionConfig {
        command: args.command,
        in_terminal: args.terminal,
        list_dir: engine_config
            .list_dir
            .unwrap_or_else(|| PathBuf::from("/var/lib/apt/lists")),
        archive_dir: engine_config
            .archive_dir
            .unwrap_or_else(|| PathBuf::from("/var/cache/apt/archives")),
        home: dirs::home_dir(),
    };

    // Real root needs no ceremony; everyone else hits the configured
    // credential backend, which in this build always refuses.
    let mut authority: Box<dyn CredentialAuthority> = if real_uid() == 0 {
        Box::new(NullAuthority)
    } else {
        Box::new(DenyingAuthority)
    };

    let code = run(
        std::io::stdin().lock(),
        std::io::stdout().lock(),
        authority.as_mut(),
        &config,
    )
    .context("helper session failed")?;
    std::process::exit(code);
}

#[cfg(unix)]
fn real_uid() -> u32 {
    unsafe { libc::getuid() }
}

#[cfg(not(unix))]
fn real_uid() -> u32 {
    0
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    // stdout carries the credential frames; diagnostics go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
