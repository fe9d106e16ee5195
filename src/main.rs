use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use site_profiles::ProfileSet;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod session;

#[derive(Parser)]
#[command(name = "zenpage", author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Extra site profiles (JSON array); they take precedence over builtins
    #[arg(long, value_name = "FILE")]
    profiles: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Open (or attach to) a page and keep its zen toolbar alive
    Run(RunArgs),

    /// List available site profiles
    Profiles,
}

#[derive(Args)]
pub struct RunArgs {
    /// Page URL to open and augment
    #[arg(long)]
    url: String,

    /// DevTools websocket of a running browser (attach instead of launch)
    #[arg(long, value_name = "WS_URL")]
    ws_url: Option<String>,

    /// Chromium/Chrome executable override
    #[arg(long, value_name = "PATH")]
    chrome_path: Option<PathBuf>,

    /// Launch the browser headless
    #[arg(long)]
    headless: bool,

    /// Force a profile by name instead of matching the URL host
    #[arg(long, value_name = "NAME")]
    profile: Option<String>,

    /// Use the short two-shot layout-repair pulse instead of the default burst
    #[arg(long)]
    light_pulse: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    let profiles = match &cli.profiles {
        Some(path) => ProfileSet::with_file(path)?,
        None => ProfileSet::builtin(),
    };

    let result = match cli.command {
        Commands::Run(args) => session::run(args, &profiles).await,
        Commands::Profiles => cmd_profiles(&profiles),
    };

    match result {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("command failed: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let level: tracing::Level = level.parse().context("invalid log level")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn cmd_profiles(profiles: &ProfileSet) -> Result<()> {
    for profile in profiles.iter() {
        println!(
            "{:<12} hosts: {:<24} buttons: {}",
            profile.name,
            profile.host_patterns.join(", "),
            profile.regions.len() + 1
        );
    }
    Ok(())
}
