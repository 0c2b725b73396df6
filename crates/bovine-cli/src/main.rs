//! bovine CLI - serve pages, reap stale routing records, check config

use anyhow::Result;
use bovine_core::{Pages, resolve_config};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bovine")]
#[command(about = "Pages middleware for Forgejo/Gitea forges")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pages middleware server
    Serve,

    /// Remove routing records whose repositories no longer opt in
    Reap {
        /// Print intended deletions without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => cmd_serve(cli.config.as_deref()).await,
        Commands::Reap { dry_run } => cmd_reap(cli.config.as_deref(), dry_run).await,
        Commands::Check => cmd_check(cli.config.as_deref()),
    }
}

async fn cmd_serve(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let pages = Pages::from_config(config).await?;
    bovine_server::serve(pages).await?;
    Ok(())
}

/// Reaper exit codes: 0 clean, 1 fatal, 2 partial, 130 interrupted.
async fn cmd_reap(config_path: Option<&std::path::Path>, dry_run: bool) -> Result<()> {
    let config = resolve_config(config_path)?;
    let pages = Pages::from_config(config).await?;

    let reap = bovine_core::reaper::run(
        pages.store().as_ref(),
        pages.forge(),
        &pages.config().traefik.root_key,
        dry_run,
    );

    let report = tokio::select! {
        result = reap => match result {
            Ok(report) => report,
            Err(e) => {
                eprintln!("reaper failed: {}", e);
                std::process::exit(1);
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("interrupted");
            std::process::exit(130);
        }
    };

    let verb = if report.dry_run { "would remove" } else { "removed" };
    println!(
        "scanned {} mapping(s): kept {}, {} {}",
        report.scanned,
        report.kept,
        verb,
        report.removed.len()
    );
    for host in &report.removed {
        println!("  {} {}", verb, host);
    }
    for failure in &report.failures {
        println!("  skipped {}", failure);
    }

    if report.is_clean() {
        Ok(())
    } else {
        std::process::exit(2);
    }
}

fn cmd_check(config_path: Option<&std::path::Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    println!("config ok: pages domain {}", config.pages.domain);
    println!("  forge:          {}", config.forge.host);
    println!(
        "  redis:          {}",
        if config.redis.host.is_empty() {
            "disabled (in-memory caches)".to_string()
        } else {
            format!("{}:{}", config.redis.host, config.redis.port)
        }
    );
    println!(
        "  custom domains: {}",
        if config.pages.enable_custom_domains {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  dns proofs:     {}",
        if config.dns.verify_custom_domains {
            "required"
        } else {
            "not required"
        }
    );
    Ok(())
}
