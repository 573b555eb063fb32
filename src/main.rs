//! Edge Purge command-line tool
//!
//! Loads configuration, sets up logging and runs one purge command against
//! the configured zone, or serves the HTTP PURGE trigger endpoint.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edge_purge::{
    EdgeCacheClient, PurgeApi, PurgeConfig, PurgeCoordinator, PurgeError, PurgeHandler,
    PurgeMetrics, TriggerConfig,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Edge Purge - Cloudflare cache purging
#[derive(Parser)]
#[command(name = "edge-purge")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path (YAML); CLOUDFLARE_* variables override it
    #[arg(short, long, env = "EDGE_PURGE_CONFIG")]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Purge all cached content for the zone
    PurgeAll {
        /// Print what would be purged without calling the API
        #[arg(long)]
        dry_run: bool,
    },

    /// Purge specific URLs
    PurgeUrls {
        /// Absolute URLs to purge
        #[arg(required = true)]
        urls: Vec<String>,

        /// Print what would be purged without calling the API
        #[arg(long)]
        dry_run: bool,
    },

    /// Check that the configured API token is valid
    VerifyToken,

    /// Serve the HTTP PURGE trigger endpoint until Ctrl-C
    Serve {
        /// Bind address, overriding the configured trigger address
        #[arg(short, long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(exit_code(&e));
        }
    };

    // Initialize logging
    let level = if cli.verbose || config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_line_number(true)
        .init();

    if let Err(e) = run(cli.command, config).await {
        if cli.verbose {
            eprintln!("{:?}", e);
        } else {
            eprintln!("Error: {}", e);
        }
        std::process::exit(exit_code(&e));
    }
}

fn load_config(path: Option<&str>) -> Result<PurgeConfig> {
    let mut config = match path {
        Some(path) => PurgeConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => PurgeConfig::default(),
    };
    config.apply_env()?;
    Ok(config)
}

fn exit_code(e: &anyhow::Error) -> i32 {
    e.downcast_ref::<PurgeError>()
        .map(PurgeError::exit_code)
        .unwrap_or(1)
}

async fn run(command: Commands, config: PurgeConfig) -> Result<()> {
    match command {
        Commands::PurgeAll { dry_run: true } => {
            println!("[dry-run] Would purge all cached content for zone {}", config.zone_id);
            Ok(())
        }
        Commands::PurgeAll { dry_run: false } => {
            let coordinator = build_coordinator(&config, None)?;
            if let Some(outcome) = coordinator.purge_everything(Some(false)).await? {
                println!("Purged all cached content ({})", describe(outcome.id.as_deref()));
            }
            Ok(())
        }
        Commands::PurgeUrls { urls, dry_run: true } => {
            println!("[dry-run] Would purge {} URLs:", urls.len());
            for url in &urls {
                println!("  {}", url);
            }
            Ok(())
        }
        Commands::PurgeUrls { urls, dry_run: false } => {
            let coordinator = build_coordinator(&config, None)?;
            if let Some(report) = coordinator.request_purge(urls, Some(false)).await? {
                println!(
                    "Purged {} URLs in {} requests",
                    report.item_count,
                    report.batch_count()
                );
            }
            Ok(())
        }
        Commands::VerifyToken => {
            config.require_credentials()?;
            let client = EdgeCacheClient::from_config(&config)?;
            let outcome = client.verify_token().await?;
            println!(
                "Token {} (id: {})",
                outcome.status.as_deref().unwrap_or("verified"),
                describe(outcome.id.as_deref())
            );
            Ok(())
        }
        Commands::Serve { address } => serve(config, address).await,
    }
}

fn build_coordinator(
    config: &PurgeConfig,
    metrics: Option<Arc<PurgeMetrics>>,
) -> Result<PurgeCoordinator> {
    if config.enabled {
        config.require_credentials()?;
    }
    let client = EdgeCacheClient::from_config(config)?;
    let coordinator = PurgeCoordinator::from_config(Arc::new(client), config);
    Ok(match metrics {
        Some(metrics) => coordinator.with_metrics(metrics),
        None => coordinator,
    })
}

fn describe(id: Option<&str>) -> &str {
    id.unwrap_or("-")
}

async fn serve(config: PurgeConfig, address: Option<String>) -> Result<()> {
    let mut trigger = config.trigger.clone().unwrap_or_else(TriggerConfig::default);
    if let Some(address) = address {
        trigger.address = address;
    }
    let addr = trigger.socket_addr()?;

    let metrics = if trigger.enable_metrics {
        Some(Arc::new(PurgeMetrics::new().context("Failed to register metrics")?))
    } else {
        None
    };

    let coordinator = build_coordinator(&config, metrics.clone())?;
    let mut failures = coordinator.subscribe_failures();
    tokio::spawn(async move {
        while let Ok(failure) = failures.recv().await {
            warn!(
                "Background purge {} of {} items failed: {}",
                failure.kind, failure.item_count, failure.error
            );
        }
    });

    let mut handler = PurgeHandler::new(coordinator.clone(), config.site_url.clone());
    match &trigger.auth_token {
        Some(token) => handler = handler.with_auth(token.clone()),
        None => warn!("Purge trigger endpoint has no auth_token; requests are not authenticated"),
    }
    if let Some(metrics) = metrics {
        handler = handler.with_metrics(metrics);
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Purge trigger endpoint listening on http://{}", addr);
    info!("  - Site URL: {}", config.site_url);
    info!("  - Batch size: {}", config.purge_batch_size);
    info!("  - Purge delay: {}s", config.purge_delay_seconds);
    info!("  - Background purge: {}", config.background_purge);

    Arc::new(handler)
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await?;

    match coordinator.flush_pending().await {
        Ok(Some(report)) => info!("Flushed {} pending URLs on shutdown", report.item_count),
        Ok(None) => {}
        Err(e) => error!("Failed to flush pending URLs on shutdown: {}", e),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disabled_config() -> PurgeConfig {
        let mut config = PurgeConfig::default();
        config.enabled = false;
        config
    }

    #[test]
    fn test_parse_commands() {
        let cli = Cli::try_parse_from([
            "edge-purge",
            "purge-urls",
            "https://x.com/a",
            "https://x.com/b",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::PurgeUrls { urls, dry_run } => {
                assert_eq!(urls, vec!["https://x.com/a", "https://x.com/b"]);
                assert!(dry_run);
            }
            _ => panic!("expected purge-urls"),
        }

        let cli = Cli::try_parse_from(["edge-purge", "-v", "purge-all"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::PurgeAll { dry_run: false }));

        let cli = Cli::try_parse_from(["edge-purge", "serve", "--address", "0.0.0.0:9000"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { address: Some(_) }));

        // purge-urls needs at least one URL
        assert!(Cli::try_parse_from(["edge-purge", "purge-urls"]).is_err());
        assert!(Cli::try_parse_from(["edge-purge", "purge-everything"]).is_err());
    }

    #[tokio::test]
    async fn test_dry_run_needs_no_credentials() {
        let config = PurgeConfig::default();
        assert!(run(Commands::PurgeAll { dry_run: true }, config.clone()).await.is_ok());
        assert!(run(
            Commands::PurgeUrls {
                urls: vec!["https://x.com/a".to_string()],
                dry_run: true,
            },
            config,
        )
        .await
        .is_ok());
    }

    #[tokio::test]
    async fn test_missing_credentials_exit_non_zero() {
        let err = run(Commands::PurgeAll { dry_run: false }, PurgeConfig::default())
            .await
            .unwrap_err();
        assert_eq!(exit_code(&err), 2);

        let err = run(Commands::VerifyToken, PurgeConfig::default()).await.unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }

    #[tokio::test]
    async fn test_disabled_config_runs_without_network() {
        assert!(run(Commands::PurgeAll { dry_run: false }, disabled_config()).await.is_ok());
        assert!(run(
            Commands::PurgeUrls {
                urls: vec!["https://x.com/a".to_string()],
                dry_run: false,
            },
            disabled_config(),
        )
        .await
        .is_ok());
    }

    #[test]
    fn test_exit_code_for_foreign_errors() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code(&err), 1);

        let err = anyhow::Error::from(PurgeError::InvalidInput("too many".to_string()))
            .context("Failed to purge");
        assert_eq!(exit_code(&err), 3);
    }

    #[test]
    fn test_load_config_missing_file_is_config_error() {
        let err = load_config(Some("/nonexistent/edge_purge.yaml")).unwrap_err();
        assert_eq!(exit_code(&err), 2);
    }
}
