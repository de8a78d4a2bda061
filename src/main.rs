//! Test User Agent
//!
//! Provisions synthetic API consumers across Lornu clusters. Every test
//! user gets a Vault-stored API key and an APISIX consumer whose key-auth
//! plugin references that secret. Zero hardcoded credentials.
//!
//! # Usage
//! ```bash
//! # Provision the default 10 users on two clusters
//! test-user-agent --clusters dev,staging \
//!     --vault-tokens $DEV_TOKEN,$STAGING_TOKEN \
//!     --apisix-api-keys $DEV_KEY,$STAGING_KEY create
//!
//! # Tear the same users down again
//! test-user-agent --clusters dev,staging \
//!     --vault-tokens $DEV_TOKEN,$STAGING_TOKEN \
//!     --apisix-api-keys $DEV_KEY,$STAGING_KEY delete
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use test_user_agent::{identity, Provisioner, Settings};

// ============================================================
// CLI Definition
// ============================================================

#[derive(Parser)]
#[command(name = "test-user-agent")]
#[command(about = "Lornu AI Test User Agent", long_about = None)]
#[command(version)]
struct Cli {
    /// Comma-separated cluster names (e.g., dev,staging)
    #[arg(long, env = "CLUSTERS", value_delimiter = ',')]
    clusters: Vec<String>,

    /// Comma-separated Vault tokens, one per cluster
    #[arg(long, env = "VAULT_TOKENS", value_delimiter = ',')]
    vault_tokens: Vec<String>,

    /// Comma-separated APISIX admin API keys, one per cluster
    #[arg(long, env = "APISIX_API_KEYS", value_delimiter = ',')]
    apisix_api_keys: Vec<String>,

    /// Base domain the per-cluster endpoints live under
    #[arg(long, env = "BASE_DOMAIN", default_value = "lornu.ai")]
    base_domain: String,

    /// Number of test users to manage
    #[arg(long, env = "USER_COUNT", default_value_t = 10)]
    user_count: usize,

    /// Users per two-phase batch
    #[arg(long, env = "BATCH_SIZE", default_value_t = 50)]
    batch_size: usize,

    /// Maximum in-flight requests across all clusters
    #[arg(long, env = "CONCURRENCY_LIMIT", default_value_t = 20)]
    concurrency_limit: usize,

    /// Path of the CSV credential snapshot
    #[arg(long, env = "OUTPUT_FILE", default_value = "test_users_apikeys.csv")]
    output_file: PathBuf,

    /// Dry run - plan the work without sending any requests
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the test users on every cluster
    Create,

    /// Remove the test users from every cluster
    Delete,
}

// ============================================================
// Main Entry Point
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for scripted use
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    info!("🚀 Test User Agent starting...");

    let settings = Settings::build(
        &cli.clusters,
        &cli.vault_tokens,
        &cli.apisix_api_keys,
        &cli.base_domain,
        cli.user_count,
        cli.batch_size,
        cli.concurrency_limit,
        cli.output_file,
    )
    .context("Invalid configuration")?;

    info!(
        clusters = settings.clusters.len(),
        users = settings.user_count,
        batch_size = settings.batch_size,
        concurrency_limit = settings.concurrency_limit,
        "Configuration loaded"
    );

    let identities = identity::generate(settings.user_count);

    if cli.dry_run {
        let calls = settings.clusters.len() * identities.len();
        let action = match cli.command {
            Commands::Create => "create",
            Commands::Delete => "delete",
        };
        info!("Dry run - no requests will be issued");
        println!(
            "Dry run: would {} {} users on {} clusters ({} Vault calls, {} APISIX calls)",
            action,
            identities.len(),
            settings.clusters.len(),
            calls,
            calls
        );
        return Ok(());
    }

    let snapshot_path = settings.output_file.clone();
    let provisioner = Provisioner::new(settings)?;

    match cli.command {
        Commands::Create => {
            let summary = provisioner.create(&identities).await?;

            println!(
                "✅ Created {} test users on {} clusters in {:.2}s",
                summary.identities,
                summary.clusters,
                summary.elapsed.as_secs_f64()
            );
            println!("✅ API keys written to {}", snapshot_path.display());
        }

        Commands::Delete => {
            warn!("🗑️  Deleting test users from all clusters");

            let summary = provisioner.delete(&identities).await?;

            println!(
                "✅ Deleted {} test users from {} clusters in {:.2}s",
                summary.identities,
                summary.clusters,
                summary.elapsed.as_secs_f64()
            );
        }
    }

    Ok(())
}
