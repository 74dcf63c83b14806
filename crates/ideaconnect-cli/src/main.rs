use anyhow::Result;
use clap::{Parser, Subcommand};
use ideaconnect_store::{IdeaStore, PgIdeaStore};
use ideaconnect_sync::SyncConfig;

#[derive(Debug, Parser)]
#[command(name = "ideaconnect")]
#[command(about = "IdeaConnect idea-sync command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync against the idea source and exit.
    Sync,
    /// Start the JSON API server (and the cron scheduler, if enabled).
    Serve,
    /// Delete persisted ideas whose titles duplicate an earlier record.
    Cleanup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let result = ideaconnect_sync::run_sync_once_from_env().await?;
            println!(
                "sync complete: synced={} skipped={} cleaned={} errors={}",
                result.synced,
                result.skipped,
                result.cleaned,
                result.errors.len()
            );
            for error in &result.errors {
                eprintln!("  {error}");
            }
        }
        Commands::Serve => {
            ideaconnect_web::serve_from_env().await?;
        }
        Commands::Cleanup => {
            let config = SyncConfig::from_env();
            let store = PgIdeaStore::connect(&config.database_url).await?;
            let deleted = store.delete_duplicate_titles().await?;
            println!("cleanup complete: deleted={deleted}");
        }
    }

    Ok(())
}
