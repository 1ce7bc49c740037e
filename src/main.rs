mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use mediabox::config::Config;
use mediabox::engine::reclaim_orphans;
use mediabox::store::RecordStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => mediabox::api::run(args.address).await?,
        Commands::Reclaim => {
            let config = Config::load()?;
            let store = RecordStore::open(&config.server.store_path)?;
            let threshold = chrono::Duration::minutes(config.reclaim.threshold_minutes as i64);
            let report = reclaim_orphans(&store, threshold)?;
            tracing::info!(
                jobs = report.jobs_reset,
                items = report.items_reset,
                "Reclaim sweep finished"
            );
            store.persist()?;
        }
    }

    Ok(())
}
