use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod config;

const DEFAULT_FILTER: &str = "ackd=info,ack_ledger=info,ack_worker=info,ack_delivery=info,ack_postgres=info";
const VERBOSE_FILTER: &str =
    "ackd=debug,ack_ledger=debug,ack_worker=debug,ack_delivery=debug,ack_postgres=debug";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
    commands::run_command(cli).await
}
