use clap::Parser;
use tracing_subscriber::EnvFilter;

mod app;
mod catalog;
mod cli;
mod config;
mod offline;
mod search;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = AppFactory::create_config()?;

    cli::run(args.command, config)
}
