use std::{future::Future, path::Path};

use anyhow::Result;
use serde::Serialize;

use crate::{
    app::{App, AppError, AppFactory},
    config::Config,
    offline::{HttpFetcher, LifecycleState},
};

use super::{CacheAction, Command};

pub fn run(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Serve { listen } => crate::web::start_daemon(config, listen),
        Command::Search {
            query,
            limit,
            catalog,
            count,
        } => block_on(handle_search(config, query.join(" "), limit, catalog, count)),
        Command::Open { link, catalog } => block_on(handle_open(config, link, catalog)),
        Command::Recent { catalog } => block_on(handle_recent(config, catalog)),
        Command::Cache { action } => block_on(handle_cache(config, action)),
    }
}

fn block_on<F: Future<Output = Result<()>>>(future: F) -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(future)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Starts a session with its catalog in place. A catalog that cannot be
/// fetched leaves the session empty rather than failing the command.
async fn open_session(config: Config, catalog: Option<&Path>) -> Result<App<HttpFetcher>> {
    let app = AppFactory::create_app(config).await?;

    match catalog {
        Some(path) => {
            app.load_catalog_file(path).await?;
        }
        None => {
            app.register().await?;
            if let Err(e) = app.refresh().await {
                eprintln!("Catalog unavailable ({e}). Check your connection and try again.");
            }
        }
    }

    Ok(app)
}

async fn close_session(app: App<HttpFetcher>) {
    if app.update_seen() {
        eprintln!("A new version of the app was installed; reload to use it.");
    }
    if let Err(e) = app.shutdown().await {
        log::debug!("session shutdown: {e}");
    }
}

pub async fn handle_search(
    config: Config,
    query: String,
    limit: Option<usize>,
    catalog: Option<std::path::PathBuf>,
    count: bool,
) -> Result<()> {
    let limit = limit.unwrap_or(config.search.limit);
    let app = open_session(config, catalog.as_deref()).await?;

    let printed = match app.search(&query, limit).await {
        Ok(results) if count => {
            println!("{} records found", results.len());
            Ok(())
        }
        Ok(results) => print_json(&results),
        Err(e) => Err(e.into()),
    };

    close_session(app).await;
    printed
}

pub async fn handle_open(
    config: Config,
    link: String,
    catalog: Option<std::path::PathBuf>,
) -> Result<()> {
    let app = open_session(config, catalog.as_deref()).await?;

    let record = if link.contains('#') {
        app.open_link(&link).await
    } else {
        app.open(&link).await
    };

    let printed = match record {
        Ok(record) => print_json(&record),
        Err(AppError::NotFound(_)) => {
            println!("No record matches {link}");
            Ok(())
        }
        Err(e) => Err(e.into()),
    };

    close_session(app).await;
    printed
}

pub async fn handle_recent(config: Config, catalog: Option<std::path::PathBuf>) -> Result<()> {
    let app = open_session(config, catalog.as_deref()).await?;
    let printed = match app.recent().await {
        Ok(records) if records.is_empty() => {
            println!("No recent records");
            Ok(())
        }
        Ok(records) => {
            for record in records {
                println!("{}\t{}", record.id, record.label());
            }
            Ok(())
        }
        Err(e) => Err(e.into()),
    };
    close_session(app).await;
    printed
}

async fn install(app: &App<HttpFetcher>, skip_waiting: bool) -> Result<LifecycleState, AppError> {
    let state = app.register().await?;
    if skip_waiting && state == LifecycleState::Installed {
        return app.skip_waiting().await;
    }
    Ok(state)
}

pub async fn handle_cache(config: Config, action: CacheAction) -> Result<()> {
    let app = AppFactory::create_app(config).await?;

    let result = match action {
        CacheAction::Install { skip_waiting } => match install(&app, skip_waiting).await {
            Ok(state) => {
                println!("offline cache: {state:?}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
        CacheAction::Status {} => match app.status().await {
            Ok(status) => print_json(&status),
            Err(e) => Err(e.into()),
        },
    };

    close_session(app).await;
    result
}
