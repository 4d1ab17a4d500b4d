//! Debrid Resolver - command-line entry point
//!
//! Resolves one magnet, series pack episode or movie pack file through the
//! configured debrid provider and prints the result.

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use debrid_resolver::config::Config;
use debrid_resolver::db::Database;
use debrid_resolver::services::{
    HttpAdapterFactory, PackResolution, RequestCoordinator, ResolutionRequest, ResolutionService,
};

use crate::cli::{Command, USAGE};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debrid_resolver=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();

    let command = match Command::from_args() {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let config = Config::from_env()?;
    let credentials = config.credentials()?;
    tracing::info!(service = %credentials.service, "Configuration loaded");

    ensure_database_dir(&config.database_url)?;
    let db = Database::connect(&config.database_url).await?;
    tracing::info!("Database connected");

    let service = ResolutionService::new(
        Arc::new(RequestCoordinator::new(config.scan_queue_config())),
        Arc::new(db.pack_store()),
        Arc::new(HttpAdapterFactory::new(config.retry_policy())),
        config.resolution_settings(),
    );

    match command {
        Command::Stream { target, episode } => {
            let request = if target.starts_with("magnet:") {
                ResolutionRequest::from_magnet(&target, credentials)?
            } else {
                ResolutionRequest::new(&target, credentials)?
            };
            let request = match episode {
                Some((season, episode)) => request.with_episode(season, episode),
                None => request,
            };
            match service.resolve_single_stream(&request).await? {
                Some(stream) => println!("{}\t{}\t{}", stream.url, stream.filename, stream.size_bytes),
                None => println!("no stream"),
            }
        }
        Command::Series {
            info_hash,
            series_id,
            season,
            episode,
        } => {
            let resolution = service
                .resolve_series_pack_file(&info_hash, &credentials, &series_id, season, episode)
                .await?;
            print_resolution(&resolution);
        }
        Command::Movie {
            info_hash,
            titles,
            year,
            force_refresh,
        } => {
            let resolution = service
                .resolve_movie_pack_file(&info_hash, &credentials, &titles, year, force_refresh)
                .await?;
            print_resolution(&resolution);
        }
    }

    db.close().await;
    Ok(())
}

fn print_resolution(resolution: &PackResolution) {
    match resolution.found() {
        Some(file) => println!("{}\t{}\t{}", file.file_id, file.file_name, file.file_size_bytes),
        None => println!("not in pack"),
    }
}

/// SQLite creates the file but not its parent directory
fn ensure_database_dir(database_url: &str) -> anyhow::Result<()> {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if path.starts_with(':') {
        return Ok(());
    }
    let path = path.split('?').next().unwrap_or(path);
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    Ok(())
}
