#![allow(dead_code)]

mod errors;
mod models;
mod routers;
mod services;
mod utils;

use crate::errors::SpoolError;
use crate::routers::router;
use crate::services::blob_store::FsBlobStore;
use crate::services::cas::FsCasStore;
use crate::services::drafts::SqliteDraftStore;
use crate::services::events::TracingEventSink;
use crate::services::media::ffmpeg::FfmpegEngine;
use crate::services::pinner::PinService;
use crate::services::pipeline::{PipelineContext, spawn_workers};
use crate::services::queue::SqliteQueue;
use crate::services::session_locks::SessionLocks;
use crate::services::sweeper::sweeper_loop;
use crate::utils::workdir::sweep_orphans;
use clap::Parser;
use services::states::SpoolState;
use services::states::config::AppConfig;
use services::states::db::DataBaseState;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[cfg(all(target_os = "windows", feature = "alternative-allocator"))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(all(
    any(
        target_os = "linux",
        target_os = "macos",
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    ),
    feature = "alternative-allocator"
))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

fn tracing_init(level: &str) {
    use std::io::stdout;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, Layer};
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(stdout)
        .with_filter(EnvFilter::new(level));
    tracing_subscriber::registry().with(fmt_layer).init();
}

#[cfg_attr(test, ctor::ctor)]
fn init() {
    tracing_init("info,spool=debug");
}

pub mod shadow {
    use shadow_rs::shadow;
    shadow!(build_info);
}

#[derive(clap::Parser, Debug)]
#[clap(
    name = "spool",
    version = shadow::build_info::VERSION,
    long_version = shadow::build_info::CLAP_LONG_VERSION
)]
pub struct Cli {
    #[clap(short, long, help = "Path to config file", default_value = "spool.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Arc::new(AppConfig::load(&cli.config)?);
    tracing_init(&config.common.log_level);

    let sqlx_opt = SqliteConnectOptions::from_str(&config.db.db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);
    let sqlx_pool = SqlitePoolOptions::new()
        .max_connections(config.db.sqlite_connection_nums)
        .connect_with(sqlx_opt)
        .await
        .map_err(SpoolError::Sqlx)?;
    #[cfg(feature = "migrate")]
    {
        tracing::info!("Preparing to run embed migrations...");
        sqlx::migrate!("./migrations")
            .run(&sqlx_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                SpoolError::Migrate(e)
            })?;
        tracing::info!("Migrations completed successfully.");
    }

    match sweep_orphans(&config.pipeline.work_root) {
        Ok(0) => {}
        Ok(n) => tracing::info!("swept {n} orphaned working directories"),
        Err(e) => tracing::warn!("orphan sweep failed: {e}"),
    }

    let db = DataBaseState::new(sqlx_pool.clone());
    let cas = Arc::new(FsCasStore::new(&config.pin.cas_root));
    let state = Arc::new(SpoolState {
        db,
        blob: Arc::new(FsBlobStore::new(&config.upload.blob_root)),
        cas: cas.clone(),
        queue: Arc::new(SqliteQueue::new(
            sqlx_pool.clone(),
            config.pipeline.queue_depth,
        )),
        drafts: Arc::new(SqliteDraftStore::new(sqlx_pool)),
        events: Arc::new(TracingEventSink),
        locks: SessionLocks::new(),
        config: config.clone(),
    });

    let pipeline_ctx = Arc::new(PipelineContext {
        state: state.clone(),
        engine: Arc::new(FfmpegEngine::new(
            config.pipeline.ffmpeg_path.as_ref(),
            config.pipeline.ffprobe_path.as_ref(),
        )),
        pinner: PinService::new(
            cas,
            config.pin.verify,
            config.pipeline.stage_retry_max,
            Duration::from_secs(config.pipeline.retry_base_secs),
            config.pipeline.retry_factor,
            Duration::from_secs(config.pipeline.retry_cap_secs),
        ),
    });

    let cancel = CancellationToken::new();
    let mut background = spawn_workers(pipeline_ctx, cancel.clone());
    background.push(tokio::spawn(sweeper_loop(state.clone(), cancel.clone())));

    let addr = format!("{}:{}", config.common.host, config.common.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        "Starting server at {}:{}",
        config.common.host,
        config.common.port
    );
    axum::serve(listener, router(state.clone()))
        .with_graceful_shutdown(async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};
                let mut sigint =
                    signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
                let mut sigterm =
                    signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
                tokio::select! {
                    _ = sigint.recv() => {},
                    _ = sigterm.recv() => {},
                }
            }
            #[cfg(windows)]
            {
                let _ = tokio::signal::ctrl_c().await;
            }
            #[cfg(not(any(unix, windows)))]
            {
                tracing::warn!("Graceful shutdown is not supported on this platform.");
                futures::future::pending::<()>().await;
            }
            tracing::warn!("Received shutdown signal, shutting down gracefully...");
        })
        .await?;

    tracing::info!("Stopping background workers...");
    cancel.cancel();
    for handle in background {
        if tokio::time::timeout(Duration::from_secs(15), handle)
            .await
            .is_err()
        {
            tracing::error!("Timed out waiting for a background worker.");
        }
    }
    tracing::info!("Trying to close database connections...");
    match tokio::time::timeout(Duration::from_secs(15), state.db.close_conn()).await {
        Ok(_) => tracing::info!("Database connections closed."),
        Err(_) => tracing::error!("Timed out while closing database connections."),
    }
    Ok(())
}
