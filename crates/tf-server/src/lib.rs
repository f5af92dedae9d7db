//! tf-server: worker pool, job dispatcher, callback delivery and the
//! monitoring API.
//!
//! This crate ties the other tf-* crates into a running service:
//!
//! - [`dispatcher::Dispatcher`] validates and enqueues work, and lets
//!   synchronous callers wait for a result
//! - [`processor`] runs the claim-execute-record loop and the lease reaper
//! - [`callback`] delivers results to callback URLs exactly once
//! - an Axum router exposes queue and task state over HTTP

pub mod callback;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod processor;
pub mod router;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use tf_av::ToolRegistry;
use tf_core::config::Config;
use tf_db::{SqliteStatusStore, StatusStore};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

pub use context::AppContext;
pub use dispatcher::{Dispatcher, SubmitRequest};

/// Open the store, prepare the temp root and discover ffmpeg.
pub fn build_context(config: Config) -> tf_core::Result<AppContext> {
    for warning in config.validate() {
        tracing::warn!("Config warning: {warning}");
    }

    let db_path = &config.server.db_path;
    let existed = db_path.exists();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created database directory {}", parent.display());
        }
    }
    let db_str = db_path.to_string_lossy();
    let pool = tf_db::pool::init_pool(&db_str)?;
    if existed {
        tracing::info!("Database opened (existing) at {db_str}");
    } else {
        tracing::info!("Database created (new) at {db_str}");
    }
    let store: Arc<dyn StatusStore> = Arc::new(SqliteStatusStore::new(pool));

    let tools = ToolRegistry::discover(&config.execution);
    let info = tools.check();
    if info.available {
        tracing::info!(
            "Tool found: {} ({})",
            info.name,
            info.version.as_deref().unwrap_or("unknown version")
        );
    } else {
        tracing::warn!("Tool not found: {}; jobs will fail until it is installed", info.name);
    }

    let ctx = AppContext::new(store, config, tools);
    ctx.files.ensure_root()?;
    Ok(ctx)
}

/// Run the worker pool and the monitoring API until a shutdown signal.
pub async fn serve(config: Config) -> tf_core::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| tf_core::Error::Internal(format!("Invalid server address: {e}")))?;
    let ctx = build_context(config)?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| tf_core::Error::Internal(format!("Failed to bind to {addr}: {e}")))?;
    tracing::info!("Starting server on {addr}");

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    run(ctx, listener, cancel).await
}

/// Serve `ctx` on an already bound listener alongside the worker pool.
///
/// Returns once `cancel` fires and every worker has finished its current
/// job.
pub async fn run(
    ctx: AppContext,
    listener: TcpListener,
    cancel: CancellationToken,
) -> tf_core::Result<()> {
    let workers = tokio::spawn(processor::run_worker_pool(
        ctx.clone(),
        ctx.config.workers.count,
        cancel.clone(),
    ));

    let app = router::build_router(ctx);
    let http_cancel = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { http_cancel.cancelled().await })
        .await;

    cancel.cancel();
    if let Err(e) = workers.await {
        tracing::error!("Worker pool task failed: {e}");
    }

    served.map_err(|e| tf_core::Error::Internal(format!("HTTP server error: {e}")))?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Run `count` workers without the HTTP API until a shutdown signal.
pub async fn run_workers(config: Config, count: usize) -> tf_core::Result<()> {
    let ctx = build_context(config)?;
    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });
    processor::run_worker_pool(ctx, count, cancel).await;
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("Shutdown signal received");
}
