//! Application lifecycle and graceful shutdown.
//!
//! 1. **Startup**: spawn materializer workers and token bucket janitors
//! 2. **Runtime**: serve HTTP
//! 3. **Shutdown** (Ctrl+C or SIGTERM): stop accepting connections, broadcast
//!    shutdown, give each background task `shutdown_timeout` to finish the
//!    message it holds

use crate::pipeline::MaterializerPool;
use flashsale_runtime::KeyedTokenBucket;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Fully assembled application, ready to run.
pub struct Application {
    listener: tokio::net::TcpListener,
    router: axum::Router,
    pool: MaterializerPool,
    janitors: Vec<KeyedTokenBucket>,
    janitor_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl Application {
    /// Application serving `router` on `listener` and running `pool`.
    #[must_use]
    pub fn new(
        listener: tokio::net::TcpListener,
        router: axum::Router,
        pool: MaterializerPool,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            listener,
            router,
            pool,
            janitors: Vec::new(),
            janitor_interval: Duration::from_secs(60),
            shutdown_tx,
            shutdown_timeout: Duration::from_secs(10),
        }
    }

    /// Evict idle entries from `buckets` every `interval`.
    #[must_use]
    pub fn with_janitors(mut self, buckets: Vec<KeyedTokenBucket>, interval: Duration) -> Self {
        self.janitors = buckets;
        self.janitor_interval = interval.max(Duration::from_secs(1));
        self
    }

    /// How long each background task gets to stop.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Run until a shutdown signal, then stop everything.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        match self.listener.local_addr() {
            Ok(address) => info!(address = %address, "Starting HTTP server"),
            Err(e) => warn!(error = %e, "Listener address unavailable"),
        }

        let mut handles = self.pool.spawn(&self.shutdown_tx);
        handles.extend(self.janitors.iter().map(|bucket| {
            bucket.spawn_janitor(self.janitor_interval, self.shutdown_tx.subscribe())
        }));
        info!(tasks = handles.len(), "Background tasks started");

        let served = axum::serve(
            self.listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        info!("HTTP server stopped, initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());
        Self::await_shutdown(handles, self.shutdown_timeout).await;
        info!("Graceful shutdown complete");

        served.map_err(Into::into)
    }

    async fn await_shutdown(handles: Vec<JoinHandle<()>>, timeout: Duration) {
        for (idx, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task = idx, "Task stopped gracefully"),
                Ok(Err(e)) => warn!(task = idx, error = %e, "Task failed"),
                Err(_) => warn!(task = idx, "Task shutdown timed out"),
            }
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed never fires; the other one still does.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
