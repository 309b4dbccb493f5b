#![doc = include_str!("../README.md")]

mod server;

use std::sync::Arc;

use clap::Parser;
use segid::{
    CompareAndSwapRefill, InMemorySequenceGenerator, InMemorySequenceRepository,
    MultiplySequenceRefill, RefillPool, RefillStrategy, SegmentRegistry, SequenceRepository,
};
use server::config::{CliArgs, ServerConfig, Strategy};
use server::handler::{AppState, router};
use server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry(config.log_format)?;

    match config.strategy {
        Strategy::Cas => {
            run_server(
                config,
                Arc::new(InMemorySequenceRepository::new()),
                CompareAndSwapRefill,
            )
            .await
        }
        Strategy::Multiply => {
            run_server(
                config,
                Arc::new(InMemorySequenceGenerator::new()),
                MultiplySequenceRefill,
            )
            .await
        }
    }
}

async fn run_server<R, S>(config: ServerConfig, repository: Arc<R>, strategy: S) -> anyhow::Result<()>
where
    R: SequenceRepository,
    S: RefillStrategy,
{
    let pool = config.refill_workers.map(RefillPool::current).transpose()?;
    let registry = Arc::new(SegmentRegistry::from_components(
        repository,
        strategy,
        config.allocator,
        pool,
    )?);
    let state = AppState::new(Arc::clone(&registry), config.max_ids_per_request);

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    let shutdown_token = CancellationToken::new();
    let mut server = tokio::spawn(
        axum::serve(listener, router(state.clone()))
            .with_graceful_shutdown(shutdown_token.clone().cancelled_owned())
            .into_future(),
    );

    tokio::select! {
        result = &mut server => {
            // The server stopped without a shutdown signal.
            result??;
            registry.shutdown(config.shutdown_timeout).await;
            return Ok(());
        }
        () = shutdown_signal() => {}
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Stop accepting connections and drain in-flight requests
    shutdown_token.cancel();
    match tokio::time::timeout(config.shutdown_timeout, &mut server).await {
        Ok(result) => result??,
        Err(_) => {
            tracing::warn!(in_flight = state.in_flight(), "Request drain timed out");
            server.abort();
        }
    }

    // 2. Close allocators and stop background refills
    registry.shutdown(config.shutdown_timeout).await;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting ID service on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            addr = %config.server_addr,
            strategy = ?config.strategy,
            batch_size = config.allocator.batch_size,
            refill_workers = ?config.refill_workers,
            "Starting ID service"
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install SIGTERM handler");
                core::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = core::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(%err, "failed to install Ctrl+C handler");
            core::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
