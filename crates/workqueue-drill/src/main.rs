#![doc = include_str!("../README.md")]

mod drill;

use clap::Parser;
use drill::config::{CliArgs, DrillConfig};
use drill::telemetry::init_telemetry;
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
    let config = DrillConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let interrupt = CancellationToken::new();
    tokio::spawn(shutdown_signal(interrupt.clone()));

    let summary = drill::runner::run(&config, interrupt).await;
    providers.shutdown();

    let summary = summary?;
    println!("{summary}");
    summary.shutdown?;

    #[cfg(feature = "tracing")]
    tracing::info!("Drill finished cleanly");
    Ok(())
}

fn log_startup_info(_config: &DrillConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting drill with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting {:?} drill: {} jobs on {} workers",
            _config.mode,
            _config.jobs,
            _config.workers
        );
    }
}

/// Resolves on Ctrl+C or SIGTERM and fires `interrupt`, which ends job
/// submission early. Outstanding jobs still get the shutdown deadline.
async fn shutdown_signal(interrupt: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to install SIGTERM handler: {}", _e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::warn!("Failed to install Ctrl+C handler: {}", _e);
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
    }

    #[cfg(feature = "tracing")]
    tracing::info!("Interrupt received, draining outstanding jobs...");

    interrupt.cancel();
}
