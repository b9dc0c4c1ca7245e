//! Colloquy CLI and REST API entry point.
//!
//! Binary name: `clqy`
//!
//! Parses CLI arguments, initializes the database and services, then
//! dispatches to a command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Set up tracing based on verbosity
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,colloquy=debug",
        _ => "trace",
    };
    let otel = matches!(&cli.command, Commands::Serve { otel: true, .. });
    colloquy_observe::tracing_setup::init_tracing(filter, otel)
        .map_err(|e| anyhow::anyhow!("tracing init failed: {e}"))?;

    // Initialize application state (DB, provider chain, services)
    let state = AppState::init().await?;

    match cli.command {
        Commands::Serve { port, host, .. } => {
            serve(state, &host, port).await?;
        }

        Commands::Providers => {
            cli::provider::list_providers(&state, cli.json)?;
        }
    }

    colloquy_observe::tracing_setup::shutdown_tracing();
    Ok(())
}

/// Run the API server until Ctrl+C or SIGTERM, then drain in order:
/// stop maintenance, flush the audit write log, flush dirty conversations.
async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    if state.provider_router.is_empty() {
        println!();
        println!(
            "  {} No usable providers; replies will fail until one is configured.",
            console::style("!").yellow().bold()
        );
    }

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!();
    println!(
        "  {} Colloquy gateway listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!(
        "  {} Data directory: {}",
        console::style("·").dim(),
        console::style(state.data_dir.display()).dim()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    // Periodic maintenance: cache flush/eviction, quota sweep, slot pruning.
    let maintenance_token = CancellationToken::new();
    let maintenance_task = tokio::spawn({
        let service = state.chat_service.clone();
        let tick_interval = state.config.cache.maintenance_tick();
        let token = maintenance_token.clone();
        async move {
            let mut tick = tokio::time::interval(tick_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tick.tick() => service.run_maintenance().await,
                }
            }
        }
    });

    let router = http::router::build_router(state.clone());
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!("\n  Server stopped, flushing state...");

    maintenance_token.cancel();
    let _ = maintenance_task.await;

    // Audit events drain before conversations: an event referencing a turn
    // is written no later than the turn itself.
    state.write_log.shutdown().await;
    let failures = state.chat_service.flush_all().await;
    for (key, error) in &failures {
        warn!(%key, %error, "conversation not flushed at shutdown");
    }
    if failures.is_empty() {
        println!("  All conversations flushed.");
    } else {
        println!(
            "  {} {} conversation(s) could not be flushed; see log.",
            console::style("!").yellow().bold(),
            failures.len()
        );
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
