use std::{net::SocketAddr, sync::atomic::Ordering};

use anyhow::Result;
use axum::Router;
use tokio::{net::TcpListener, signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use privateer::{dispatcher, tracker::Tracker};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let tracker = Tracker::bootstrap().await?;

    let _scheduler_handle = tokio::spawn({
        let tracker = tracker.clone();
        async move { privateer::scheduler::handle(&tracker).await }
    });

    let addr = SocketAddr::from((tracker.config.listening_ip_address, tracker.config.listening_port));
    let listener = TcpListener::bind(addr).await?;

    let app: Router = dispatcher::routes(tracker.clone()).with_state(tracker.clone());
    let app = app.into_make_service_with_connect_info::<SocketAddr>();

    tracing::info!(%addr, "privateer tracker listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    tracing::info!("waiting for in-flight requests to finish");
    wait_for_in_flight_drain(&tracker).await;

    tracing::info!("draining persistence queues");
    tracker.drain_persistence().await;

    #[cfg(feature = "event_log")]
    if let Err(err) = privateer::event_log::flush(&tracker.event_log) {
        tracing::warn!(error = %err, "failed to flush event log on shutdown");
    }

    Ok(())
}

/// Waits for `tracker.in_flight` to reach zero, using the same
/// create-future-then-check-the-flag ordering the dispatcher's middleware
/// pairs it with: the `Notified` future is created before the counter is
/// read, so a `notify_waiters()` call that races with this check is never
/// missed.
async fn wait_for_in_flight_drain(tracker: &Tracker) {
    let notified = tracker.in_flight_drained.notified();

    if tracker.in_flight.load(Ordering::Relaxed) > 0 {
        notified.await;
    }
}

/// Completes on Ctrl+C or SIGTERM, kept identical to the reference so
/// container orchestrators sending SIGTERM get a clean shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
