//! Graceful drain: SIGTERM/SIGINT flips the shutdown watch, workers finish
//! their in-flight jobs up to the deadline, then every umbrella slot this
//! process still holds is released.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use cadence_umbrella::{SlotLedger, UmbrellaCoordinator};

/// Resolve when the process receives SIGTERM or SIGINT.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }
}

/// Broadcast shutdown, wait for worker tasks up to `deadline`, then release
/// held slots.
pub async fn drain(
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    ledger: Arc<SlotLedger>,
    coordinator: UmbrellaCoordinator,
    deadline: Duration,
) {
    info!(deadline_secs = deadline.as_secs(), "graceful drain started");
    let _ = shutdown_tx.send(true);

    let join_all = async {
        for handle in workers {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(deadline, join_all).await.is_err() {
        warn!("drain deadline reached with workers still running");
    }

    match ledger.release_all(&coordinator).await {
        Ok(released) if released > 0 => info!(released, "released held slots on shutdown"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "failed to release held slots on shutdown"),
    }
    info!("drain complete");
}
