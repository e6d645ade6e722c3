use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Detects signals sent to the process, or a stop requested from inside the daemon.
///
/// On Windows detached processes can't detect signals sent to them, so `dwelltime stop` kills the
/// process there and the last unsaved interval is lost.
pub async fn detect_shutdown(cancelation: CancellationToken) {
    select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            cancelation.cancel();
        },
        _ = terminate() => {
            info!("Terminated");
            cancelation.cancel();
        },
        _ = cancelation.cancelled() => {},
    };
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
        (Ok(mut term), Ok(mut hangup)) => {
            select! {
                _ = term.recv() => {},
                _ = hangup.recv() => {},
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Failed to listen for termination signals {e:?}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
