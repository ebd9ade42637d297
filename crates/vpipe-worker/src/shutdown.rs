//! Process-wide cancellation signal.

use tokio::sync::watch;
use tracing::info;

/// Resolves once the signal flips to cancelled; pends forever otherwise.
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Sleep that aborts early on cancellation.
pub async fn sleep_cancellable(
    duration: std::time::Duration,
    cancel: &watch::Receiver<bool>,
) -> Result<(), crate::error::WorkerError> {
    let mut cancel = cancel.clone();
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancelled(&mut cancel) => Err(crate::error::WorkerError::Cancelled),
    }
}

/// Flip the shared cancellation signal on SIGINT or SIGTERM.
pub async fn signal_handler(tx: watch::Sender<bool>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal");
    tx.send(true).ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sleep_aborts_on_cancel() {
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { sleep_cancellable(Duration::from_secs(30), &rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).ok();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("must return promptly")
            .unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn short_sleep_completes() {
        let (_tx, rx) = watch::channel(false);
        assert!(sleep_cancellable(Duration::from_millis(10), &rx).await.is_ok());
    }
}
