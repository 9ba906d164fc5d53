//! Graceful shutdown coordination
//!
//! A [`ShutdownController`] owns the root `CancellationToken`. Components get
//! child tokens, so cancelling the root stops everything while a component
//! can still be stopped on its own.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Clone, Default)]
pub struct ShutdownController {
    token: CancellationToken,
}

impl ShutdownController {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Create a controller that is cancelled on Ctrl+C or SIGTERM
    ///
    /// Spawns a background task, so this must be called inside a runtime.
    pub fn with_signals() -> Self {
        let controller = Self::new();
        let token = controller.token.clone();

        tokio::spawn(async move {
            let signal = wait_for_signal().await;
            info!(signal, "Received signal, initiating graceful shutdown...");
            token.cancel();
        });

        controller
    }

    /// Get a child token that will be cancelled when this controller is cancelled
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Trigger shutdown manually
    pub fn shutdown(&self) {
        info!("Manual shutdown triggered");
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Failed to listen for SIGTERM: {}", e);
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        // Without a handler only manual shutdown remains
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}

/// Run a future until shutdown is signalled
///
/// Returns `Some(result)` if the future completed, `None` if shutdown was triggered first.
pub async fn run_until_shutdown<F, T>(token: CancellationToken, future: F) -> Option<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        result = future => Some(result),
        _ = token.cancelled() => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_manual_shutdown_cancels_children() {
        let controller = ShutdownController::new();
        let token = controller.child_token();

        assert!(!controller.is_cancelled());
        controller.shutdown();

        assert!(controller.is_cancelled());
        assert!(token.is_cancelled());
        controller.wait_for_shutdown().await;
    }

    #[tokio::test]
    async fn test_child_token_independence() {
        let controller = ShutdownController::new();
        let status = controller.child_token();
        let coordinator = controller.child_token();

        status.cancel();
        assert!(!coordinator.is_cancelled());
        assert!(!controller.is_cancelled());

        controller.shutdown();
        assert!(coordinator.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_shutdown() {
        let token = CancellationToken::new();
        assert_eq!(run_until_shutdown(token.clone(), async { 7 }).await, Some(7));

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = run_until_shutdown(token, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            7
        })
        .await;
        assert_eq!(result, None);
    }
}
