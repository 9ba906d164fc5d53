//! Server lifecycle traits

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// A long-running network server with cooperative shutdown
#[async_trait]
pub trait Server: Send + Sync + 'static {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Bound address, once the server is listening
    fn address(&self) -> Option<SocketAddr>;

    fn is_running(&self) -> bool;

    /// Bind, serve until `shutdown` is cancelled, then drain open connections
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}

pub trait ServerExt: Server + Sized {
    /// Spawn the server and return its handle with a token that stops it
    fn spawn(self) -> (tokio::task::JoinHandle<Result<()>>, CancellationToken) {
        self.spawn_with(CancellationToken::new())
    }

    /// Spawn the server under an existing token, typically a child token
    fn spawn_with(
        self,
        token: CancellationToken,
    ) -> (tokio::task::JoinHandle<Result<()>>, CancellationToken) {
        let token_clone = token.clone();
        let handle = tokio::spawn(async move { self.run(token_clone).await });
        (handle, token)
    }
}

impl<T: Server + Sized> ServerExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleServer;

    #[async_trait]
    impl Server for IdleServer {
        fn name(&self) -> &str {
            "idle"
        }

        fn address(&self) -> Option<SocketAddr> {
            None
        }

        fn is_running(&self) -> bool {
            false
        }

        async fn run(&self, shutdown: CancellationToken) -> Result<()> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_spawn_stops_on_cancel() {
        let (handle, token) = IdleServer.spawn();
        token.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_spawn_with_follows_parent() {
        let parent = CancellationToken::new();
        let (handle, _) = IdleServer.spawn_with(parent.child_token());
        parent.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
    }
}
