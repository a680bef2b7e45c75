//! Unix signal handling for the daemon.
//!
//! SIGTERM and SIGINT cancel the root token. Elsewhere Ctrl+C does.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Maps termination signals onto a [`CancellationToken`].
#[derive(Debug, Clone)]
pub struct SignalHandler {
    shutdown: CancellationToken,
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl SignalHandler {
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    /// Spawns the signal listener task.
    ///
    /// The task ends after the first termination signal or once the token
    /// is cancelled some other way.
    #[cfg(unix)]
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};

            let (mut sigterm, mut sigint) =
                match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                    (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                    (Err(e), _) | (_, Err(e)) => {
                        error!(error = %e, "failed to install signal handlers");
                        return;
                    }
                };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                    shutdown.cancel();
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, initiating shutdown");
                    shutdown.cancel();
                }
                () = shutdown.cancelled() => {}
            }

            debug!("signal listener stopped");
        })
    }

    #[cfg(not(unix))]
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => match result {
                    Ok(()) => {
                        info!("received Ctrl+C, initiating shutdown");
                        shutdown.cancel();
                    }
                    Err(e) => error!(error = %e, "failed to listen for Ctrl+C"),
                },
                () = shutdown.cancelled() => {}
            }
            debug!("signal listener stopped");
        })
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Programmatically triggers a shutdown.
    pub fn trigger_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// The root token cancelled on shutdown.
    pub fn token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn trigger_cancels_token() {
        let handler = SignalHandler::default();
        let token = handler.token();
        assert!(!handler.is_shutdown());

        handler.trigger_shutdown();

        assert!(handler.is_shutdown());
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn children_observe_shutdown() {
        let root = CancellationToken::new();
        let handler = SignalHandler::new(root.clone());
        let child = root.child_token();

        let waiter = tokio::spawn(async move { child.cancelled().await });
        handler.trigger_shutdown();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("child not cancelled")
            .unwrap();
    }

    #[tokio::test]
    async fn listener_exits_on_programmatic_shutdown() {
        let handler = SignalHandler::default();
        let listener = handler.spawn_listener();

        handler.trigger_shutdown();

        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener still running")
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_triggers_shutdown() {
        let handler = SignalHandler::default();
        let listener = handler.spawn_listener();
        // Let the listener install its handlers.
        tokio::time::sleep(Duration::from_millis(50)).await;

        // SAFETY: raising a signal in our own process only runs the handler
        // tokio installed above.
        unsafe {
            libc::raise(libc::SIGTERM);
        }

        tokio::time::timeout(Duration::from_secs(2), listener)
            .await
            .expect("listener did not observe SIGTERM")
            .unwrap();
        assert!(handler.is_shutdown());
    }
}
