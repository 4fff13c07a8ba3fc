//! OS signal handling for coordinated listener shutdown.
//!
//! The engine already propagates teardown through cancellation tokens; this
//! wires SIGINT/SIGTERM into one more token the binary can wait on before
//! stopping its listeners. Cancellation is idempotent, so a second signal
//! arriving mid-teardown is harmless.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels a token when the process is asked to shut down.
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// A token cancelled once shutdown has been requested
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Request shutdown without an OS signal
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    /// Block until SIGINT or SIGTERM arrives, then trigger shutdown.
    pub async fn listen(&self) {
        info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
            }
            _ = sigterm() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }

        self.trigger();
    }

    /// Wait until shutdown has been requested.
    pub async fn triggered(&self) {
        self.token.cancelled().await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn sigterm() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            error!(error = %e, "Unable to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn sigterm() {
    // Only Ctrl+C is available here.
    std::future::pending::<()>().await;
}
