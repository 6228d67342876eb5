use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Cancels a token on SIGINT or SIGTERM.
#[derive(Debug)]
pub struct SignalHandler {
    token: CancellationToken,
    listener: JoinHandle<()>,
}

impl SignalHandler {
    pub fn install() -> Self {
        let token = CancellationToken::new();
        let listener = tokio::spawn(wait_for_signal(token.clone()));
        Self { token, listener }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

async fn wait_for_signal(token: CancellationToken) {
    #[cfg(unix)]
    {
        match unix_signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = signal::ctrl_c() => match result {
                        Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
                        Err(err) => {
                            error!("Failed to listen for SIGINT: {}", err);
                            return;
                        }
                    },
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, initiating graceful shutdown");
                    }
                    _ = token.cancelled() => return,
                }
            }
            Err(err) => {
                warn!("Failed to install SIGTERM handler, only SIGINT will stop the bridge: {}", err);
                wait_for_ctrl_c(&token).await;
            }
        }
    }

    #[cfg(not(unix))]
    wait_for_ctrl_c(&token).await;

    token.cancel();
}

async fn wait_for_ctrl_c(token: &CancellationToken) {
    tokio::select! {
        result = signal::ctrl_c() => match result {
            Ok(()) => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
            Err(err) => error!("Failed to listen for SIGINT: {}", err),
        },
        _ = token.cancelled() => {}
    }
}
