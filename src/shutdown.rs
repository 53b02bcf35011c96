use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use crate::error::Error;

/// Cancel the returned token on the first SIGTERM or SIGINT.
pub fn install_shutdown_handler() -> Result<CancellationToken, Error> {
    let token = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let cancel = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, draining"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, draining"),
            _ = cancel.cancelled() => return,
        }
        cancel.cancel();
    });

    Ok(token)
}
