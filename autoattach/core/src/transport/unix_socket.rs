//! Unix Socket Transport
//!
//! wayvnc exposes its control interface as a Unix domain stream socket.
//! The path differs per deployment (`/tmp/wayvncctl-0` for a stock
//! install, `/tmp/wayvnc/wayvncctl.sock` on some distributions), so it is
//! always supplied by configuration.

use std::path::Path;
use std::time::Duration;

use tokio::net::UnixStream;

use super::ControlError;

/// Connect to the control socket at `path`
///
/// # Errors
///
/// Returns `ControlError::ConnectionFailed` if the socket cannot be reached
/// within `timeout`.
pub async fn connect(path: &Path, timeout: Duration) -> Result<UnixStream, ControlError> {
    let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
        .await
        .map_err(|_| {
            ControlError::ConnectionFailed(format!(
                "Timed out after {timeout:?} connecting to {}",
                path.display()
            ))
        })?
        .map_err(|e| {
            ControlError::ConnectionFailed(format!(
                "Failed to connect to {}: {e}",
                path.display()
            ))
        })?;

    tracing::info!(path = %path.display(), "Connected to control socket");
    Ok(stream)
}
