//! Control Connection
//!
//! Owns everything scoped to one connection: the command id counter, the
//! pending-reply table, the event queue, and the background router task.
//! Nothing here is global, so several connections can coexist in one
//! process and all of it goes away when the connection is dropped.
//!
//! ```text
//!            ┌──────────── ControlConnection ────────────┐
//!  socket ──►│ read half ─► router task ─► EventReceiver │──► dispatcher
//!            │                    └──► PendingReplies ◄─┐│
//!  socket ◄──│ write half ◄────────── ControlClient ────┘│◄── attach manager
//!            └───────────────────────────────────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;

use crate::client::ControlClient;
use crate::router::{EventReceiver, MessageRouter, PendingReplies};
use crate::transport::{ControlError, FrameReader};

/// A live connection to the control socket
pub struct ControlConnection {
    client: Arc<ControlClient>,
    events: EventReceiver,
    router: RouterHandle,
}

impl ControlConnection {
    /// Connect to the Unix socket at `path` and start routing
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ConnectionFailed` if the socket cannot be
    /// reached within `connect_timeout`.
    #[cfg(unix)]
    pub async fn connect(
        path: &Path,
        connect_timeout: Duration,
        reply_timeout: Option<Duration>,
    ) -> Result<Self, ControlError> {
        let stream = crate::transport::connect(path, connect_timeout).await?;
        Ok(Self::from_stream(stream, reply_timeout))
    }

    /// Start routing over an already-open duplex stream
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_stream<S>(stream: S, reply_timeout: Option<Duration>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);

        let pending = PendingReplies::new();
        let (router, events) = MessageRouter::new(pending.clone());
        let task = tokio::spawn(router.run(FrameReader::new(read_half)));

        let client = Arc::new(ControlClient::new(write_half, pending, reply_timeout));

        Self {
            client,
            events,
            router: RouterHandle { task },
        }
    }

    /// Split into the command side, the sole event receiver, and the
    /// router task handle
    #[must_use]
    pub fn into_parts(self) -> (Arc<ControlClient>, EventReceiver, RouterHandle) {
        (self.client, self.events, self.router)
    }
}

/// Handle to the background router task
///
/// Awaiting it yields the error that stopped the router. Dropping it
/// aborts the task.
pub struct RouterHandle {
    task: JoinHandle<ControlError>,
}

impl RouterHandle {
    /// Wait for the router to stop and return why
    pub async fn stopped(&mut self) -> ControlError {
        match (&mut self.task).await {
            Ok(err) => err,
            Err(e) => {
                tracing::error!(error = %e, "Message router task failed");
                ControlError::ConnectionLost
            }
        }
    }

    /// Whether the router has stopped
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for RouterHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
