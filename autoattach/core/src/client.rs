//! Control Client
//!
//! Issues commands over the write half of the control connection and waits
//! for the reply carrying the same id.
//!
//! Ids come from a per-connection counter starting at 0. The id is taken,
//! the waiter registered and the command written all under the writer
//! lock, so ids reach the wire in increasing order and a fast reply can
//! never arrive ahead of its waiter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::messages::{Command, Reply};
use crate::router::PendingReplies;
use crate::transport::frame::encode;
use crate::transport::{CommandChannel, ControlError};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Command side of a control connection
pub struct ControlClient {
    /// Write half; the lock keeps concurrent commands from interleaving
    writer: Mutex<BoxedWriter>,
    /// Next command id
    next_id: AtomicU64,
    /// Waiters shared with the router
    pending: PendingReplies,
    /// How long to wait for a reply (None = forever)
    reply_timeout: Option<Duration>,
}

impl ControlClient {
    /// Create a client over `writer`, completing replies through `pending`
    pub fn new<W>(writer: W, pending: PendingReplies, reply_timeout: Option<Duration>) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Mutex::new(Box::new(writer)),
            next_id: AtomicU64::new(0),
            pending,
            reply_timeout,
        }
    }

    /// Id the next command will be assigned
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// Send a command and return its full reply
    ///
    /// # Errors
    ///
    /// - `ControlError::ConnectionLost` if the router stopped before replying
    /// - `ControlError::ReplyTimeout` if the reply timeout elapsed
    /// - `ControlError::Io` if the write failed
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Reply, ControlError> {
        let (id, rx) = {
            let mut writer = self.writer.lock().await;

            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let command = Command {
                method: method.to_string(),
                id,
                params,
            };
            let data = encode(&command)?;
            let rx = self.pending.register(id)?;

            if let Err(e) = write_frame(&mut writer, &data).await {
                self.pending.cancel(id);
                return Err(e);
            }
            (id, rx)
        };
        tracing::debug!(method, id, "Command sent");

        let reply = match self.reply_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, rx).await {
                Ok(result) => result,
                Err(_) => {
                    self.pending.cancel(id);
                    tracing::warn!(method, id, ?timeout, "Command timed out");
                    return Err(ControlError::ReplyTimeout {
                        method: method.to_string(),
                        id,
                        timeout,
                    });
                }
            },
            None => rx.await,
        }
        .map_err(|_| ControlError::ConnectionLost)?;

        if !reply.is_success() {
            tracing::debug!(
                method,
                id,
                code = reply.code,
                error = reply.error_message().unwrap_or_default(),
                "Command failed"
            );
        }
        Ok(reply)
    }
}

/// Write one whole command
async fn write_frame(writer: &mut BoxedWriter, data: &[u8]) -> Result<(), ControlError> {
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

#[async_trait]
impl CommandChannel for ControlClient {
    async fn send_command(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<bool, ControlError> {
        Ok(self.request(method, params).await?.is_success())
    }
}
