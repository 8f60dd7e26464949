//! Event Dispatcher
//!
//! Reacts to events from wayvnc. Only `detached` changes anything: it sends
//! the dispatcher into [`DispatcherState::Reattaching`] until the attach
//! manager finds a display again. Events that arrive meanwhile stay queued
//! and are handled afterwards, in order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::attach::{AttachManager, RetryOutcome};
use crate::messages::{Event, EventKind};
use crate::router::EventReceiver;
use crate::transport::ControlError;

/// What the dispatcher is doing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatcherState {
    /// Waiting for the next event
    Idle,
    /// Handling `detached`: looking for a display to attach to
    Reattaching,
}

/// Consumes the event queue for the rest of the connection
pub struct EventDispatcher {
    events: EventReceiver,
    attach: Arc<AttachManager>,
    state: DispatcherState,
    reattach_count: u64,
}

impl EventDispatcher {
    /// Take ownership of the event queue
    pub fn new(events: EventReceiver, attach: Arc<AttachManager>) -> Self {
        Self {
            events,
            attach,
            state: DispatcherState::Idle,
            reattach_count: 0,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DispatcherState {
        self.state
    }

    /// Completed re-attachments so far
    #[must_use]
    pub fn reattach_count(&self) -> u64 {
        self.reattach_count
    }

    /// Handle events until cancelled or the queue closes
    ///
    /// # Errors
    ///
    /// Returns `ControlError::ConnectionLost` when the router stops, or any
    /// connection-level error hit while re-attaching.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), ControlError> {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                event = self.events.recv() => event,
            };

            let Some(event) = event else {
                return Err(ControlError::ConnectionLost);
            };

            if !self.handle(event, cancel).await? {
                return Ok(());
            }
        }
    }

    /// Handle one event; returns `false` if cancelled mid-way
    async fn handle(
        &mut self,
        event: Event,
        cancel: &CancellationToken,
    ) -> Result<bool, ControlError> {
        match event.kind() {
            EventKind::Detached => {
                tracing::info!("Detached from display, re-attaching");
                self.state = DispatcherState::Reattaching;
                let outcome = self.attach.attach_any_with_retry(cancel).await;
                self.state = DispatcherState::Idle;

                match outcome? {
                    RetryOutcome::Attached {
                        display: surface,
                        retries,
                    } => {
                        self.reattach_count += 1;
                        tracing::info!(display = %surface.display(), retries, "Re-attached");
                    }
                    RetryOutcome::Cancelled => return Ok(false),
                }
            }
            EventKind::CaptureChanged { output } => {
                tracing::info!(output = ?output, "Captured output changed");
            }
            EventKind::ClientConnected(client) => {
                tracing::info!(
                    id = ?client.id,
                    hostname = ?client.hostname,
                    username = ?client.username,
                    connections = ?client.connection_count,
                    "VNC client connected"
                );
            }
            EventKind::ClientDisconnected(client) => {
                tracing::info!(
                    id = ?client.id,
                    hostname = ?client.hostname,
                    connections = ?client.connection_count,
                    "VNC client disconnected"
                );
            }
            EventKind::Unknown(method) => {
                tracing::debug!(method = %method, "Ignoring event");
            }
        }
        Ok(true)
    }
}
