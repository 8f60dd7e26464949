//! Connection Supervisor
//!
//! Drives one control connection from start to finish:
//!
//! 1. Open the socket and start the message router
//! 2. Attach to a display (retrying until one is available)
//! 3. Subscribe to events with `event-receive`
//! 4. Dispatch events until shutdown or connection failure
//!
//! The router is watched the whole time. If it stops, the error that
//! stopped it ends the run; there is no reconnection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::attach::{AttachManager, RetryOutcome};
use crate::client::ControlClient;
use crate::config::AutoAttachConfig;
use crate::connection::ControlConnection;
use crate::dispatcher::EventDispatcher;
use crate::messages::METHOD_EVENT_RECEIVE;
use crate::router::EventReceiver;
use crate::surfaces::{
    AclPermissionFixup, FixedSurfaces, GlobSurfaces, PreAttachHook, SurfaceEnumerator,
};
use crate::transport::{CommandChannel, ControlError};

/// Runs the auto-attach client for one connection
pub struct Supervisor {
    config: AutoAttachConfig,
    surfaces: Option<Box<dyn SurfaceEnumerator>>,
    pre_attach: Option<Box<dyn PreAttachHook>>,
}

impl Supervisor {
    /// Create a supervisor; collaborators are derived from `config` unless
    /// overridden
    #[must_use]
    pub fn new(config: AutoAttachConfig) -> Self {
        Self {
            config,
            surfaces: None,
            pre_attach: None,
        }
    }

    /// Use `surfaces` instead of the configured pattern or display list
    #[must_use]
    pub fn with_surfaces(mut self, surfaces: Box<dyn SurfaceEnumerator>) -> Self {
        self.surfaces = Some(surfaces);
        self
    }

    /// Use `hook` instead of the configured ACL fix-up
    #[must_use]
    pub fn with_pre_attach(mut self, hook: Box<dyn PreAttachHook>) -> Self {
        self.pre_attach = Some(hook);
        self
    }

    /// Connect to the configured socket and run until cancelled
    ///
    /// # Errors
    ///
    /// Returns the connection failure, the error that stopped the router,
    /// or `ControlError::SubscriptionRejected` if wayvnc refused
    /// `event-receive`. Cancellation is not an error.
    #[cfg(unix)]
    pub async fn run(self, cancel: &CancellationToken) -> Result<(), ControlError> {
        tracing::info!(socket = %self.config.socket_path.display(), "Connecting to wayvnc");

        let connection = ControlConnection::connect(
            &self.config.socket_path,
            self.config.connect_timeout,
            self.config.reply_timeout,
        )
        .await?;

        tracing::info!("Connected");
        self.run_connection(connection, cancel).await
    }

    /// Run over an already-open connection until cancelled
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), minus the connection failure.
    pub async fn run_connection(
        self,
        connection: ControlConnection,
        cancel: &CancellationToken,
    ) -> Result<(), ControlError> {
        let (client, events, mut router) = connection.into_parts();
        let attach = Arc::new(self.attach_manager(Arc::clone(&client)));

        let outcome = tokio::select! {
            biased;
            err = router.stopped() => return Err(Self::router_stopped(err)),
            result = Self::session(client, events, attach, cancel) => result,
            () = cancel.cancelled() => Ok(()),
        };

        match outcome {
            // The router closed the queues; report why it stopped
            Err(ControlError::ConnectionLost) => Err(Self::router_stopped(router.stopped().await)),
            Err(e) => Err(e),
            Ok(()) => {
                tracing::info!("Shutting down");
                Ok(())
            }
        }
    }

    async fn session(
        client: Arc<ControlClient>,
        events: EventReceiver,
        attach: Arc<AttachManager>,
        cancel: &CancellationToken,
    ) -> Result<(), ControlError> {
        match attach.attach_any_with_retry(cancel).await? {
            RetryOutcome::Attached {
                display: surface,
                retries,
            } => {
                tracing::info!(display = %surface.display(), retries, "Initial attach complete");
            }
            RetryOutcome::Cancelled => return Ok(()),
        }

        if !client.send_command(METHOD_EVENT_RECEIVE, None).await? {
            return Err(ControlError::SubscriptionRejected);
        }
        tracing::info!("Subscribed to events");

        EventDispatcher::new(events, attach).run(cancel).await
    }

    fn attach_manager(self, client: Arc<ControlClient>) -> AttachManager {
        let Self {
            config,
            surfaces,
            pre_attach,
        } = self;

        let surfaces = surfaces.unwrap_or_else(|| -> Box<dyn SurfaceEnumerator> {
            match &config.displays {
                Some(displays) => Box::new(FixedSurfaces(displays.clone())),
                None => Box::new(GlobSurfaces::new(config.display_pattern.clone())),
            }
        });

        let pre_attach = pre_attach.or_else(|| {
            config.acl_user.as_ref().map(|user| -> Box<dyn PreAttachHook> {
                Box::new(AclPermissionFixup::new(user.clone()))
            })
        });

        let mut manager = AttachManager::new(client, surfaces)
            .with_retry_interval(config.retry_interval)
            .with_lock_suffix(config.lock_suffix);
        if let Some(hook) = pre_attach {
            manager = manager.with_pre_attach(hook);
        }
        manager
    }

    fn router_stopped(err: ControlError) -> ControlError {
        tracing::error!(error = %err, "Control connection failed");
        err
    }
}
