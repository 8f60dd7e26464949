//! Autoattach Core - keeps wayvnc attached to a Wayland display
//!
//! A client for the wayvnc control socket. It attaches wayvnc to the first
//! Wayland display that accepts it, subscribes to events, and attaches
//! again whenever wayvnc reports `detached` (for example when the
//! compositor restarts).
//!
//! # Architecture
//!
//! ```text
//!                         ┌──────────────────────────────┐
//!   control socket ──────►│ FrameReader ─► MessageRouter │
//!   (JSON values,         └───────┬──────────────┬───────┘
//!    no delimiters)        events │              │ replies (by id)
//!                                 ▼              ▼
//!                      ┌─────────────────┐ ┌──────────────────┐
//!                      │ EventDispatcher │ │  PendingReplies  │
//!                      └────────┬────────┘ └────────▲─────────┘
//!                     detached  │                   │
//!                               ▼                   │
//!                      ┌─────────────────┐ ┌────────┴─────────┐
//!                      │  AttachManager  │►│  ControlClient   │──► socket
//!                      └─────────────────┘ └──────────────────┘
//! ```
//!
//! [`Supervisor`] wires these together for one connection and runs the
//! startup sequence: attach, subscribe, dispatch.
//!
//! # Key Types
//!
//! - [`Supervisor`]: runs the client until cancelled or the connection fails
//! - [`ControlConnection`]: one socket with its router task and queues
//! - [`ControlClient`]: sends commands and waits for their replies
//! - [`AttachManager`]: tries candidate displays until one is accepted
//! - [`EventDispatcher`]: reacts to events from wayvnc
//! - [`AutoAttachConfig`]: configuration from file and environment
//!
//! # Quick Start
//!
//! ```ignore
//! use autoattach_core::{load_config, Supervisor};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config()?;
//!     let cancel = CancellationToken::new();
//!     Supervisor::new(config).run(&cancel).await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod attach;
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod messages;
pub mod router;
pub mod supervisor;
pub mod surfaces;
pub mod transport;

// Re-exports for convenience
pub use attach::{AttachManager, RetryOutcome, DEFAULT_RETRY_INTERVAL};
pub use client::ControlClient;
pub use config::{
    default_config_path, load_config, load_config_from_path, AutoAttachConfig, ConfigError,
    ConfigSource,
};
pub use connection::{ControlConnection, RouterHandle};
pub use dispatcher::{DispatcherState, EventDispatcher};
pub use messages::{ClientInfo, Command, Event, EventKind, Message, Reply};
pub use router::{EventReceiver, MessageRouter, PendingReplies, RouteOutcome};
pub use supervisor::Supervisor;
pub use surfaces::{
    AclPermissionFixup, FixedSurfaces, GlobSurfaces, PreAttachError, PreAttachHook,
    SurfaceEnumerator,
};
pub use transport::{CommandChannel, ControlError, FrameDecoder, FrameReader};
