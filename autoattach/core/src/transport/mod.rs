//! Transport Layer for the wayvnc Control Socket
//!
//! - [`frame`]: JSON-value framing over a byte stream
//! - [`unix_socket`]: connecting to the control socket
//! - [`traits`]: the shared error type and the command seam
//!
//! # Wire Format
//!
//! Concatenated UTF-8 JSON values, no length prefix, whitespace ignored
//! between values. See [`frame`] for details.

pub mod frame;
pub mod traits;
#[cfg(unix)]
pub mod unix_socket;

// Re-exports for convenience
pub use frame::{encode, FrameDecoder, FrameReader, MAX_MESSAGE_SIZE};
pub use traits::{CommandChannel, ControlError};

#[cfg(unix)]
pub use unix_socket::connect;
