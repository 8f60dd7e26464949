//! Display Surfaces
//!
//! The two collaborators the attach manager is given rather than owns:
//!
//! - [`SurfaceEnumerator`]: lists candidate Wayland display sockets
//! - [`PreAttachHook`]: a fallible step run on a display before attaching
//!
//! Default implementations cover the usual deployments: globbing
//! `/run/user/*/wayland-*`, an explicit list from configuration, and
//! granting the VNC user access to the display socket with `setfacl`.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use async_trait::async_trait;
use thiserror::Error;

/// Default glob for Wayland compositor sockets
pub const DEFAULT_DISPLAY_PATTERN: &str = "/run/user/*/wayland-*";

/// Suffix of compositor lock files, which sit next to the sockets
pub const LOCK_SUFFIX: &str = ".lock";

/// Source of candidate display paths
///
/// Called once per attach pass, so implementations should reflect the
/// current state of the system rather than cache it.
pub trait SurfaceEnumerator: Send + Sync {
    /// Current candidates, in the order they should be tried
    fn candidates(&self) -> Vec<PathBuf>;
}

impl<F> SurfaceEnumerator for F
where
    F: Fn() -> Vec<PathBuf> + Send + Sync,
{
    fn candidates(&self) -> Vec<PathBuf> {
        self()
    }
}

/// Enumerates displays matching a glob pattern
#[derive(Clone, Debug)]
pub struct GlobSurfaces {
    pattern: String,
}

impl GlobSurfaces {
    /// Enumerate paths matching `pattern`
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }
}

impl Default for GlobSurfaces {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_PATTERN)
    }
}

impl SurfaceEnumerator for GlobSurfaces {
    fn candidates(&self) -> Vec<PathBuf> {
        let paths = match glob::glob(&self.pattern) {
            Ok(paths) => paths,
            Err(e) => {
                tracing::warn!(pattern = %self.pattern, error = %e, "Invalid display pattern");
                return Vec::new();
            }
        };

        paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping unreadable display path");
                    None
                }
            })
            .collect()
    }
}

/// A fixed list of displays
#[derive(Clone, Debug, Default)]
pub struct FixedSurfaces(pub Vec<PathBuf>);

impl SurfaceEnumerator for FixedSurfaces {
    fn candidates(&self) -> Vec<PathBuf> {
        self.0.clone()
    }
}

/// Errors from a pre-attach step
#[derive(Debug, Error)]
pub enum PreAttachError {
    /// The helper program could not be started
    #[error("Failed to run {program}: {source}")]
    Spawn {
        /// Program that was run
        program: String,
        /// Underlying spawn error
        source: std::io::Error,
    },

    /// The helper program ran and reported failure
    #[error("{program} exited with {status}")]
    Failed {
        /// Program that was run
        program: String,
        /// Its exit status
        status: ExitStatus,
    },
}

/// A step run on each candidate display before attaching to it
///
/// A failure skips that candidate.
#[async_trait]
pub trait PreAttachHook: Send + Sync {
    /// Prepare the display at `surface` for attaching
    async fn prepare(&self, surface: &Path) -> Result<(), PreAttachError>;
}

/// Grants a user access to the display socket and its directory via ACL
///
/// Runs `setfacl -m u:<user>:rwx <dir> <socket>`, for setups where wayvnc
/// runs as a different user than the compositor.
#[derive(Clone, Debug)]
pub struct AclPermissionFixup {
    user: String,
    program: String,
}

impl AclPermissionFixup {
    /// Grant `user` access using `setfacl`
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            program: "setfacl".to_string(),
        }
    }

    /// Use a different ACL program
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl PreAttachHook for AclPermissionFixup {
    async fn prepare(&self, surface: &Path) -> Result<(), PreAttachError> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("-m").arg(format!("u:{}:rwx", self.user));
        if let Some(dir) = surface.parent().filter(|d| !d.as_os_str().is_empty()) {
            cmd.arg(dir);
        }
        cmd.arg(surface);

        let status = cmd.status().await.map_err(|source| PreAttachError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !status.success() {
            return Err(PreAttachError::Failed {
                program: self.program.clone(),
                status,
            });
        }

        tracing::debug!(display = %surface.display(), user = %self.user, "Granted display access");
        Ok(())
    }
}
