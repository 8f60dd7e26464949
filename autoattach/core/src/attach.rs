//! Attach Manager
//!
//! Keeps trying candidate displays until wayvnc accepts one.
//!
//! - [`AttachManager::attach`]: one display
//! - [`AttachManager::attach_any`]: one pass over all current candidates
//! - [`AttachManager::attach_any_with_retry`]: passes at a fixed interval
//!   until one succeeds or the token is cancelled
//!
//! The retry has no attempt limit and no backoff. A display that never
//! appears keeps the loop going forever, one pass per interval; this suits
//! the boot case where the compositor simply has not started yet.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::messages::{Command, METHOD_ATTACH};
use crate::surfaces::{PreAttachHook, SurfaceEnumerator, LOCK_SUFFIX};
use crate::transport::{CommandChannel, ControlError};

/// Default pause between failed attach passes
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Result of [`AttachManager::attach_any_with_retry`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    /// Attached to `display` after `retries` pauses
    Attached {
        /// The display wayvnc is now attached to
        display: PathBuf,
        /// Number of failed passes before the successful one
        retries: u32,
    },
    /// The token was cancelled before any display was attached
    Cancelled,
}

/// Attaches wayvnc to the first available display
pub struct AttachManager {
    commands: Arc<dyn CommandChannel>,
    surfaces: Box<dyn SurfaceEnumerator>,
    pre_attach: Option<Box<dyn PreAttachHook>>,
    lock_suffix: String,
    retry_interval: Duration,
}

impl AttachManager {
    /// Create a manager issuing commands through `commands` and trying the
    /// displays listed by `surfaces`
    pub fn new(commands: Arc<dyn CommandChannel>, surfaces: Box<dyn SurfaceEnumerator>) -> Self {
        Self {
            commands,
            surfaces,
            pre_attach: None,
            lock_suffix: LOCK_SUFFIX.to_string(),
            retry_interval: DEFAULT_RETRY_INTERVAL,
        }
    }

    /// Run `hook` on each candidate before attaching
    #[must_use]
    pub fn with_pre_attach(mut self, hook: Box<dyn PreAttachHook>) -> Self {
        self.pre_attach = Some(hook);
        self
    }

    /// Set the pause between failed passes
    #[must_use]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the suffix identifying lock files
    #[must_use]
    pub fn with_lock_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.lock_suffix = suffix.into();
        self
    }

    /// Attach to a single display
    ///
    /// Returns `Ok(false)` when the pre-attach hook fails, the service
    /// rejects the display, or the reply times out.
    ///
    /// # Errors
    ///
    /// Only connection-level failures, which no other display would fix.
    pub async fn attach(&self, surface: &Path) -> Result<bool, ControlError> {
        if let Some(hook) = &self.pre_attach {
            if let Err(e) = hook.prepare(surface).await {
                tracing::warn!(display = %surface.display(), error = %e, "Pre-attach step failed");
                return Ok(false);
            }
        }

        let params = Command::attach_params(&surface.to_string_lossy());
        match self.commands.send_command(METHOD_ATTACH, Some(params)).await {
            Ok(true) => {
                tracing::info!(display = %surface.display(), "Attached");
                Ok(true)
            }
            Ok(false) => {
                tracing::debug!(display = %surface.display(), "Attach rejected");
                Ok(false)
            }
            Err(e) if !e.is_fatal() => {
                tracing::warn!(display = %surface.display(), error = %e, "Attach failed");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Try every current candidate once, in enumeration order
    ///
    /// Lock files are skipped. Returns the display attached to, or `None`
    /// if there were no candidates or all of them failed.
    ///
    /// # Errors
    ///
    /// Connection-level failures from [`attach`](Self::attach).
    pub async fn attach_any(&self) -> Result<Option<PathBuf>, ControlError> {
        let candidates = self.surfaces.candidates();
        tracing::trace!(count = candidates.len(), "Enumerated displays");

        for display in candidates {
            if self.is_lock_file(&display) {
                continue;
            }
            if self.attach(&display).await? {
                return Ok(Some(display));
            }
        }

        Ok(None)
    }

    /// Repeat [`attach_any`](Self::attach_any) until it succeeds
    ///
    /// Waits `retry_interval` between failed passes. "No candidates" and
    /// "all candidates failed" are treated the same.
    ///
    /// # Errors
    ///
    /// Connection-level failures from [`attach`](Self::attach).
    pub async fn attach_any_with_retry(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RetryOutcome, ControlError> {
        let mut retries: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(RetryOutcome::Cancelled);
            }

            if let Some(display) = self.attach_any().await? {
                return Ok(RetryOutcome::Attached { display, retries });
            }

            if retries == 0 {
                tracing::info!(
                    interval = ?self.retry_interval,
                    "No display available, retrying"
                );
            }
            retries = retries.saturating_add(1);

            tokio::select! {
                () = cancel.cancelled() => return Ok(RetryOutcome::Cancelled),
                () = tokio::time::sleep(self.retry_interval) => {}
            }
        }
    }

    fn is_lock_file(&self, path: &Path) -> bool {
        !self.lock_suffix.is_empty() && path.to_string_lossy().ends_with(&self.lock_suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surfaces::{FixedSurfaces, PreAttachError};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Records every attach and accepts only the listed displays
    #[derive(Default)]
    struct FakeService {
        accept: HashSet<String>,
        attempts: Mutex<Vec<String>>,
        timeout_on: Option<String>,
        lose_connection: bool,
    }

    impl FakeService {
        fn accepting(displays: &[&str]) -> Self {
            Self {
                accept: displays.iter().map(|d| (*d).to_string()).collect(),
                ..Self::default()
            }
        }

        fn attempts(&self) -> Vec<String> {
            self.attempts.lock().clone()
        }
    }

    #[async_trait]
    impl CommandChannel for FakeService {
        async fn send_command(
            &self,
            method: &str,
            params: Option<Value>,
        ) -> Result<bool, ControlError> {
            assert_eq!(method, METHOD_ATTACH);
            if self.lose_connection {
                return Err(ControlError::ConnectionLost);
            }
            let display = params.unwrap()["display"].as_str().unwrap().to_string();
            self.attempts.lock().push(display.clone());
            if self.timeout_on.as_deref() == Some(display.as_str()) {
                return Err(ControlError::ReplyTimeout {
                    method: method.to_string(),
                    id: 0,
                    timeout: Duration::from_secs(1),
                });
            }
            Ok(self.accept.contains(&display))
        }
    }

    struct RejectDisplay(&'static str);

    #[async_trait]
    impl PreAttachHook for RejectDisplay {
        async fn prepare(&self, display: &Path) -> Result<(), PreAttachError> {
            if display == Path::new(self.0) {
                return Err(PreAttachError::Spawn {
                    program: "setfacl".to_string(),
                    source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
                });
            }
            Ok(())
        }
    }

    fn fixed(paths: &[&str]) -> Box<dyn SurfaceEnumerator> {
        Box::new(FixedSurfaces(paths.iter().map(PathBuf::from).collect()))
    }

    #[tokio::test]
    async fn test_attach_any_skips_lock_files() {
        let service = Arc::new(FakeService::accepting(&["b"]));
        let manager = AttachManager::new(service.clone(), fixed(&["a.lock", "b", "c"]));

        assert_eq!(manager.attach_any().await.unwrap(), Some(PathBuf::from("b")));
        assert_eq!(service.attempts(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_attach_any_tries_in_order_until_success() {
        let service = Arc::new(FakeService::accepting(&["c"]));
        let manager = AttachManager::new(service.clone(), fixed(&["b", "c", "d"]));

        assert_eq!(manager.attach_any().await.unwrap(), Some(PathBuf::from("c")));
        assert_eq!(service.attempts(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_attach_any_without_candidates() {
        let service = Arc::new(FakeService::accepting(&["b"]));
        let manager = AttachManager::new(service.clone(), fixed(&[]));

        assert_eq!(manager.attach_any().await.unwrap(), None);
        assert!(service.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_attach_any_all_failing_does_not_retry() {
        let service = Arc::new(FakeService::accepting(&[]));
        let manager = AttachManager::new(service.clone(), fixed(&["b", "c"]));

        assert_eq!(manager.attach_any().await.unwrap(), None);
        assert_eq!(service.attempts(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_pre_attach_failure_skips_candidate() {
        let service = Arc::new(FakeService::accepting(&["b", "c"]));
        let manager = AttachManager::new(service.clone(), fixed(&["b", "c"]))
            .with_pre_attach(Box::new(RejectDisplay("b")));

        assert_eq!(manager.attach_any().await.unwrap(), Some(PathBuf::from("c")));
        // The rejected display never reached the service
        assert_eq!(service.attempts(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_reply_timeout_moves_to_next_candidate() {
        let service = Arc::new(FakeService {
            accept: ["c".to_string()].into_iter().collect(),
            timeout_on: Some("b".to_string()),
            ..FakeService::default()
        });
        let manager = AttachManager::new(service.clone(), fixed(&["b", "c"]));

        assert_eq!(manager.attach_any().await.unwrap(), Some(PathBuf::from("c")));
    }

    #[tokio::test]
    async fn test_connection_loss_propagates() {
        let service = Arc::new(FakeService {
            lose_connection: true,
            ..FakeService::default()
        });
        let manager = AttachManager::new(service, fixed(&["b"]));

        assert!(matches!(
            manager.attach_any().await,
            Err(ControlError::ConnectionLost)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_pauses_between_empty_passes() {
        let service = Arc::new(FakeService::accepting(&["/run/user/1000/wayland-1"]));
        let calls = Arc::new(AtomicU32::new(0));
        let surfaces = {
            let calls = Arc::clone(&calls);
            move || {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Vec::new()
                } else {
                    vec![PathBuf::from("/run/user/1000/wayland-1")]
                }
            }
        };
        let manager = AttachManager::new(service, Box::new(surfaces));

        let start = tokio::time::Instant::now();
        let outcome = manager
            .attach_any_with_retry(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RetryOutcome::Attached {
                display: PathBuf::from("/run/user/1000/wayland-1"),
                retries: 2,
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= DEFAULT_RETRY_INTERVAL * 2, "elapsed {elapsed:?}");
        assert!(elapsed < DEFAULT_RETRY_INTERVAL * 3, "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_is_cancellable() {
        let service = Arc::new(FakeService::accepting(&[]));
        let manager = AttachManager::new(service.clone(), fixed(&["b"]))
            .with_retry_interval(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(12)).await;
                cancel.cancel();
            })
        };

        let outcome = manager.attach_any_with_retry(&cancel).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(outcome, RetryOutcome::Cancelled);
        // Passes at t=0, 5 and 10
        assert_eq!(service.attempts().len(), 3);
    }
}
