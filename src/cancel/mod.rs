//! Cancellation manager (component B).
//!
//! Built on `tokio_util::sync::CancellationToken`, the same primitive the
//! teacher's `agent/execution/llm_retry.rs` already uses for request-level
//! cancellation. The manager composes an externally-supplied token with an
//! internally-owned one via `CancellationToken::child_token()`: its
//! `signal()` is a child of the external token, so it observes external
//! cancellation automatically, and additionally exposes `cancel(reason)` to
//! fire the internal source.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{CancellationError, CancellationPhase, LLMError};

type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), LLMError>> + Send>>;
type CleanupHandler = Box<dyn FnOnce() -> CleanupFuture + Send>;

/// Default interval between periodic cancellation probes (spec §4.B).
const DEFAULT_CHECK_INTERVAL_MS: u64 = 100;

/// Composes an external abort source (if any) with an internally owned one,
/// and runs LIFO cleanup under a single shared deadline when cancelled.
pub struct CancellationManager {
    signal: CancellationToken,
    reason: OnceLock<String>,
    cleanup: Mutex<Vec<CleanupHandler>>,
    graceful_timeout: Duration,
    check_interval_ms: u64,
    cleanup_on_cancel: bool,
    periodic_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CancellationManager {
    /// `external`, if given, is observed automatically: cancelling it
    /// cancels this manager's signal too, via `child_token()`. Uses the
    /// spec's default `checkIntervalMs` (100ms) and `cleanupOnCancel`
    /// (true); use [`Self::with_config`] to override either.
    pub fn new(external: Option<CancellationToken>, graceful_timeout: Duration) -> Self {
        Self::with_config(external, graceful_timeout, DEFAULT_CHECK_INTERVAL_MS, true)
    }

    /// Same as [`Self::new`], with explicit `checkIntervalMs` and
    /// `cleanupOnCancel` (spec §4.B's config table).
    pub fn with_config(
        external: Option<CancellationToken>,
        graceful_timeout: Duration,
        check_interval_ms: u64,
        cleanup_on_cancel: bool,
    ) -> Self {
        let signal = match external {
            Some(token) => token.child_token(),
            None => CancellationToken::new(),
        };
        Self {
            signal,
            reason: OnceLock::new(),
            cleanup: Mutex::new(Vec::new()),
            graceful_timeout,
            check_interval_ms,
            cleanup_on_cancel,
            periodic_task: Mutex::new(None),
        }
    }

    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// Spawns a background task that probes `signal.is_cancelled()` every
    /// `checkIntervalMs`. Its only job beyond bounding detection latency for
    /// callers that never themselves poll the signal: if cancellation was
    /// triggered by firing the external token directly (never through
    /// [`Self::cancel`]), `reason` would otherwise stay unset forever, since
    /// nothing else ever writes it. The task records a default reason the
    /// first time it observes that case, runs cleanup if `cleanupOnCancel`
    /// is set, then exits. A second call is a no-op if a task is already
    /// running.
    pub async fn schedule_periodic_checks(self: &Arc<Self>) {
        let mut slot = self.periodic_task.lock().await;
        if slot.is_some() {
            return;
        }
        let manager = self.clone();
        let interval = Duration::from_millis(manager.check_interval_ms.max(1));
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if manager.signal.is_cancelled() {
                    if manager.reason.set("external cancellation signal".to_string()).is_ok() {
                        tracing::debug!("cancellation observed via periodic check, no explicit reason set");
                    }
                    if manager.cleanup_on_cancel {
                        if let Err(err) = manager.run_cleanup(CancellationPhase::Cleanup).await {
                            tracing::warn!("periodic-check cleanup pass failed: {err}");
                        }
                    }
                    break;
                }
            }
        });
        *slot = Some(handle);
    }

    /// Stops the periodic-check task, if one is running, and clears any
    /// registered cleanup handlers that were never drained by
    /// [`Self::run_cleanup`]. Both effects are unconditional and idempotent:
    /// a caller that disposes a manager without cancelling it first must not
    /// have its handlers silently outlive the manager.
    pub async fn dispose(&self) {
        if let Some(handle) = self.periodic_task.lock().await.take() {
            handle.abort();
        }
        self.cleanup.lock().await.clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn cancellation_reason(&self) -> Option<&str> {
        self.reason.get().map(String::as_str)
    }

    /// Fires the internal source. First writer wins the recorded reason —
    /// if the external token already fired and raced the reason-setting
    /// logic elsewhere, that earlier reason stands.
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.signal.cancel();
    }

    pub fn throw_if_cancelled(&self, phase: CancellationPhase) -> Result<(), CancellationError> {
        if self.is_cancelled() {
            return Err(CancellationError::Cancelled {
                reason: self.cancellation_reason().map(str::to_string),
                phase,
                cleanup_completed: false,
            });
        }
        Ok(())
    }

    /// Registers a cleanup handler. Handlers run in reverse registration
    /// order (LIFO) when [`Self::run_cleanup`] is invoked.
    pub async fn register_cleanup<F, Fut>(&self, handler: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), LLMError>> + Send + 'static,
    {
        self.cleanup
            .lock()
            .await
            .push(Box::new(move || Box::pin(handler())));
    }

    /// Drains every registered cleanup handler in reverse order, all under
    /// one shared deadline (not re-armed per handler). A handler's own
    /// error is logged and the pass continues; a pass that blows the
    /// deadline surfaces a [`CancellationError::GracefulTimeout`].
    pub async fn run_cleanup(&self, phase: CancellationPhase) -> Result<(), CancellationError> {
        let handlers: Vec<CleanupHandler> = std::mem::take(&mut *self.cleanup.lock().await);
        let attempted = !handlers.is_empty();

        let pass = async {
            for handler in handlers.into_iter().rev() {
                if let Err(err) = handler().await {
                    log::warn!("cancellation cleanup handler failed: {err}");
                }
            }
        };

        match tokio::time::timeout(self.graceful_timeout, pass).await {
            Ok(()) => Ok(()),
            Err(_) => Err(CancellationError::GracefulTimeout {
                phase,
                timeout_ms: self.graceful_timeout.as_millis() as u64,
                cleanup_attempted: attempted,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn cleanup_runs_in_lifo_order() {
        let manager = CancellationManager::new(None, Duration::from_secs(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = order.clone();
            manager
                .register_cleanup(move || {
                    let order = order.clone();
                    async move {
                        order.lock().await.push(i);
                        Ok(())
                    }
                })
                .await;
        }

        manager.cancel("test");
        manager
            .run_cleanup(CancellationPhase::Cleanup)
            .await
            .unwrap();

        assert_eq!(*order.lock().await, vec![2, 1, 0]);
    }

    #[tokio::test]
    async fn first_cancel_reason_wins() {
        let manager = CancellationManager::new(None, Duration::from_secs(1));
        manager.cancel("first");
        manager.cancel("second");
        assert_eq!(manager.cancellation_reason(), Some("first"));
    }

    #[tokio::test]
    async fn external_token_propagates_to_signal() {
        let external = CancellationToken::new();
        let manager = CancellationManager::new(Some(external.clone()), Duration::from_secs(1));
        assert!(!manager.is_cancelled());
        external.cancel();
        assert!(manager.is_cancelled());
    }

    #[tokio::test]
    async fn periodic_check_captures_reason_for_bare_external_cancel() {
        let external = CancellationToken::new();
        let manager = Arc::new(CancellationManager::with_config(
            Some(external.clone()),
            Duration::from_secs(1),
            10,
            false,
        ));
        manager.schedule_periodic_checks().await;

        assert_eq!(manager.cancellation_reason(), None);
        external.cancel();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.cancellation_reason(), Some("external cancellation signal"));
    }

    #[tokio::test]
    async fn periodic_check_runs_cleanup_when_configured() {
        let external = CancellationToken::new();
        let manager = Arc::new(CancellationManager::with_config(
            Some(external.clone()),
            Duration::from_secs(1),
            10,
            true,
        ));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        manager
            .register_cleanup(move || {
                let ran2 = ran2.clone();
                async move {
                    ran2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;
        manager.schedule_periodic_checks().await;

        external.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispose_stops_the_periodic_task() {
        let manager = Arc::new(CancellationManager::new(None, Duration::from_secs(1)));
        manager.schedule_periodic_checks().await;
        manager.dispose().await;
        assert!(manager.periodic_task.lock().await.is_none());
    }

    #[tokio::test]
    async fn dispose_clears_handlers_never_drained_by_run_cleanup() {
        let manager = CancellationManager::new(None, Duration::from_secs(1));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        manager
            .register_cleanup(move || {
                let ran2 = ran2.clone();
                async move {
                    ran2.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .await;

        manager.dispose().await;

        assert!(manager.cleanup.lock().await.is_empty());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn explicit_cancel_reason_is_not_overwritten_by_periodic_check() {
        let manager = Arc::new(CancellationManager::with_config(
            None,
            Duration::from_secs(1),
            10,
            false,
        ));
        manager.schedule_periodic_checks().await;
        manager.cancel("explicit reason");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.cancellation_reason(), Some("explicit reason"));
    }

    #[tokio::test]
    async fn slow_cleanup_trips_graceful_timeout() {
        let manager = CancellationManager::new(None, Duration::from_millis(20));
        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = ran.clone();
        manager
            .register_cleanup(move || async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                ran2.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;

        let result = manager.run_cleanup(CancellationPhase::Cleanup).await;
        assert!(matches!(
            result,
            Err(CancellationError::GracefulTimeout { .. })
        ));
    }
}
