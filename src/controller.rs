//! Initialization controller: the readiness state machine.
//!
//! Owns the only mutable state in the engine. Callers go through
//! [`InitController::ensure_ready`], which guarantees single-flight
//! initialization: however many callers arrive concurrently, exactly one
//! build/load attempt runs, and every waiter observes the same outcome.
//!
//! Transitions: `NotInitialized → Initializing → Ready`, with
//! `Initializing → Error(reason)` on failure. `Error` is sticky — it is
//! reported to every caller until someone passes `force_rebuild = true`.
//! `Ready → Initializing` is likewise only reachable through a forced
//! rebuild.

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::{KnowledgeError, Result};

/// Readiness states gating query availability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    NotInitialized,
    Initializing,
    Ready,
    Error(String),
}

impl InitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InitState::NotInitialized => "not_initialized",
            InitState::Initializing => "initializing",
            InitState::Ready => "ready",
            InitState::Error(_) => "error",
        }
    }
}

/// Facts recorded by a successful initialization, surfaced via `status()`.
#[derive(Debug, Clone)]
pub struct InitStats {
    pub initialization_seconds: f64,
    pub document_count: usize,
    pub provider_identity: String,
}

struct ControllerInner {
    tx: watch::Sender<InitState>,
    stage: RwLock<Option<String>>,
    stats: RwLock<Option<InitStats>>,
}

/// Cheaply cloneable handle to the state machine.
#[derive(Clone)]
pub struct InitController {
    inner: Arc<ControllerInner>,
}

impl Default for InitController {
    fn default() -> Self {
        Self::new()
    }
}

impl InitController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(InitState::NotInitialized);
        Self {
            inner: Arc::new(ControllerInner {
                tx,
                stage: RwLock::new(None),
                stats: RwLock::new(None),
            }),
        }
    }

    pub fn state(&self) -> InitState {
        self.inner.tx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), InitState::Ready)
    }

    /// Init stage last entered (`load-provider`, `load-index`, ...), for
    /// status reporting. Set by the init routine as it progresses.
    pub fn stage(&self) -> Option<String> {
        self.inner.stage.read().expect("stage lock poisoned").clone()
    }

    pub fn set_stage(&self, stage: &str) {
        info!(stage, "initialization stage");
        *self.inner.stage.write().expect("stage lock poisoned") = Some(stage.to_string());
    }

    pub fn stats(&self) -> Option<InitStats> {
        self.inner.stats.read().expect("stats lock poisoned").clone()
    }

    /// Bring the engine to `READY`, waiting up to `timeout`.
    ///
    /// - Already `READY` and no force: returns immediately.
    /// - `INITIALIZING`: joins the in-flight attempt and waits.
    /// - Sticky `ERROR` and no force: returns the recorded reason.
    /// - Otherwise this caller wins the race, `init` is spawned, and all
    ///   waiters (this one included) observe its outcome.
    ///
    /// A timeout only abandons the wait — the in-flight initialization
    /// keeps running and later callers can still join it.
    pub async fn ensure_ready<F>(
        &self,
        force_rebuild: bool,
        timeout: Duration,
        init: F,
    ) -> Result<()>
    where
        F: Future<Output = Result<InitStats>> + Send + 'static,
    {
        let mut rx = self.inner.tx.subscribe();

        // Atomic check-and-transition under the channel lock, so two
        // concurrent callers can never both claim the build.
        let mut claimed = false;
        let mut sticky_error: Option<String> = None;
        let mut already_ready = false;
        self.inner.tx.send_if_modified(|state| match state {
            InitState::Ready if !force_rebuild => {
                already_ready = true;
                false
            }
            InitState::Error(reason) if !force_rebuild => {
                sticky_error = Some(reason.clone());
                false
            }
            InitState::Initializing => false,
            _ => {
                *state = InitState::Initializing;
                claimed = true;
                true
            }
        });

        if already_ready {
            return Ok(());
        }
        if let Some(reason) = sticky_error {
            return Err(KnowledgeError::InitFailed(reason));
        }

        if claimed {
            let controller = self.clone();
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                match init.await {
                    Ok(mut stats) => {
                        stats.initialization_seconds = started.elapsed().as_secs_f64();
                        info!(
                            seconds = stats.initialization_seconds,
                            documents = stats.document_count,
                            "initialization complete"
                        );
                        *controller.inner.stats.write().expect("stats lock poisoned") =
                            Some(stats);
                        controller.set_stage("completed");
                        let _ = controller.inner.tx.send(InitState::Ready);
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        error!(reason, "initialization failed");
                        controller.set_stage("error");
                        let _ = controller.inner.tx.send(InitState::Error(reason));
                    }
                }
            });
        }

        let outcome = tokio::time::timeout(timeout, async {
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    InitState::Ready => return Ok(()),
                    InitState::Error(reason) => return Err(KnowledgeError::InitFailed(reason)),
                    _ => {}
                }
                if rx.changed().await.is_err() {
                    return Err(KnowledgeError::InitFailed(
                        "initialization controller dropped".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(KnowledgeError::InitTimeout(timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stats() -> InitStats {
        InitStats {
            initialization_seconds: 0.0,
            document_count: 3,
            provider_identity: "mock:8d".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ready_is_a_noop_without_force() {
        let controller = InitController::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let counter = counter.clone();
            controller
                .ensure_ready(false, Duration::from_secs(1), async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(stats())
                })
                .await
                .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(controller.is_ready());
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_attempt() {
        let controller = InitController::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let controller = controller.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                controller
                    .ensure_ready(false, Duration::from_secs(5), async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(stats())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(controller.state(), InitState::Ready);
    }

    #[tokio::test]
    async fn test_error_is_sticky_until_forced() {
        let controller = InitController::new();

        let err = controller
            .ensure_ready(false, Duration::from_secs(1), async {
                Err(KnowledgeError::CorpusEmpty)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::InitFailed(_)));
        assert_eq!(controller.state().as_str(), "error");

        // Without force, the stored reason comes back and init never runs.
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let err = controller
            .ensure_ready(false, Duration::from_secs(1), async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(stats())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::InitFailed(_)));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        // Force leaves the sticky error.
        controller
            .ensure_ready(true, Duration::from_secs(1), async { Ok(stats()) })
            .await
            .unwrap();
        assert!(controller.is_ready());
    }

    #[tokio::test]
    async fn test_timeout_leaves_init_running() {
        let controller = InitController::new();

        let err = controller
            .ensure_ready(false, Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(stats())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::InitTimeout(_)));
        assert_eq!(controller.state(), InitState::Initializing);

        // A later caller joins the same in-flight attempt and sees it finish.
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        controller
            .ensure_ready(false, Duration::from_secs(5), async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(stats())
            })
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(controller.is_ready());
    }

    #[tokio::test]
    async fn test_force_rebuild_from_ready() {
        let controller = InitController::new();
        controller
            .ensure_ready(false, Duration::from_secs(1), async { Ok(stats()) })
            .await
            .unwrap();

        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        controller
            .ensure_ready(true, Duration::from_secs(1), async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(stats())
            })
            .await
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
