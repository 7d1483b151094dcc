//! Lifecycle manager for the shared rendering engine.
//!
//! State machine: `Uninitialized -> Starting -> Ready`, `Starting -> Unavailable`
//! after exhausting retries, and `Unavailable -> Starting` on the next demand.
//! Failure is never cached past the callers that were waiting on it.

use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::diagnostics::classify;
use super::{
    EngineError, EngineHandle, EngineLauncher, EngineUnavailable, PageSetup, RenderContext,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Starting,
    Ready,
    Unavailable,
}

/// Bounded retry with exponential backoff for engine start-up.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub launch_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            launch_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): base, 2*base, 4*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

type Outcome = Result<EngineHandle, EngineUnavailable>;

/// Sole owner of the engine handle.
pub struct EngineManager {
    launcher: Arc<dyn EngineLauncher>,
    policy: RetryPolicy,
    handle: RwLock<Option<EngineHandle>>,
    state: RwLock<EngineState>,
    /// Serializes start-up; held across the whole attempt sequence.
    init_gate: tokio::sync::Mutex<()>,
    /// Bumped after every completed attempt sequence.
    generation: AtomicU64,
    last_outcome: Mutex<Option<Outcome>>,
    next_context_id: AtomicU64,
}

impl EngineManager {
    pub fn new(launcher: Arc<dyn EngineLauncher>, policy: RetryPolicy) -> Self {
        Self {
            launcher,
            policy,
            handle: RwLock::new(None),
            state: RwLock::new(EngineState::Uninitialized),
            init_gate: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            last_outcome: Mutex::new(None),
            next_context_id: AtomicU64::new(1),
        }
    }

    pub fn state(&self) -> EngineState {
        *self.state.read()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Return the ready engine, starting it if needed.
    ///
    /// Concurrent callers that arrive while a start-up sequence is running wait for
    /// it and receive its outcome instead of launching again.
    pub async fn ensure_ready(&self) -> Result<EngineHandle, EngineUnavailable> {
        if let Some(handle) = self.connected_handle() {
            return Ok(handle);
        }

        let observed = self.generation.load(Ordering::Acquire);
        let _gate = self.init_gate.lock().await;

        if self.generation.load(Ordering::Acquire) != observed {
            match self.last_outcome.lock().clone() {
                Some(Err(unavailable)) => return Err(unavailable),
                Some(Ok(handle)) if handle.is_connected() => return Ok(handle),
                _ => {}
            }
        }

        if let Some(handle) = self.connected_handle() {
            return Ok(handle);
        }
        self.drop_stale_handle();

        let outcome = self.start_with_retry().await;
        *self.last_outcome.lock() = Some(outcome.clone());
        self.generation.fetch_add(1, Ordering::AcqRel);
        outcome
    }

    /// Eager start at service boot. Failure is logged and the manager stays lazy.
    pub async fn warm_up(&self) {
        match self.ensure_ready().await {
            Ok(_) => info!("Rendering engine ready at start-up"),
            Err(e) => {
                warn!(
                    "Rendering engine could not be started at start-up, will retry on first demand: {}",
                    e
                );
                let mut state = self.state.write();
                if *state == EngineState::Unavailable {
                    *state = EngineState::Uninitialized;
                }
            }
        }
    }

    /// Open an isolated context on a ready engine.
    pub async fn acquire_context(&self, handle: &EngineHandle) -> Result<ContextLease, EngineError> {
        match handle.open_context().await {
            Ok(context) => {
                let id = self.next_context_id.fetch_add(1, Ordering::Relaxed);
                debug!("Render context {} acquired", id);
                Ok(ContextLease::new(id, context))
            }
            Err(e) => {
                if !handle.is_connected() {
                    warn!("Rendering engine disconnected while opening a context: {}", e);
                    self.forget(handle);
                }
                Err(e)
            }
        }
    }

    /// Best-effort graceful close of the engine.
    pub async fn shutdown(&self) {
        let _gate = self.init_gate.lock().await;
        let handle = self.handle.write().take();
        *self.last_outcome.lock() = None;
        *self.state.write() = EngineState::Uninitialized;

        match handle {
            Some(handle) => {
                info!("Shutting down rendering engine");
                handle.shutdown();
            }
            None => debug!("Rendering engine was not running at shutdown"),
        }
    }

    fn connected_handle(&self) -> Option<EngineHandle> {
        self.handle
            .read()
            .as_ref()
            .filter(|handle| handle.is_connected())
            .cloned()
    }

    fn drop_stale_handle(&self) {
        if let Some(stale) = self.handle.write().take() {
            self.last_outcome.lock().take();
            warn!("Rendering engine is no longer connected, relaunching");
            stale.shutdown();
            *self.state.write() = EngineState::Uninitialized;
        }
    }

    fn forget(&self, handle: &EngineHandle) {
        let mut slot = self.handle.write();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, handle)) {
            slot.take();
            self.last_outcome.lock().take();
            *self.state.write() = EngineState::Uninitialized;
        }
    }

    async fn start_with_retry(&self) -> Outcome {
        *self.state.write() = EngineState::Starting;
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            info!(
                "Launching rendering engine (attempt {}/{})",
                attempt, max_attempts
            );

            let launched =
                match tokio::time::timeout(self.policy.launch_timeout, self.launcher.launch()).await
                {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Launch(format!(
                        "launch timed out after {}s",
                        self.policy.launch_timeout.as_secs()
                    ))),
                };

            match launched {
                Ok(handle) => {
                    *self.handle.write() = Some(handle.clone());
                    *self.state.write() = EngineState::Ready;
                    info!("Rendering engine launched on attempt {}", attempt);
                    return Ok(handle);
                }
                Err(e) => {
                    warn!("Rendering engine launch attempt {} failed: {}", attempt, e);
                    last_error = match e {
                        EngineError::Launch(message) => message,
                        other => other.to_string(),
                    };
                    if attempt < max_attempts {
                        let delay = self.policy.delay_for(attempt);
                        debug!("Retrying engine launch in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        *self.state.write() = EngineState::Unavailable;
        let unavailable = EngineUnavailable {
            attempts: max_attempts,
            diagnostic: classify(&last_error),
        };
        error!("{}", unavailable);
        Err(unavailable)
    }
}

/// A render context scoped to a single conversion.
///
/// Call `release` when done. Dropping an unreleased lease also gives the context
/// back, without waiting for the engine to finish closing it.
pub struct ContextLease {
    id: u64,
    context: Option<Box<dyn RenderContext>>,
}

impl ContextLease {
    fn new(id: u64, context: Box<dyn RenderContext>) -> Self {
        Self {
            id,
            context: Some(context),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn print_pdf(&mut self, html: &str, page: &PageSetup) -> Result<Vec<u8>, EngineError> {
        match self.context.as_mut() {
            Some(context) => context.print_pdf(html, page).await,
            None => Err(EngineError::Context(format!(
                "render context {} already released",
                self.id
            ))),
        }
    }

    /// Give the context back and wait until the engine has closed it.
    pub async fn release(mut self) {
        if let Some(mut context) = self.context.take() {
            match context.release().await {
                Ok(()) => debug!("Render context {} released", self.id),
                Err(e) => warn!("Render context {} did not close cleanly: {}", self.id, e),
            }
        }
    }

    fn close_inner(&mut self) {
        if let Some(mut context) = self.context.take() {
            match context.close() {
                Ok(()) => debug!("Render context {} released", self.id),
                Err(e) => warn!("Render context {} did not close cleanly: {}", self.id, e),
            }
        }
    }
}

impl Drop for ContextLease {
    fn drop(&mut self) {
        self.close_inner();
    }
}
