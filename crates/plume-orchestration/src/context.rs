//! Ambient access to a manager with tracked initialization state.
//!
//! [`provide`] runs a future with an [`AnalyticsContext`] installed as
//! task-local state; code inside it reaches the manager through
//! [`current_analytics`] without threading a handle through every call.

use crate::builder::create_analytics;
use crate::manager::AnalyticsManager;
use plume_core::{AnalyticsConfig, PlumeError, Result};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

tokio::task_local! {
    static CURRENT_CONTEXT: AnalyticsContext;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum AnalyticsState {
    Uninitialized,
    Initializing,
    Ready,
    Error(String),
}

/// Point-in-time view of a context's lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSnapshot {
    pub is_initialized: bool,
    pub is_initializing: bool,
    pub error: Option<String>,
    pub is_ready: bool,
}

pub type ReadyCallback = Arc<dyn Fn(&AnalyticsManager) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct ContextOptions {
    /// Initialize when entering [`provide`]
    pub auto_initialize: bool,
    /// Treat any failed provider as a context error instead of `Ready`
    pub fail_on_provider_error: bool,
    pub on_ready: Option<ReadyCallback>,
    pub on_error: Option<ErrorCallback>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            auto_initialize: true,
            fail_on_provider_error: false,
            on_ready: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for ContextOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextOptions")
            .field("auto_initialize", &self.auto_initialize)
            .field("fail_on_provider_error", &self.fail_on_provider_error)
            .field("on_ready", &self.on_ready.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl ContextOptions {
    pub fn manual() -> Self {
        Self {
            auto_initialize: false,
            ..Self::default()
        }
    }

    pub fn fail_on_provider_error(mut self, fail: bool) -> Self {
        self.fail_on_provider_error = fail;
        self
    }

    pub fn on_ready(mut self, callback: impl Fn(&AnalyticsManager) + Send + Sync + 'static) -> Self {
        self.on_ready = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

/// Returns an interrupted initialization to `Uninitialized` so it can be retried
struct InitializingGuard<'a> {
    state: &'a watch::Sender<AnalyticsState>,
    armed: bool,
}

impl InitializingGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InitializingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let reset = self.state.send_if_modified(|state| {
            if *state == AnalyticsState::Initializing {
                *state = AnalyticsState::Uninitialized;
                true
            } else {
                false
            }
        });
        if reset {
            warn!("Analytics context initialization was cancelled");
        }
    }
}

struct ContextInner {
    manager: Arc<AnalyticsManager>,
    options: ContextOptions,
    state: watch::Sender<AnalyticsState>,
}

/// Cheap to clone; clones share the manager and the lifecycle state.
#[derive(Clone)]
pub struct AnalyticsContext {
    inner: Arc<ContextInner>,
}

impl fmt::Debug for AnalyticsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyticsContext")
            .field("state", &self.state())
            .field("options", &self.inner.options)
            .finish()
    }
}

impl AnalyticsContext {
    pub fn new(manager: Arc<AnalyticsManager>, options: ContextOptions) -> Self {
        let (state, _) = watch::channel(AnalyticsState::Uninitialized);
        Self {
            inner: Arc::new(ContextInner {
                manager,
                options,
                state,
            }),
        }
    }

    /// Build the manager with [`create_analytics`]
    pub fn from_config(config: &AnalyticsConfig, options: ContextOptions) -> Result<Self> {
        Ok(Self::new(Arc::new(create_analytics(config)?), options))
    }

    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    pub fn state(&self) -> AnalyticsState {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<AnalyticsState> {
        self.inner.state.subscribe()
    }

    /// Initialize the manager and return the resulting state. A no-op while
    /// initializing or once ready; a context in the error state retries.
    /// Dropping the future before it completes leaves the context
    /// `Uninitialized`.
    pub async fn initialize(&self) -> AnalyticsState {
        let started = self.inner.state.send_if_modified(|state| match state {
            AnalyticsState::Uninitialized | AnalyticsState::Error(_) => {
                *state = AnalyticsState::Initializing;
                true
            }
            _ => false,
        });
        if !started {
            debug!(state = ?self.state(), "Analytics context already initializing or ready");
            return self.state();
        }

        let guard = InitializingGuard {
            state: &self.inner.state,
            armed: true,
        };
        let report = self.inner.manager.initialize().await;
        guard.disarm();
        let next = if self.inner.options.fail_on_provider_error && !report.failed.is_empty() {
            let failures: Vec<String> = report
                .failed
                .iter()
                .map(|(name, message)| format!("{}: {}", name, message))
                .collect();
            AnalyticsState::Error(format!(
                "{} provider(s) failed to initialize ({})",
                report.failed.len(),
                failures.join("; ")
            ))
        } else {
            AnalyticsState::Ready
        };

        self.inner.state.send_replace(next.clone());
        match &next {
            AnalyticsState::Ready => {
                info!("Analytics context ready");
                if let Some(callback) = &self.inner.options.on_ready {
                    callback(self.inner.manager.as_ref());
                }
            }
            AnalyticsState::Error(message) => {
                error!(error = %message, "Analytics context failed to initialize");
                if let Some(callback) = &self.inner.options.on_error {
                    callback(message);
                }
            }
            _ => {}
        }
        next
    }

    /// The manager, or an error describing why it is not usable yet
    pub fn analytics(&self) -> Result<Arc<AnalyticsManager>> {
        match self.state() {
            AnalyticsState::Ready => Ok(self.inner.manager.clone()),
            AnalyticsState::Error(message) => Err(context_error(format!(
                "Analytics initialization failed: {}",
                message
            ))),
            AnalyticsState::Initializing => Err(context_error(
                "Analytics is still initializing. Wait for it or use analytics_optional()",
            )),
            AnalyticsState::Uninitialized => Err(context_error(
                "Analytics not initialized. Enable auto_initialize or call initialize() manually",
            )),
        }
    }

    /// The manager when ready, `None` in any other state
    pub fn analytics_optional(&self) -> Option<Arc<AnalyticsManager>> {
        self.analytics().ok()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let state = self.state();
        let error = match &state {
            AnalyticsState::Error(message) => Some(message.clone()),
            _ => None,
        };
        ContextSnapshot {
            is_initialized: state == AnalyticsState::Ready,
            is_initializing: state == AnalyticsState::Initializing,
            is_ready: state == AnalyticsState::Ready && error.is_none(),
            error,
        }
    }

    /// Wait for an in-flight initialization to finish. Fails immediately when
    /// nothing has started it, or once a cancelled attempt leaves it uninitialized.
    pub async fn wait_until_ready(&self) -> Result<Arc<AnalyticsManager>> {
        let mut receiver = self.subscribe();
        if *receiver.borrow() == AnalyticsState::Uninitialized {
            return self.analytics();
        }

        receiver
            .wait_for(|state| *state != AnalyticsState::Initializing)
            .await
            .map_err(|e| context_error(format!("analytics state channel closed: {}", e)))?;
        self.analytics()
    }
}

fn context_error(message: impl Into<String>) -> PlumeError {
    PlumeError::Context {
        message: message.into(),
    }
}

/// Run `fut` with `context` installed as the ambient analytics context,
/// initializing it first when `auto_initialize` is set.
pub async fn provide<F>(context: AnalyticsContext, fut: F) -> F::Output
where
    F: Future,
{
    if context.options().auto_initialize {
        if let AnalyticsState::Error(message) = context.initialize().await {
            warn!(error = %message, "Running with analytics in error state");
        }
    }
    CURRENT_CONTEXT.scope(context, fut).await
}

/// The context installed by the enclosing [`provide`]
pub fn current_context() -> Result<AnalyticsContext> {
    CURRENT_CONTEXT
        .try_with(AnalyticsContext::clone)
        .map_err(|_| context_error("current_analytics() must be called within provide()"))
}

pub fn current_analytics() -> Result<Arc<AnalyticsManager>> {
    current_context()?.analytics()
}

/// `None` outside [`provide`] or while the context is not ready
pub fn current_analytics_optional() -> Option<Arc<AnalyticsManager>> {
    CURRENT_CONTEXT
        .try_with(AnalyticsContext::analytics_optional)
        .ok()
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use plume_core::{AnalyticsEvent, BusinessTag};
    use plume_provider::MockAnalyticsProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn manager_with(provider: MockAnalyticsProvider) -> Arc<AnalyticsManager> {
        let manager = AnalyticsManager::new("acme", false).unwrap();
        manager.register_provider("mock", Arc::new(provider));
        Arc::new(manager)
    }

    fn mock() -> MockAnalyticsProvider {
        MockAnalyticsProvider::new("mock", BusinessTag::new("acme").unwrap())
    }

    #[tokio::test]
    async fn test_manual_lifecycle() {
        let context = AnalyticsContext::new(manager_with(mock()), ContextOptions::manual());

        let err = context.analytics().unwrap_err();
        assert!(err.to_string().contains("not initialized"));
        assert!(context.analytics_optional().is_none());

        assert_eq!(context.initialize().await, AnalyticsState::Ready);
        assert!(context.analytics().is_ok());

        let snapshot = context.snapshot();
        assert!(snapshot.is_initialized && snapshot.is_ready);
        assert!(!snapshot.is_initializing);
        assert_eq!(snapshot.error, None);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let ready_calls = Arc::new(AtomicUsize::new(0));
        let counter = ready_calls.clone();
        let context = AnalyticsContext::new(
            manager_with(mock()),
            ContextOptions::manual().on_ready(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        context.initialize().await;
        context.initialize().await;
        assert_eq!(ready_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_still_ready_by_default() {
        let context = AnalyticsContext::new(
            manager_with(mock().failing_initialize("no key")),
            ContextOptions::manual(),
        );
        assert_eq!(context.initialize().await, AnalyticsState::Ready);
    }

    #[tokio::test]
    async fn test_fail_on_provider_error() {
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        let context = AnalyticsContext::new(
            manager_with(mock().failing_initialize("no key")),
            ContextOptions::manual()
                .fail_on_provider_error(true)
                .on_error(move |message| {
                    *sink.lock().unwrap() = Some(message.to_string());
                }),
        );

        let state = context.initialize().await;
        assert!(matches!(state, AnalyticsState::Error(_)));

        let err = context.analytics().unwrap_err();
        assert!(err.to_string().contains("Analytics initialization failed"));
        assert!(context.analytics_optional().is_none());
        assert!(context.snapshot().error.is_some());
        assert!(!context.snapshot().is_ready);
        assert!(seen.lock().unwrap().as_deref().unwrap().contains("no key"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initializing_state_and_wait_until_ready() {
        let context = AnalyticsContext::new(
            manager_with(mock().with_init_delay(Duration::from_secs(5))),
            ContextOptions::manual(),
        );

        let background = context.clone();
        let handle = tokio::spawn(async move { background.initialize().await });
        while context.state() != AnalyticsState::Initializing {
            tokio::task::yield_now().await;
        }

        assert_eq!(context.state(), AnalyticsState::Initializing);
        assert!(context
            .analytics()
            .unwrap_err()
            .to_string()
            .contains("still initializing"));
        assert!(context.snapshot().is_initializing);

        assert!(context.wait_until_ready().await.is_ok());
        assert_eq!(handle.await.unwrap(), AnalyticsState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_initialize_can_be_retried() {
        let context = AnalyticsContext::new(
            manager_with(mock().with_init_delay(Duration::from_secs(5))),
            ContextOptions::manual(),
        );

        let cancelled =
            tokio::time::timeout(Duration::from_secs(1), context.initialize()).await;
        assert!(cancelled.is_err());
        assert_eq!(context.state(), AnalyticsState::Uninitialized);
        assert!(context
            .analytics()
            .unwrap_err()
            .to_string()
            .contains("not initialized"));

        assert_eq!(context.initialize().await, AnalyticsState::Ready);
        assert!(context.wait_until_ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_until_ready_fails_when_never_started() {
        let context = AnalyticsContext::new(manager_with(mock()), ContextOptions::manual());
        assert!(context.wait_until_ready().await.is_err());
    }

    #[tokio::test]
    async fn test_provide_installs_ambient_context() {
        let provider = Arc::new(mock());
        let manager = AnalyticsManager::new("acme", false).unwrap();
        manager.register_provider("mock", provider.clone());
        let context = AnalyticsContext::new(Arc::new(manager), ContextOptions::default());

        provide(context, async {
            let analytics = current_analytics().unwrap();
            analytics.track(AnalyticsEvent::new("inside")).await;
            assert!(current_analytics_optional().is_some());
        })
        .await;

        assert_eq!(provider.tracked().len(), 1);
    }

    #[tokio::test]
    async fn test_accessors_outside_provide() {
        assert!(current_context().is_err());
        assert!(current_analytics().is_err());
        assert!(current_analytics_optional().is_none());
    }

    #[tokio::test]
    async fn test_provide_without_auto_initialize() {
        let context = AnalyticsContext::new(manager_with(mock()), ContextOptions::manual());

        provide(context, async {
            assert!(current_context().is_ok());
            assert!(current_analytics().is_err());
            assert!(current_analytics_optional().is_none());
        })
        .await;
    }
}
