use chrono::Utc;
use futures::future::join_all;
use plume_core::{
    AnalyticsEvent, AnalyticsProvider, BusinessTag, EventContext, PredefinedEvent, Properties,
    Result,
};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, trace, warn};

/// Outcome of one call fanned out to every registered provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FanOutReport {
    pub succeeded: Vec<String>,
    /// `(provider key, error message)`
    pub failed: Vec<(String, String)>,
}

impl FanOutReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Per-provider outcome of [`AnalyticsManager::initialize`]
pub type InitializationReport = FanOutReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagerStatus {
    pub initialized: bool,
    pub providers_count: usize,
}

/// Fans analytics calls out to every registered provider.
///
/// Provider failures are isolated: one failing provider never stops the
/// others, and no tracking call ever returns an error to the caller.
pub struct AnalyticsManager {
    business: BusinessTag,
    debug: bool,
    providers: RwLock<HashMap<String, Arc<dyn AnalyticsProvider>>>,
    global_context: RwLock<EventContext>,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
}

impl std::fmt::Debug for AnalyticsManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsManager")
            .field("business", &self.business)
            .field("debug", &self.debug)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl AnalyticsManager {
    /// Fails when `business` is blank
    pub fn new(business: impl Into<String>, debug: bool) -> Result<Self> {
        Ok(Self::with_business(BusinessTag::new(business)?, debug))
    }

    pub fn with_business(business: BusinessTag, debug: bool) -> Self {
        Self {
            business,
            debug,
            providers: RwLock::new(HashMap::new()),
            global_context: RwLock::new(EventContext::new()),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
        }
    }

    pub fn business(&self) -> &BusinessTag {
        &self.business
    }

    /// Register under `name`, replacing any provider already using it
    pub fn register_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn AnalyticsProvider>,
    ) -> &Self {
        let name = name.into();
        if self.providers_write().insert(name.clone(), provider).is_some() {
            self.log(&format!("Replaced provider: {}", name));
        } else {
            self.log(&format!("Registered provider: {}", name));
        }
        self
    }

    pub fn unregister_provider(&self, name: &str) -> &Self {
        if self.providers_write().remove(name).is_some() {
            self.log(&format!("Unregistered provider: {}", name));
        }
        self
    }

    pub fn provider(&self, name: &str) -> Option<Arc<dyn AnalyticsProvider>> {
        self.providers_read().get(name).cloned()
    }

    /// Snapshot of the registered providers, sorted by key
    pub fn providers(&self) -> Vec<(String, Arc<dyn AnalyticsProvider>)> {
        let mut providers: Vec<_> = self
            .providers_read()
            .iter()
            .map(|(name, provider)| (name.clone(), provider.clone()))
            .collect();
        providers.sort_by(|a, b| a.0.cmp(&b.0));
        providers
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initialize every provider concurrently. Never fails; the report lists
    /// what did not come up. Calling it again is a no-op with an empty report.
    #[instrument(skip(self), fields(business = %self.business))]
    pub async fn initialize(&self) -> InitializationReport {
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            self.log("Already initialized");
            return InitializationReport::default();
        }

        let report = self
            .fan_out("initialize", |provider| async move {
                provider.initialize().await
            })
            .await;
        self.initialized.store(true, Ordering::SeqCst);

        info!(
            succeeded = report.succeeded.len(),
            total = report.attempted(),
            "Initialized {}/{} analytics providers",
            report.succeeded.len(),
            report.attempted()
        );
        if !report.failed.is_empty() {
            warn!(
                failed = report.failed.len(),
                "{} providers failed to initialize",
                report.failed.len()
            );
        }

        report
    }

    /// Merge global context under the event properties and send to every provider
    pub async fn track(&self, event: AnalyticsEvent) -> FanOutReport {
        if !self.ensure_initialized() {
            return FanOutReport::default();
        }

        let event = self.enrich_event(event);
        self.fan_out("track", |provider| {
            let event = event.clone();
            async move { provider.track(event).await }
        })
        .await
    }

    /// Track a predefined event with typed properties
    pub async fn track_event<E: PredefinedEvent>(&self, event: E) -> FanOutReport {
        match event.into_event() {
            Ok(event) => self.track(event).await,
            Err(e) => {
                error!(event = E::NAME, error = %e, "Failed to build predefined event");
                FanOutReport::default()
            }
        }
    }

    /// Track an ad-hoc event by name
    pub async fn track_named(&self, name: &str, properties: Properties) -> FanOutReport {
        self.track(AnalyticsEvent::new(name).with_properties(properties))
            .await
    }

    pub async fn identify(&self, user_id: &str, properties: Option<Properties>) -> FanOutReport {
        if !self.ensure_initialized() {
            return FanOutReport::default();
        }

        let properties = self.merge_context(properties.unwrap_or_default());
        self.fan_out("identify", |provider| {
            let user_id = user_id.to_string();
            let properties = properties.clone();
            async move { provider.identify(&user_id, Some(properties)).await }
        })
        .await
    }

    pub async fn track_page_view(&self, page: &str, properties: Option<Properties>) -> FanOutReport {
        if !self.ensure_initialized() {
            return FanOutReport::default();
        }

        let properties = self.merge_context(properties.unwrap_or_default());
        self.fan_out("track_page_view", |provider| {
            let page = page.to_string();
            let properties = properties.clone();
            async move { provider.track_page_view(&page, Some(properties)).await }
        })
        .await
    }

    pub async fn reset(&self) -> FanOutReport {
        if !self.ensure_initialized() {
            return FanOutReport::default();
        }

        self.fan_out("reset", |provider| async move { provider.reset().await })
            .await
    }

    /// Shallow-merge into the global context; later values win
    pub fn set_global_context(&self, context: EventContext) -> &Self {
        let mut current = self.context_write();
        current.extend(context);
        if self.debug {
            debug!(context = ?current, "Updated global context");
        }
        drop(current);
        self
    }

    /// Copy of the global context
    pub fn global_context(&self) -> EventContext {
        self.context_read().clone()
    }

    pub fn clear_global_context(&self) -> &Self {
        self.context_write().clear();
        self.log("Cleared global context");
        self
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            initialized: self.is_initialized(),
            providers_count: self.providers_read().len(),
        }
    }

    fn ensure_initialized(&self) -> bool {
        if !self.is_initialized() {
            warn!("Analytics not initialized. Call initialize() first.");
            return false;
        }
        true
    }

    fn merge_context(&self, properties: Properties) -> Properties {
        let mut merged = self.global_context();
        merged.extend(properties);
        merged
    }

    fn enrich_event(&self, mut event: AnalyticsEvent) -> AnalyticsEvent {
        event.properties = self.merge_context(std::mem::take(&mut event.properties));
        event.timestamp.get_or_insert_with(Utc::now);
        event
    }

    /// Run `call` on a snapshot of the providers and wait for all of them
    async fn fan_out<F, Fut>(&self, operation: &'static str, call: F) -> FanOutReport
    where
        F: Fn(Arc<dyn AnalyticsProvider>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let calls = self.providers().into_iter().map(|(name, provider)| {
            let pending = call(provider.clone());
            async move { (name, provider, pending.await) }
        });

        let mut report = FanOutReport::default();
        for (name, provider, result) in join_all(calls).await {
            match result {
                Ok(()) => report.succeeded.push(name),
                Err(e) => {
                    error!(
                        operation,
                        provider = provider.provider_name(),
                        error = %e,
                        "{} failed for {}",
                        operation,
                        provider.provider_name()
                    );
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report
    }

    fn log(&self, message: &str) {
        if self.debug {
            debug!(component = "AnalyticsManager", "{}", message);
        } else {
            trace!(component = "AnalyticsManager", "{}", message);
        }
    }

    fn providers_read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn AnalyticsProvider>>> {
        self.providers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn providers_write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn AnalyticsProvider>>> {
        self.providers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn context_read(&self) -> RwLockReadGuard<'_, EventContext> {
        self.global_context.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn context_write(&self) -> RwLockWriteGuard<'_, EventContext> {
        self.global_context.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
