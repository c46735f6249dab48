//! Process-wide storage of [`AnalyticsManager`] instances.
//!
//! [`AnalyticsRegistry::new`] gives an explicit store that can be passed
//! around; [`AnalyticsRegistry::global`] is the lazily created store shared by
//! the whole process and backing the `*_global_analytics` functions.

use crate::builder::create_analytics;
use crate::manager::AnalyticsManager;
use plume_core::{AnalyticsConfig, PlumeError, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};
use tracing::{debug, info};

/// Key of the default instance
pub const DEFAULT_INSTANCE: &str = "__default__";

static GLOBAL_REGISTRY: OnceLock<AnalyticsRegistry> = OnceLock::new();

struct Singleton {
    fingerprint: Option<String>,
    manager: Arc<AnalyticsManager>,
}

#[derive(Default)]
pub struct AnalyticsRegistry {
    instances: RwLock<HashMap<String, Arc<AnalyticsManager>>>,
    singleton: Mutex<Option<Singleton>>,
}

impl std::fmt::Debug for AnalyticsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalyticsRegistry")
            .field("instances", &self.names())
            .field("has_singleton", &self.has_singleton())
            .finish()
    }
}

impl AnalyticsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static AnalyticsRegistry {
        GLOBAL_REGISTRY.get_or_init(AnalyticsRegistry::new)
    }

    /// Store `manager` under `name`, replacing any previous instance
    pub fn set(&self, name: &str, manager: Arc<AnalyticsManager>) {
        debug!(instance = name, "Registering analytics instance");
        self.write().insert(name.to_string(), manager);
    }

    pub fn set_default(&self, manager: Arc<AnalyticsManager>) {
        self.set(DEFAULT_INSTANCE, manager);
    }

    pub fn get(&self, name: &str) -> Result<Arc<AnalyticsManager>> {
        self.get_optional(name)
            .ok_or_else(|| PlumeError::InstanceNotFound {
                name: name.to_string(),
            })
    }

    pub fn get_optional(&self, name: &str) -> Option<Arc<AnalyticsManager>> {
        self.read().get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    /// Returns whether an instance was removed
    pub fn remove(&self, name: &str) -> bool {
        self.write().remove(name).is_some()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Client-side singleton built with [`create_analytics`]
    pub fn create_singleton(&self, config: &AnalyticsConfig) -> Result<Arc<AnalyticsManager>> {
        self.create_singleton_with(config, create_analytics)
    }

    /// Reuse the current singleton when `config` serializes identically to the
    /// one it was built from, otherwise build and store a new one. The result
    /// is also registered as the default instance.
    pub fn create_singleton_with<F>(
        &self,
        config: &AnalyticsConfig,
        build: F,
    ) -> Result<Arc<AnalyticsManager>>
    where
        F: FnOnce(&AnalyticsConfig) -> Result<AnalyticsManager>,
    {
        let fingerprint = config.fingerprint();
        let mut singleton = self.lock_singleton();

        if let Some(existing) = singleton.as_ref() {
            if fingerprint.is_some() && existing.fingerprint == fingerprint {
                debug!("Reusing analytics singleton, configuration unchanged");
                return Ok(existing.manager.clone());
            }
        }

        let manager = Arc::new(build(config)?);
        *singleton = Some(Singleton {
            fingerprint,
            manager: manager.clone(),
        });
        drop(singleton);

        self.set_default(manager.clone());
        info!(business = %manager.business(), "Created analytics singleton");
        Ok(manager)
    }

    pub fn singleton(&self) -> Result<Arc<AnalyticsManager>> {
        self.singleton_optional().ok_or(PlumeError::SingletonMissing)
    }

    pub fn singleton_optional(&self) -> Option<Arc<AnalyticsManager>> {
        self.lock_singleton()
            .as_ref()
            .map(|singleton| singleton.manager.clone())
    }

    pub fn has_singleton(&self) -> bool {
        self.lock_singleton().is_some()
    }

    /// Forget the singleton. The default instance entry is left in place.
    pub fn reset_singleton(&self) {
        self.lock_singleton().take();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<AnalyticsManager>>> {
        self.instances.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<AnalyticsManager>>> {
        self.instances.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_singleton(&self) -> MutexGuard<'_, Option<Singleton>> {
        self.singleton.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn instance_name(name: Option<&str>) -> &str {
    name.unwrap_or(DEFAULT_INSTANCE)
}

/// Store `manager` in the global registry, under the default key when `name` is `None`
pub fn set_global_analytics(manager: Arc<AnalyticsManager>, name: Option<&str>) {
    AnalyticsRegistry::global().set(instance_name(name), manager);
}

pub fn global_analytics(name: Option<&str>) -> Result<Arc<AnalyticsManager>> {
    AnalyticsRegistry::global().get(instance_name(name))
}

pub fn global_analytics_optional(name: Option<&str>) -> Option<Arc<AnalyticsManager>> {
    AnalyticsRegistry::global().get_optional(instance_name(name))
}

pub fn has_global_analytics(name: Option<&str>) -> bool {
    AnalyticsRegistry::global().has(instance_name(name))
}

pub fn remove_global_analytics(name: Option<&str>) -> bool {
    AnalyticsRegistry::global().remove(instance_name(name))
}

pub fn clear_global_analytics() {
    AnalyticsRegistry::global().clear();
}

pub fn global_analytics_names() -> Vec<String> {
    AnalyticsRegistry::global().names()
}
