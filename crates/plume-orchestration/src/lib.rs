//! Orchestration layer for Plume: the fan-out manager, its construction entry
//! points, the process-wide registry and the ambient context.

pub mod builder;
pub mod context;
pub mod manager;
pub mod registry;
pub mod tracking;

pub use builder::{
    create_analytics, create_analytics_with_transport, create_server_analytics,
    create_server_analytics_with_transport, init_telemetry, telemetry_config,
};
pub use context::{
    current_analytics, current_analytics_optional, current_context, provide, AnalyticsContext,
    AnalyticsState, ContextOptions, ContextSnapshot,
};
pub use manager::{AnalyticsManager, FanOutReport, InitializationReport, ManagerStatus};
pub use registry::{
    clear_global_analytics, global_analytics, global_analytics_names, global_analytics_optional,
    has_global_analytics, remove_global_analytics, set_global_analytics, AnalyticsRegistry,
    DEFAULT_INSTANCE,
};
pub use tracking::EventTracker;
