//! Basic analytics usage example
//!
//! Wires PostHog and GA4 against an in-memory transport, tracks a few events
//! and prints what would have been sent.
//!
//! Run with: cargo run -p plume-orchestration --example basic_usage

use plume_core::event::{AuthMethod, UserSignup};
use plume_core::{AnalyticsConfig, AnalyticsEvent, Ga4ProviderConfig, PostHogProviderConfig};
use plume_orchestration::{
    create_analytics_with_transport, init_telemetry, provide, set_global_analytics,
    AnalyticsContext, ContextOptions, EventTracker,
};
use plume_provider::sdk::RecordingTransport;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AnalyticsConfig::new("acme")
        .with_debug(true)
        .with_posthog(PostHogProviderConfig::new("phc_example"))
        .with_ga4(Ga4ProviderConfig::new("G-EXAMPLE1", "example-secret"));

    let _guard = init_telemetry(&config).await?;

    let transport = Arc::new(RecordingTransport::new());
    let manager = Arc::new(create_analytics_with_transport(&config, transport.clone())?);

    let report = manager.initialize().await;
    tracing::info!(?report, "Analytics initialized");

    let mut context = plume_core::Properties::new();
    context.insert("app_version".to_string(), "1.4.0".into());
    manager.set_global_context(context);

    manager
        .track(AnalyticsEvent::new("checkout:started").with_property("spm", "cart.checkout"))
        .await;
    manager
        .track_event(UserSignup {
            method: AuthMethod::Email,
            source: Some("landing".to_string()),
            spm: None,
        })
        .await;
    manager.identify("user-42", None).await;

    set_global_analytics(manager.clone(), None);

    let ambient = AnalyticsContext::new(manager.clone(), ContextOptions::default());
    provide(ambient, async {
        if let Ok(tracker) = EventTracker::current() {
            tracker.track_button_click("upgrade", None).await;
            tracker.track_page("/pricing", None).await;
        }
    })
    .await;

    for request in transport.requests() {
        println!("{}\n{}\n", request.url, serde_json::to_string_pretty(&request.body)?);
    }

    Ok(())
}
