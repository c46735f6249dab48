//! Thin vendor clients wrapped by the provider adapters.

pub mod gtag;
pub mod posthog;
pub mod posthog_server;
pub mod transport;

pub use gtag::{Gtag, GtagCommand, GtagOptions};
pub use posthog::{PostHogClient, PostHogOptions};
pub use posthog_server::{CaptureMessage, PostHogServerClient, PostHogServerOptions};
pub use transport::{HttpTransport, RecordingTransport, Transport, TransportRequest};
