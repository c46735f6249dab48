//! Logging bootstrap

use crate::{
    config::{LogFormat, LoggingConfig, TelemetryConfig},
    Error, Result,
};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Installs the global tracing subscriber for an application using Plume
pub struct TelemetrySystem;

/// Keeps the non-blocking file writer alive; dropping it flushes pending lines
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

impl TelemetryGuard {
    pub fn has_file_output(&self) -> bool {
        self._file_guard.is_some()
    }
}

impl TelemetrySystem {
    /// Initialize the telemetry system with the given configuration
    pub async fn init(config: TelemetryConfig) -> Result<TelemetryGuard> {
        config.validate()?;

        let mut layers: Vec<BoxedLayer> = Vec::new();
        let mut file_guard = None;

        if config.enabled {
            if config.logging.console_enabled {
                layers.push(Self::build_console_layer(&config.logging));
            }

            if config.logging.file_enabled {
                let (layer, guard) = Self::build_file_layer(&config.logging).await?;
                layers.push(layer);
                file_guard = Some(guard);
            }
        }

        Registry::default()
            .with(layers)
            .with(Self::build_env_filter(&config)?)
            .try_init()
            .map_err(|e| Error::System {
                message: format!("Failed to initialize tracing subscriber: {}", e),
            })?;

        tracing::info!(
            telemetry.event = "system_initialized",
            telemetry.version = env!("CARGO_PKG_VERSION"),
            config.logging.level = ?config.logging.level,
            "Telemetry system initialized"
        );

        Ok(TelemetryGuard {
            _file_guard: file_guard,
        })
    }

    /// Build environment filter for log level filtering
    fn build_env_filter(config: &TelemetryConfig) -> Result<EnvFilter> {
        if let Ok(env_filter) = std::env::var("RUST_LOG") {
            return EnvFilter::try_new(env_filter).map_err(|e| Error::Config {
                message: format!("Invalid RUST_LOG filter: {}", e),
            });
        }

        let level: Level = config.logging.level.into();
        let mut filter = EnvFilter::new(level.to_string());

        for directive in ["hyper=warn", "reqwest=warn", "h2=warn"] {
            filter = filter.add_directive(directive.parse().map_err(|e| Error::Config {
                message: format!("Invalid filter directive '{}': {}", directive, e),
            })?);
        }

        Ok(filter)
    }

    fn build_console_layer(logging: &LoggingConfig) -> BoxedLayer {
        match logging.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .with_thread_names(logging.include_thread_info)
                .boxed(),
            LogFormat::Pretty => fmt::layer()
                .pretty()
                .with_target(true)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .with_thread_names(logging.include_thread_info)
                .boxed(),
            LogFormat::Compact => fmt::layer()
                .compact()
                .with_target(false)
                .with_file(logging.include_location)
                .with_line_number(logging.include_location)
                .with_thread_ids(logging.include_thread_info)
                .with_thread_names(logging.include_thread_info)
                .boxed(),
        }
    }

    /// Daily rolling file output through a non-blocking writer
    async fn build_file_layer(logging: &LoggingConfig) -> Result<(BoxedLayer, WorkerGuard)> {
        tokio::fs::create_dir_all(&logging.log_dir).await?;

        let appender = tracing_appender::rolling::daily(&logging.log_dir, &logging.log_file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        let layer = match logging.format {
            LogFormat::Json => fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(true)
                .with_span_list(false)
                .with_target(true)
                .boxed(),
            LogFormat::Pretty | LogFormat::Compact => fmt::layer()
                .compact()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .boxed(),
        };

        Ok((layer, guard))
    }
}
