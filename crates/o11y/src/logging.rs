use std::sync::Once;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt,
};

static INIT: Once = Once::new();

#[derive(Clone, Debug)]
pub struct Config {
    /// A bare level ("info") or a full filter such as
    /// "info,rowrelay=debug,rdkafka=warn". `RUST_LOG` takes precedence.
    pub level: Option<String>,
    /// JSON lines when true, human-readable text otherwise.
    pub json: bool,
    pub with_targets: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: Some("info".to_owned()),
            json: false,
            with_targets: false,
        }
    }
}

/// Resolve the effective filter: `RUST_LOG`, then the configured level,
/// then `info`.
pub fn build_filter(env: Option<&str>, level: Option<&str>) -> EnvFilter {
    env.and_then(|s| EnvFilter::try_new(s).ok())
        .or_else(|| level.and_then(|s| EnvFilter::try_new(s).ok()))
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(cfg: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut result = Ok(());
    INIT.call_once(|| {
        // rdkafka and tokio-postgres log through `log`
        let _ = LogTracer::init();

        let env = std::env::var("RUST_LOG").ok();
        let filter = build_filter(env.as_deref(), cfg.level.as_deref());

        let fmt_layer = if cfg.json {
            fmt::layer()
                .with_target(cfg.with_targets)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .boxed()
        } else {
            fmt::layer()
                .with_target(cfg.with_targets)
                .with_ansi(true)
                .boxed()
        };

        let subscriber = Registry::default().with(filter).with(fmt_layer);
        result = tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| e.into());
    });
    result
}
