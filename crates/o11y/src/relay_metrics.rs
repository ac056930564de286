use axum::{Router, routing::get};
use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::{net::SocketAddr, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

#[derive(Clone, Debug)]
pub struct Config {
    pub enable: bool,
    /// `/metrics` is only served when set.
    pub http_listener: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable: true,
            http_listener: None,
        }
    }
}

/// Install the Prometheus recorder and, if configured, serve `/metrics`
/// until `cancel` fires. Must be called inside a tokio runtime when a
/// listener is set.
pub fn init(
    cfg: &Config,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    if !cfg.enable {
        return Ok(());
    }

    if HANDLE.get().is_none() {
        let handle = PrometheusBuilder::new().install_recorder()?;
        HANDLE.set(handle).ok();
    }

    if let Some(addr) = cfg.http_listener {
        tokio::spawn(serve(addr, cancel));
    }

    describe_metrics();
    Ok(())
}

async fn serve(addr: SocketAddr, cancel: CancellationToken) {
    let mut tries = 0;
    let listener = loop {
        match TcpListener::bind(addr).await {
            Ok(l) => break l,
            Err(e) if tries < 5 => {
                tries += 1;
                tracing::warn!(error = %e, tries, "metrics listener bind failed; retrying");
                tokio::time::sleep(Duration::from_millis(150)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, %addr, "metrics listener failed; giving up");
                return;
            }
        }
    };

    tracing::info!(%addr, "serving /metrics");
    let res = axum::serve(listener, router_with_metrics())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await;
    if let Err(e) = res {
        tracing::warn!(error = %e, "metrics server stopped");
    }
}

/// Current snapshot in Prometheus text format.
pub async fn metrics_handler() -> String {
    render()
}

pub fn render() -> String {
    HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_else(|| "# recorder not installed\n".into())
}

pub fn router_with_metrics() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub fn describe_metrics() {
    describe_counter!(
        "rowrelay_cycles_total",
        Unit::Count,
        "Polling cycles by outcome (idle, published, retryable, fatal)"
    );
    describe_counter!(
        "rowrelay_rows_polled_total",
        Unit::Count,
        "Rows read from the source table"
    );
    describe_counter!(
        "rowrelay_events_published_total",
        Unit::Count,
        "Events acknowledged by the broker"
    );
    describe_counter!(
        "rowrelay_publish_errors_total",
        Unit::Count,
        "Batches the broker failed to acknowledge in full"
    );
    describe_counter!(
        "rowrelay_checkpoint_commits_total",
        Unit::Count,
        "Checkpoint writes"
    );
    describe_gauge!(
        "rowrelay_checkpoint_last_id",
        Unit::Count,
        "Last committed source row id"
    );
    describe_histogram!(
        "rowrelay_cycle_latency_seconds",
        Unit::Seconds,
        "Wall time of one polling cycle"
    );
    describe_counter!(
        "rowrelay_panics_total",
        Unit::Count,
        "Panics captured by the panic hook, by thread kind"
    );
}
