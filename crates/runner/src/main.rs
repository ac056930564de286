use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use checkpoints::{ArcDynOffsetStore, PostgresOffsetStore};
use clap::Parser;
use common::{install_shutdown_handler, redact_dsn};
use relay_config::RelayConfig;
use relay_core::{ArcDynRowPoller, EventMapper};
use runner::StreamingLoop;
use sinks::build_publisher;
use sources::{PostgresRowPoller, connect_postgres};
use tracing::{debug, info};

/// Forward new rows from a Postgres table to a Kafka topic.
#[derive(Parser, Debug)]
#[command(name = "rowrelay", version)]
struct Args {
    /// YAML config file. Without it, config comes from the environment.
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long)]
    log_level: Option<String>,

    #[arg(long)]
    log_json: bool,

    /// Serve Prometheus metrics at this address.
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// Reprocess from the start of the table without committing.
    #[arg(long)]
    replay: bool,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cancel = install_shutdown_handler();

    let o11y_cfg = o11y::O11yConfig {
        logging: o11y::logging::Config {
            level: args.log_level.clone(),
            json: args.log_json,
            with_targets: false,
        },
        metrics: o11y::relay_metrics::Config {
            enable: true,
            http_listener: args.metrics_addr,
        },
    };
    o11y::init_all(&o11y_cfg, cancel.clone())
        .map_err(|e| anyhow!("init observability: {e}"))?;

    let cfg = load_config(&args).context("load config")?;
    info!(
        database = %redact_dsn(&cfg.database.url),
        source_table = %cfg.database.source_table,
        offsets_table = %cfg.database.offsets_table,
        brokers = %cfg.kafka.brokers,
        topic = %cfg.kafka.topic,
        replay = cfg.relay.replay,
        "config loaded"
    );

    let pg = connect_postgres(
        &cfg.database.url,
        Duration::from_secs(cfg.database.connect_timeout_secs),
    )
    .await
    .context("connect to postgres")?;

    // both share one connection, reopened on demand after a server restart
    let store: ArcDynOffsetStore = Arc::new(PostgresOffsetStore::new(
        pg.clone(),
        cfg.database.offsets_table.as_str(),
    ));
    let poller: ArcDynRowPoller = Arc::new(PostgresRowPoller::new(
        pg.clone(),
        cfg.database.source_table.as_str(),
    ));
    let publisher = build_publisher(&cfg.kafka);
    let mapper = EventMapper::new(cfg.database.source_table.as_str());

    let relay = StreamingLoop::new(&cfg.relay, store, poller, publisher, mapper);
    let res = relay.run(cancel.clone()).await;

    info!(reconnects = pg.reconnects(), "closing postgres connection");
    pg.close();
    // stops the metrics listener and the signal task
    cancel.cancel();

    let stats = res.context("streaming loop")?;
    info!(
        cycles = stats.cycles,
        events = stats.events,
        "rowrelay exited cleanly"
    );
    Ok(())
}

/// YAML when `--config` is given, the environment otherwise. CLI flags
/// are applied last.
fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut cfg = match &args.config {
        Some(path) => relay_config::load_from_path(path)
            .with_context(|| format!("read {path}"))?,
        None => relay_config::from_env()?,
    };

    if args.replay {
        cfg.relay.replay = true;
    }
    if args.once {
        cfg.relay.max_cycles = Some(1);
    }
    debug!(relay = ?cfg.relay, "loop settings");
    Ok(cfg)
}
