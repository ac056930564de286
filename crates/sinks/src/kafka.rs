use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use relay_config::KafkaCfg;
use relay_core::{
    Event, PublishError, PublishResult, Publisher, RelayResult,
};
use tracing::{debug, info, instrument, warn};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka publisher. The producer is created by `init_producer` and dropped
/// by `shutdown_producer`; in between it is cloned per batch so no lock is
/// held across an await.
pub struct KafkaPublisher {
    id: String,
    cfg: KafkaCfg,
    producer: RwLock<Option<FutureProducer>>,
}

impl KafkaPublisher {
    pub fn new(cfg: KafkaCfg) -> Self {
        Self {
            id: format!("kafka:{}", cfg.topic),
            cfg,
            producer: RwLock::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.cfg.topic
    }

    fn client_config(&self) -> ClientConfig {
        // bounds enqueue plus every delivery retry for one message;
        // delivery.timeout.ms is an alias and must not be set alongside
        let delivery_ms = self.cfg.send_timeout().as_millis().to_string();

        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", self.cfg.brokers.clone())
            .set("client.id", self.cfg.client_id.clone())
            .set("message.timeout.ms", delivery_ms)
            .set("socket.keepalive.enable", "true")
            .set("compression.type", "lz4")
            .set("linger.ms", "5")
            .set("request.timeout.ms", "30000")
            .set("retry.backoff.ms", "100")
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("retries", "10")
            .set("max.in.flight.requests.per.connection", "5");

        // user overrides win
        for (k, v) in &self.cfg.client_conf {
            cfg.set(k, v);
        }
        cfg
    }

    fn current(&self) -> Option<FutureProducer> {
        self.producer.read().clone()
    }
}

/// Blocks on a metadata round-trip so an unreachable broker fails startup
/// rather than the first cycle.
async fn probe_broker(
    producer: &FutureProducer,
    topic: &str,
) -> PublishResult<()> {
    let client = producer.clone();
    let topic = topic.to_string();

    let res = tokio::task::spawn_blocking(move || {
        client
            .client()
            .fetch_metadata(Some(&topic), METADATA_TIMEOUT)
            .map(|md| md.brokers().len())
    })
    .await
    .context("metadata probe task")?;

    match res {
        Ok(0) => Err(PublishError::Connect {
            details: "metadata returned no brokers".into(),
        }),
        Ok(brokers) => {
            debug!(brokers, "kafka metadata fetched");
            Ok(())
        }
        Err(e) => Err(PublishError::Connect {
            details: format!("kafka metadata: {e}").into(),
        }),
    }
}

#[async_trait]
impl Publisher for KafkaPublisher {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip_all, fields(topic = %self.cfg.topic))]
    async fn init_producer(&self) -> RelayResult<()> {
        if self.is_connected() {
            debug!("producer already initialized");
            return Ok(());
        }
        self.cfg.require_connection_params()?;

        let producer: FutureProducer =
            self.client_config().create().map_err(|e| {
                PublishError::Connect {
                    details: format!("creating kafka producer: {e}").into(),
                }
            })?;

        probe_broker(&producer, &self.cfg.topic).await?;

        {
            let mut slot = self.producer.write();
            if slot.is_none() {
                *slot = Some(producer);
            }
        }
        info!(brokers = %self.cfg.brokers, client_id = %self.cfg.client_id, "kafka producer connected");
        Ok(())
    }

    /// Queue every record, then await every delivery. rdkafka batches the
    /// queued records internally.
    async fn send_events(&self, events: &[Event]) -> PublishResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let producer = self.current().ok_or(PublishError::NotConnected)?;

        let serialized: Vec<(Vec<u8>, &str)> = events
            .iter()
            .map(|e| Ok((e.value_bytes()?, e.key.as_str())))
            .collect::<PublishResult<Vec<_>>>()?;

        // wait for queue space at most as long as a delivery may take
        let timeout = Timeout::After(self.cfg.send_timeout());
        let deliveries: Vec<_> = serialized
            .iter()
            .map(|(payload, key)| {
                producer.send(
                    FutureRecord::to(&self.cfg.topic)
                        .payload(payload)
                        .key(*key),
                    timeout,
                )
            })
            .collect();

        let total = deliveries.len();
        let mut acked = 0usize;
        let mut first_err = None;
        for res in join_all(deliveries).await {
            match res {
                Ok(_) => acked += 1,
                Err((e, _msg)) => {
                    if first_err.is_none() {
                        first_err = Some(e.to_string());
                    }
                }
            }
        }

        match first_err {
            None => {
                debug!(topic = %self.cfg.topic, count = total, "batch delivered");
                Ok(())
            }
            Some(err) if acked == 0 => Err(PublishError::Delivery {
                details: format!("kafka: {err}").into(),
            }),
            Some(err) => {
                warn!(acked, total, error = %err, "kafka batch partially delivered");
                Err(PublishError::PartialBatch { acked, total })
            }
        }
    }

    async fn shutdown_producer(&self) -> PublishResult<()> {
        let Some(producer) = self.producer.write().take() else {
            return Ok(());
        };

        let res = tokio::task::spawn_blocking(move || {
            producer.flush(Timeout::After(FLUSH_TIMEOUT))
        })
        .await;

        match res {
            Ok(Ok(())) => info!(topic = %self.cfg.topic, "kafka producer flushed and closed"),
            Ok(Err(e)) => warn!(error = %e, "kafka flush failed; outstanding messages dropped"),
            Err(e) => warn!(error = %e, "kafka flush task failed"),
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.producer.read().is_some()
    }
}
