//! Kafka publisher against a real broker.
//!
//! Requires Docker and pulls `confluentinc/cp-kafka:7.5.0`.
//!
//! ```bash
//! cargo test -p sinks --test kafka_sink_tests -- --include-ignored --nocapture --test-threads=1
//! ```

use anyhow::Result;
use chrono::{TimeZone, Utc};
use ctor::dtor;
use rdkafka::Message;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use relay_config::KafkaCfg;
use relay_core::{
    Event, EventEnvelope, Mode, PublishError, Publisher, RelayError,
    SourceRow, map_row,
};
use sinks::KafkaPublisher;
use std::time::Instant;
use testcontainers::{
    ContainerAsync, GenericImage, ImageExt,
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
};
use tokio::sync::OnceCell;
use tokio::time::{Duration, sleep, timeout};
use tracing::{debug, info, warn};

use sink_test_common::init_test_tracing;

const KAFKA_PORT: u16 = 9192;
const KAFKA_INTERNAL_PORT: u16 = 29092;

static KAFKA_CONTAINER: OnceCell<ContainerAsync<GenericImage>> =
    OnceCell::const_new();

#[dtor]
fn cleanup() {
    if let Some(container) = KAFKA_CONTAINER.get() {
        std::process::Command::new("docker")
            .args(["rm", "-f", container.id()])
            .output()
            .ok();
    }
}

/// Single-node KRaft broker shared by every test in this file.
async fn get_kafka_container() -> &'static ContainerAsync<GenericImage> {
    KAFKA_CONTAINER
        .get_or_init(|| async {
            let image = GenericImage::new("confluentinc/cp-kafka", "7.5.0")
                .with_wait_for(WaitFor::Duration {
                    length: Duration::from_secs(15),
                })
                .with_env_var("KAFKA_NODE_ID", "1")
                .with_env_var("KAFKA_PROCESS_ROLES", "broker,controller")
                .with_env_var(
                    "KAFKA_CONTROLLER_QUORUM_VOTERS",
                    "1@localhost:29093",
                )
                .with_env_var(
                    "KAFKA_LISTENERS",
                    format!(
                        "PLAINTEXT://0.0.0.0:{KAFKA_INTERNAL_PORT},CONTROLLER://0.0.0.0:29093,EXTERNAL://0.0.0.0:{KAFKA_PORT}"
                    ),
                )
                .with_env_var(
                    "KAFKA_ADVERTISED_LISTENERS",
                    format!(
                        "PLAINTEXT://localhost:{KAFKA_INTERNAL_PORT},EXTERNAL://localhost:{KAFKA_PORT}"
                    ),
                )
                .with_env_var(
                    "KAFKA_LISTENER_SECURITY_PROTOCOL_MAP",
                    "PLAINTEXT:PLAINTEXT,CONTROLLER:PLAINTEXT,EXTERNAL:PLAINTEXT",
                )
                .with_env_var("KAFKA_CONTROLLER_LISTENER_NAMES", "CONTROLLER")
                .with_env_var("KAFKA_INTER_BROKER_LISTENER_NAME", "PLAINTEXT")
                .with_env_var("KAFKA_OFFSETS_TOPIC_REPLICATION_FACTOR", "1")
                .with_env_var(
                    "KAFKA_TRANSACTION_STATE_LOG_REPLICATION_FACTOR",
                    "1",
                )
                .with_env_var("KAFKA_TRANSACTION_STATE_LOG_MIN_ISR", "1")
                .with_env_var("KAFKA_GROUP_INITIAL_REBALANCE_DELAY_MS", "0")
                .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
                .with_env_var("CLUSTER_ID", "MkU3OEVBNTcwNTJENDM2Qg")
                .with_mapped_port(KAFKA_PORT, KAFKA_PORT.tcp());

            let container =
                image.start().await.expect("start kafka container");
            info!("kafka container started: {}", container.id());

            wait_for_kafka(&brokers(), Duration::from_secs(60))
                .await
                .expect("kafka should be ready");

            container
        })
        .await
}

async fn wait_for_kafka(brokers: &str, within: Duration) -> Result<()> {
    let deadline = Instant::now() + within;

    while Instant::now() < deadline {
        let admin: Result<AdminClient<DefaultClientContext>, _> =
            ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("socket.timeout.ms", "5000")
                .set("request.timeout.ms", "5000")
                .create();

        if let Ok(admin) = admin {
            let md = tokio::task::spawn_blocking(move || {
                admin.inner().fetch_metadata(None, Duration::from_secs(5))
            })
            .await;
            if let Ok(Ok(_)) = md {
                return Ok(());
            }
        }

        debug!("waiting for kafka...");
        sleep(Duration::from_millis(500)).await;
    }

    anyhow::bail!("kafka not ready after {within:?}")
}

fn brokers() -> String {
    format!("localhost:{KAFKA_PORT}")
}

fn test_topic(name: &str) -> String {
    format!("rowrelay-test-{}", name.replace('_', "-"))
}

async fn create_topic(brokers: &str, topic: &str) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .create()?;

    let opts =
        AdminOptions::new().operation_timeout(Some(Duration::from_secs(10)));
    let results = admin
        .create_topics(&[NewTopic::new(topic, 1, TopicReplication::Fixed(1))], &opts)
        .await?;

    for result in results {
        if let Err((_, err)) = result {
            if !err.to_string().contains("already exists") {
                warn!("failed to create topic {topic}: {err:?}");
            }
        }
    }

    sleep(Duration::from_millis(500)).await;
    Ok(())
}

fn publisher_cfg(topic: &str) -> KafkaCfg {
    KafkaCfg {
        brokers: brokers(),
        client_id: "rowrelay-it".into(),
        topic: topic.to_string(),
        ..Default::default()
    }
}

/// Producer that refuses any record over 1000 bytes, the librdkafka floor
/// for `message.max.bytes`.
fn small_message_cfg(topic: &str) -> KafkaCfg {
    let mut cfg = publisher_cfg(topic);
    cfg.client_conf
        .insert("message.max.bytes".into(), "1000".into());
    cfg.client_conf.insert("batch.size".into(), "1000".into());
    cfg
}

fn make_event(id: i64, mode: Mode) -> Event {
    make_event_for_org(id, format!("org-{id}"), mode)
}

fn oversized_event(id: i64) -> Event {
    make_event_for_org(id, "x".repeat(4000), Mode::Normal)
}

fn make_event_for_org(id: i64, org: String, mode: Mode) -> Event {
    map_row(
        &SourceRow {
            id,
            org,
            amount: id as f64 * 10.0,
            region: "us".into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(id),
        },
        mode,
    )
}

fn create_consumer(topic: &str, group: &str) -> Result<StreamConsumer> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", brokers())
        .set("group.id", group)
        .set("auto.offset.reset", "earliest")
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .create()?;
    consumer.subscribe(&[topic])?;
    Ok(consumer)
}

/// (key, value) pairs until `want` arrive or the deadline passes.
async fn consume(
    consumer: &StreamConsumer,
    want: usize,
    within: Duration,
) -> Vec<(String, Vec<u8>)> {
    let deadline = Instant::now() + within;
    let mut out = Vec::new();

    while out.len() < want && Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, consumer.recv()).await {
            Ok(Ok(msg)) => {
                let key = msg
                    .key()
                    .map(|k| String::from_utf8_lossy(k).into_owned())
                    .unwrap_or_default();
                out.push((key, msg.payload().unwrap_or_default().to_vec()));
            }
            Ok(Err(e)) => {
                warn!("consumer error: {e}");
                break;
            }
            Err(_) => break,
        }
    }
    out
}

#[tokio::test]
#[ignore = "requires docker"]
async fn batch_is_delivered_in_order_with_row_keys() -> Result<()> {
    init_test_tracing();
    let _container = get_kafka_container().await;

    let topic = test_topic("batch_order");
    create_topic(&brokers(), &topic).await?;

    let publisher = KafkaPublisher::new(publisher_cfg(&topic));
    publisher.init_producer().await?;
    // second init is a no-op
    publisher.init_producer().await?;
    assert!(publisher.is_connected());

    let events: Vec<Event> =
        (1..=10).map(|id| make_event(id, Mode::Normal)).collect();
    publisher.send_events(&events).await?;

    let consumer = create_consumer(&topic, "batch-order")?;
    let got = consume(&consumer, 10, Duration::from_secs(30)).await;
    assert_eq!(got.len(), 10);

    let keys: Vec<_> = got.iter().map(|(k, _)| k.as_str()).collect();
    let expected: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
    assert_eq!(keys, expected.iter().map(String::as_str).collect::<Vec<_>>());

    let first: EventEnvelope = serde_json::from_slice(&got[0].1)?;
    assert_eq!(first, events[0].value);
    assert_eq!(first.meta.created_at, "2024-01-01T00:00:01.000Z");

    publisher.shutdown_producer().await?;
    assert!(!publisher.is_connected());
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn replay_events_carry_replay_stamp() -> Result<()> {
    init_test_tracing();
    let _container = get_kafka_container().await;

    let topic = test_topic("replay_stamp");
    create_topic(&brokers(), &topic).await?;

    let publisher = KafkaPublisher::new(publisher_cfg(&topic));
    publisher.init_producer().await?;
    publisher.send_events(&[make_event(7, Mode::Replay)]).await?;

    let consumer = create_consumer(&topic, "replay-stamp")?;
    let got = consume(&consumer, 1, Duration::from_secs(20)).await;
    let value: serde_json::Value = serde_json::from_slice(&got[0].1)?;
    assert_eq!(value["meta"]["mode"], "replay");
    assert_eq!(value["meta"]["source"], "livedb");

    publisher.shutdown_producer().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn send_after_shutdown_is_not_connected() -> Result<()> {
    init_test_tracing();
    let _container = get_kafka_container().await;

    let topic = test_topic("after_shutdown");
    create_topic(&brokers(), &topic).await?;

    let publisher = KafkaPublisher::new(publisher_cfg(&topic));
    publisher.init_producer().await?;
    publisher.shutdown_producer().await?;
    publisher.shutdown_producer().await?;

    let res = publisher.send_events(&[make_event(1, Mode::Normal)]).await;
    assert!(matches!(res, Err(PublishError::NotConnected)));
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn one_rejected_record_fails_batch_as_partial() -> Result<()> {
    init_test_tracing();
    let _container = get_kafka_container().await;

    let topic = test_topic("partial_batch");
    create_topic(&brokers(), &topic).await?;

    let publisher = KafkaPublisher::new(small_message_cfg(&topic));
    publisher.init_producer().await?;

    let events = vec![
        make_event(1, Mode::Normal),
        oversized_event(2),
        make_event(3, Mode::Normal),
    ];
    let res = publisher.send_events(&events).await;
    assert!(
        matches!(res, Err(PublishError::PartialBatch { acked: 2, total: 3 })),
        "got {res:?}"
    );

    // the accepted records did land; the caller resends the whole batch
    let consumer = create_consumer(&topic, "partial-batch")?;
    let got = consume(&consumer, 2, Duration::from_secs(20)).await;
    let keys: Vec<_> = got.iter().map(|(k, _)| k.as_str()).collect();
    assert_eq!(keys, vec!["1", "3"]);

    publisher.shutdown_producer().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires docker"]
async fn batch_with_no_accepted_record_is_delivery_error() -> Result<()> {
    init_test_tracing();
    let _container = get_kafka_container().await;

    let topic = test_topic("all_rejected");
    create_topic(&brokers(), &topic).await?;

    let publisher = KafkaPublisher::new(small_message_cfg(&topic));
    publisher.init_producer().await?;

    let res = publisher
        .send_events(&[oversized_event(1), oversized_event(2)])
        .await;
    assert!(
        matches!(res, Err(PublishError::Delivery { .. })),
        "got {res:?}"
    );
    // still usable for records that fit
    publisher.send_events(&[make_event(3, Mode::Normal)]).await?;

    publisher.shutdown_producer().await?;
    Ok(())
}

#[tokio::test]
async fn unreachable_broker_fails_init() {
    init_test_tracing();

    let mut cfg = publisher_cfg("nowhere");
    cfg.brokers = "127.0.0.1:1".into();
    cfg.client_conf
        .insert("socket.connection.setup.timeout.ms".into(), "1000".into());

    let publisher = KafkaPublisher::new(cfg);
    let res = publisher.init_producer().await;
    assert!(matches!(
        res,
        Err(RelayError::Publish(PublishError::Connect { .. }))
    ));
    assert!(!publisher.is_connected());
}
