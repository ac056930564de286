//! Broker publishers.
//!
//! Only Kafka is implemented. [`build_publisher`] wraps it as the trait
//! object the streaming loop holds.

use std::sync::Arc;

use relay_config::KafkaCfg;
use relay_core::ArcDynPublisher;

pub mod kafka;

pub use kafka::KafkaPublisher;

/// The producer is not created until `init_producer` is called.
pub fn build_publisher(cfg: &KafkaCfg) -> ArcDynPublisher {
    Arc::new(KafkaPublisher::new(cfg.clone()))
}
