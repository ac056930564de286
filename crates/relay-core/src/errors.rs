use std::borrow::Cow;
use thiserror::Error;

/// Missing or invalid configuration, or a checkpoint table that was never
/// seeded. Only ever fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting: {key}")]
    Missing { key: Cow<'static, str> },

    #[error("invalid value for {key}: {details}")]
    Invalid {
        key: Cow<'static, str>,
        details: Cow<'static, str>,
    },

    #[error(
        "checkpoint table {table} must hold exactly one row with id = 1"
    )]
    MissingCheckpoint { table: Cow<'static, str> },

    #[error("config file error: {details}")]
    File { details: Cow<'static, str> },
}

impl ConfigError {
    pub fn missing(key: impl Into<Cow<'static, str>>) -> Self {
        ConfigError::Missing { key: key.into() }
    }

    pub fn invalid(
        key: impl Into<Cow<'static, str>>,
        details: impl Into<Cow<'static, str>>,
    ) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            details: details.into(),
        }
    }
}

/// Checkpoint read/write or row poll failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {details}")]
    Connect { details: Cow<'static, str> },

    #[error("timeout during {action}")]
    Timeout { action: Cow<'static, str> },

    #[error("query error: {details}")]
    Query { details: Cow<'static, str> },

    #[error("row decode error: {details}")]
    Decode { details: Cow<'static, str> },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Connect { .. } => "connect error",
            StoreError::Timeout { .. } => "timeout",
            StoreError::Query { .. } => "query error",
            StoreError::Decode { .. } => "decode error",
            StoreError::Other(_) => "other error",
        }
    }
}

/// Broker send failure. A partially acknowledged batch is a failure of the
/// whole batch.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("connection error: {details}")]
    Connect { details: Cow<'static, str> },

    #[error("producer is not connected")]
    NotConnected,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("delivery failed: {details}")]
    Delivery { details: Cow<'static, str> },

    #[error("partial batch: {acked} of {total} messages acknowledged")]
    PartialBatch { acked: usize, total: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PublishError {
    pub fn kind(&self) -> &'static str {
        match self {
            PublishError::Connect { .. } => "connect error",
            PublishError::NotConnected => "not connected",
            PublishError::Serialization(_) => "serialization error",
            PublishError::Delivery { .. } => "delivery error",
            PublishError::PartialBatch { .. } => "partial batch",
            PublishError::Other(_) => "other error",
        }
    }
}

/// Any error the relay can raise, grouped by class.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

impl RelayError {
    /// Store and broker failures are retried by the next cycle; config
    /// errors never are.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RelayError::Config(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "config",
            RelayError::Store(e) => e.kind(),
            RelayError::Publish(e) => e.kind(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type PublishResult<T> = std::result::Result<T, PublishError>;
pub type RelayResult<T> = std::result::Result<T, RelayError>;
