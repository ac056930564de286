//! Shared utilities for the rowrelay crates.
//!
//! - **DSN utilities**: credential redaction for connection strings
//! - **Retry**: exponential backoff with jitter for reconnects
//! - **Shutdown**: SIGINT/SIGTERM to `CancellationToken` wiring

pub mod dsn;
pub mod retry;
pub mod shutdown;

pub use dsn::{
    dsn_host, redact_dsn, redact_keyvalue_password, redact_url_password,
};
pub use retry::{RetryPolicy, next_backoff, retry_async};
pub use shutdown::{cancel_on_signal, install_shutdown_handler};
