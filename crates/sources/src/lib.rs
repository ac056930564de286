//! Row sources for the relay.
//!
//! - [`PostgresRowPoller`] reads the append-only table over a shared
//!   [`PgHandle`], which reconnects after the server drops the connection
//! - [`MemRowPoller`] is an in-memory table with the same ordering contract

mod conn_utils;
pub mod mem;
pub mod postgres;

pub use common::RetryPolicy;
pub use conn_utils::{PgHandle, connect_postgres, connect_postgres_with};
pub use mem::MemRowPoller;
pub use postgres::PostgresRowPoller;
