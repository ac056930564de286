use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use common::{RetryPolicy, dsn_host, redact_dsn, retry_async};
use parking_lot::RwLock;
use relay_core::{StoreError, StoreResult};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info, warn};

/// Postgres connection shared by the row poller and the checkpoint store.
///
/// Cloning is cheap and every clone sees the same connection. When the
/// server drops the connection, the next [`PgHandle::client`] call opens
/// a new one under the handle's [`RetryPolicy`]. After [`PgHandle::close`]
/// every call fails with `StoreError::Connect`.
#[derive(Clone)]
pub struct PgHandle {
    inner: Arc<Shared>,
}

struct Shared {
    dsn: String,
    host: String,
    connect_timeout: Duration,
    retry: RetryPolicy,
    // None once closed
    live: RwLock<Option<Live>>,
    reconnect: Mutex<()>,
    reconnects: AtomicU64,
}

struct Live {
    client: Arc<Client>,
    conn_task: JoinHandle<()>,
}

impl Drop for Live {
    fn drop(&mut self) {
        self.conn_task.abort();
    }
}

impl PgHandle {
    /// Current client, reconnecting first if the connection has gone away.
    pub async fn client(&self) -> StoreResult<Arc<Client>> {
        if let Some(client) = self.open_client()? {
            return Ok(client);
        }

        let _guard = self.inner.reconnect.lock().await;
        // another caller may have reconnected while we waited
        if let Some(client) = self.open_client()? {
            return Ok(client);
        }

        let inner = &*self.inner;
        warn!(host = %inner.host, "postgres connection lost; reconnecting");
        let live = retry_async(
            |attempt| {
                debug!(host = %inner.host, attempt, "postgres reconnect attempt");
                open(&inner.dsn, &inner.host, inner.connect_timeout)
            },
            retryable_connect,
            &inner.retry,
            "postgres_reconnect",
        )
        .await?;

        let client = Arc::clone(&live.client);
        {
            let mut slot = inner.live.write();
            if slot.is_none() {
                return Err(closed());
            }
            // drops the dead connection's task
            *slot = Some(live);
        }
        let n = inner.reconnects.fetch_add(1, Ordering::Relaxed) + 1;
        info!(host = %inner.host, reconnects = n, "postgres reconnected");
        Ok(client)
    }

    fn open_client(&self) -> StoreResult<Option<Arc<Client>>> {
        match self.inner.live.read().as_ref() {
            None => Err(closed()),
            Some(live) if live.client.is_closed() => Ok(None),
            Some(live) => Ok(Some(Arc::clone(&live.client))),
        }
    }

    pub fn host(&self) -> &str {
        &self.inner.host
    }

    /// True when closed, or when the server side has gone away and the
    /// next `client()` call will reconnect.
    pub fn is_closed(&self) -> bool {
        self.inner
            .live
            .read()
            .as_ref()
            .is_none_or(|live| live.client.is_closed())
    }

    /// Successful reconnects since the handle was opened.
    pub fn reconnects(&self) -> u64 {
        self.inner.reconnects.load(Ordering::Relaxed)
    }

    /// Release the connection for every clone. In-flight queries fail
    /// with a closed-connection error.
    pub fn close(&self) {
        if self.inner.live.write().take().is_some() {
            info!(host = %self.inner.host, "postgres connection closed");
        }
    }
}

fn closed() -> StoreError {
    StoreError::Connect {
        details: "postgres handle closed".into(),
    }
}

/// Lost or unreachable servers are worth another attempt; rejected
/// credentials and missing databases are not.
fn retryable_connect(e: &StoreError) -> bool {
    matches!(e, StoreError::Connect { .. } | StoreError::Timeout { .. })
}

fn is_rejection(e: &tokio_postgres::Error) -> bool {
    e.code().is_some_and(|code| {
        code.code().starts_with("28") || *code == SqlState::INVALID_CATALOG_NAME
    })
}

async fn open(dsn: &str, host: &str, connect_timeout: Duration) -> StoreResult<Live> {
    let t0 = Instant::now();

    let (client, conn) = match timeout(
        connect_timeout,
        tokio_postgres::connect(dsn, NoTls),
    )
    .await
    {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            let msg = e.to_string();
            error!(host = %host, error = %msg, "postgres connect failed");
            if is_rejection(&e) {
                error!("check the credentials and database in DATABASE_URL");
                return Err(StoreError::Query {
                    details: format!("postgres rejected connection: {msg}").into(),
                });
            }
            return Err(StoreError::Connect {
                details: format!("postgres connect: {msg}").into(),
            });
        }
        Err(_) => {
            return Err(StoreError::Timeout {
                action: "postgres_connect".into(),
            });
        }
    };

    let task_host = host.to_string();
    let conn_task = tokio::spawn(async move {
        if let Err(e) = conn.await {
            warn!(host = %task_host, error = %e, "postgres connection error");
        }
    });

    info!(
        host = %host,
        ms = t0.elapsed().as_millis() as u64,
        "connected to postgres"
    );

    Ok(Live {
        client: Arc::new(client),
        conn_task,
    })
}

/// Connect with a hard timeout and no retries, so a bad DSN fails startup
/// quickly. Later reconnects follow [`RetryPolicy::default`].
pub async fn connect_postgres(
    dsn: &str,
    connect_timeout: Duration,
) -> StoreResult<PgHandle> {
    connect_postgres_with(dsn, connect_timeout, RetryPolicy::default()).await
}

/// [`connect_postgres`] with an explicit reconnect policy.
pub async fn connect_postgres_with(
    dsn: &str,
    connect_timeout: Duration,
    retry: RetryPolicy,
) -> StoreResult<PgHandle> {
    let host = dsn_host(dsn);
    debug!(dsn = %redact_dsn(dsn), "connecting to postgres");

    let live = open(dsn, &host, connect_timeout).await?;

    Ok(PgHandle {
        inner: Arc::new(Shared {
            dsn: dsn.to_string(),
            host,
            connect_timeout,
            retry,
            live: RwLock::new(Some(live)),
            reconnect: Mutex::new(()),
            reconnects: AtomicU64::new(0),
        }),
    })
}
