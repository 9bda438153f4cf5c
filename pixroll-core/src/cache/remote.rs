use std::fmt;
use std::time::Duration;

use redis::{AsyncCommands, aio::MultiplexedConnection};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection parameters for the external cache.
#[derive(Debug, Clone)]
pub struct RemoteCacheConfig {
    pub url: String,
    /// Bound on every connect and every individual operation.
    pub op_timeout: Duration,
    /// Base reconnect delay, doubled per consecutive failure up to a cap.
    pub retry_interval: Duration,
    /// Consecutive failures after which the adapter stops retrying and stays
    /// unhealthy until a manual reset.
    pub max_retries: u32,
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/".to_string(),
            op_timeout: Duration::from_secs(2),
            retry_interval: Duration::from_secs(1),
            max_retries: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Observable snapshot of the adapter, surfaced by the health endpoint.
#[derive(Debug, Clone, Copy)]
pub struct RemoteCacheStatus {
    pub state: ConnectionState,
    pub consecutive_failures: u32,
    pub retry_scheduled: bool,
}

struct Inner {
    conn: Option<MultiplexedConnection>,
    state: ConnectionState,
    consecutive_failures: u32,
    next_retry_at: Option<Instant>,
}

/// Adapter around a remote key-value cache with expiring entries.
///
/// Owns the connection lifecycle as an explicit state machine:
/// `Disconnected -> Connecting -> Connected -> (error) -> Disconnected`.
/// Reconnects are scheduled with a capped-exponential delay and driven by
/// [`RemoteCache::tick`] from the maintenance timer, never by callers.
/// Operations on a non-connected adapter short-circuit as a miss/no-op so a
/// down cache can never stall a request.
pub struct RemoteCache {
    config: RemoteCacheConfig,
    inner: Mutex<Inner>,
}

impl fmt::Debug for RemoteCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCache")
            .field("url", &self.config.url)
            .finish_non_exhaustive()
    }
}

impl RemoteCache {
    pub fn new(config: RemoteCacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                conn: None,
                state: ConnectionState::Disconnected,
                consecutive_failures: 0,
                next_retry_at: Some(Instant::now()),
            }),
        }
    }

    /// Attempt a connection now, ahead of the retry schedule. Refused once
    /// the retry budget is exhausted; only [`RemoteCache::reset`] restores it.
    pub async fn connect(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.try_connect(&mut inner).await
    }

    /// Drive the reconnect schedule. Called on a fixed interval by the
    /// maintenance task; a no-op unless a retry is due.
    pub async fn tick(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ConnectionState::Connected {
            return;
        }
        let due = inner
            .next_retry_at
            .is_some_and(|at| Instant::now() >= at);
        if due {
            self.try_connect(&mut inner).await;
        }
    }

    /// Clear failure bookkeeping and attempt to reconnect. This is the only
    /// way out of the permanently-unhealthy state.
    pub async fn reset(&self) -> bool {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        inner.next_retry_at = Some(Instant::now());
        self.try_connect(&mut inner).await
    }

    pub async fn healthy(&self) -> bool {
        self.inner.lock().await.state == ConnectionState::Connected
    }

    pub async fn status(&self) -> RemoteCacheStatus {
        let inner = self.inner.lock().await;
        RemoteCacheStatus {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            retry_scheduled: inner.next_retry_at.is_some(),
        }
    }

    /// Fetch and deserialize a value. A non-connected adapter or any runtime
    /// error resolves to `None`; errors additionally demote the connection.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.connected_handle().await?;

        let result = tokio::time::timeout(self.config.op_timeout, async {
            conn.get::<_, Option<String>>(key).await
        })
        .await;

        match flatten_op(result) {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!("remote cache hit: {key}");
                    Some(value)
                }
                Err(err) => {
                    // Unreadable payloads (legacy field names, foreign
                    // writers) are treated as a miss, not a fault.
                    debug!("remote cache entry for {key} failed to deserialize: {err}");
                    None
                }
            },
            Ok(None) => {
                debug!("remote cache miss: {key}");
                None
            }
            Err(err) => {
                self.record_failure("GET", &err).await;
                None
            }
        }
    }

    /// Store a value with a TTL. Returns whether the write reached the
    /// remote store.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let Some(mut conn) = self.connected_handle().await else {
            return false;
        };

        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(err) => {
                warn!("failed to serialize cache entry for {key}: {err}");
                return false;
            }
        };

        let result = tokio::time::timeout(self.config.op_timeout, async {
            conn.set_ex::<_, _, ()>(key, json, ttl.as_secs().max(1)).await
        })
        .await;

        match flatten_op(result) {
            Ok(()) => true,
            Err(err) => {
                self.record_failure("SETEX", &err).await;
                false
            }
        }
    }

    /// Delete a key. Returns whether an entry was removed.
    pub async fn del(&self, key: &str) -> bool {
        let Some(mut conn) = self.connected_handle().await else {
            return false;
        };

        let result = tokio::time::timeout(self.config.op_timeout, async {
            conn.del::<_, i64>(key).await
        })
        .await;

        match flatten_op(result) {
            Ok(removed) => removed > 0,
            Err(err) => {
                self.record_failure("DEL", &err).await;
                false
            }
        }
    }

    /// Clone the multiplexed connection when connected; the lock is released
    /// before any network IO happens.
    async fn connected_handle(&self) -> Option<MultiplexedConnection> {
        let inner = self.inner.lock().await;
        if inner.state != ConnectionState::Connected {
            debug!("remote cache {}; treating operation as a miss", inner.state);
            return None;
        }
        inner.conn.clone()
    }

    async fn try_connect(&self, inner: &mut Inner) -> bool {
        if inner.next_retry_at.is_none() && inner.consecutive_failures >= self.config.max_retries {
            return false;
        }

        inner.state = ConnectionState::Connecting;
        debug!("connecting to external cache at {}", self.config.url);

        let attempt = async {
            let client = redis::Client::open(self.config.url.as_str())
                .map_err(|err| err.to_string())?;
            client
                .get_multiplexed_async_connection()
                .await
                .map_err(|err| err.to_string())
        };

        match tokio::time::timeout(self.config.op_timeout, attempt).await {
            Ok(Ok(conn)) => {
                info!("connected to external cache at {}", self.config.url);
                inner.conn = Some(conn);
                inner.state = ConnectionState::Connected;
                inner.consecutive_failures = 0;
                inner.next_retry_at = None;
                true
            }
            Ok(Err(err)) => {
                self.note_failure(inner, "connect", &err);
                false
            }
            Err(_) => {
                self.note_failure(inner, "connect", "timed out");
                false
            }
        }
    }

    async fn record_failure(&self, op: &str, err: &str) {
        let mut inner = self.inner.lock().await;
        self.note_failure(&mut inner, op, err);
    }

    fn note_failure(&self, inner: &mut Inner, op: &str, err: impl fmt::Display) {
        inner.conn = None;
        inner.state = ConnectionState::Disconnected;
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        if inner.consecutive_failures >= self.config.max_retries {
            inner.next_retry_at = None;
            warn!(
                "external cache {op} failed ({err}); retry limit of {} reached, \
                 staying unhealthy until reset",
                self.config.max_retries
            );
        } else {
            let delay = backoff_delay(self.config.retry_interval, inner.consecutive_failures);
            inner.next_retry_at = Some(Instant::now() + delay);
            warn!(
                "external cache {op} failed ({err}); retry {}/{} in {delay:?}",
                inner.consecutive_failures, self.config.max_retries
            );
        }
    }
}

/// Capped-exponential reconnect delay: base * 2^(failures - 1), capped at
/// 64x the base.
fn backoff_delay(base: Duration, consecutive_failures: u32) -> Duration {
    let exponent = consecutive_failures.saturating_sub(1).min(6);
    base.saturating_mul(1u32 << exponent)
}

fn flatten_op<T>(
    result: Result<redis::RedisResult<T>, tokio::time::error::Elapsed>,
) -> Result<T, String> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(_) => Err("operation timed out".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_config(max_retries: u32) -> RemoteCacheConfig {
        RemoteCacheConfig {
            // Nothing listens on port 1; connects fail fast with ECONNREFUSED.
            url: "redis://127.0.0.1:1/".to_string(),
            op_timeout: Duration::from_millis(500),
            retry_interval: Duration::from_millis(100),
            max_retries,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 4), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, 7), Duration::from_secs(64));
        assert_eq!(backoff_delay(base, 40), Duration::from_secs(64));
    }

    #[tokio::test]
    async fn operations_short_circuit_while_disconnected() {
        let cache = RemoteCache::new(unreachable_config(3));

        // No connect has happened; every call must resolve immediately as a
        // miss/no-op without touching the network.
        let got: Option<String> = cache.get("k").await;
        assert!(got.is_none());
        assert!(!cache.set("k", &"v".to_string(), Duration::from_secs(10)).await);
        assert!(!cache.del("k").await);

        let status = cache.status().await;
        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn failed_connects_count_up_and_then_stop_retrying() {
        let cache = RemoteCache::new(unreachable_config(2));

        assert!(!cache.connect().await);
        let status = cache.status().await;
        assert_eq!(status.consecutive_failures, 1);
        assert!(status.retry_scheduled);

        assert!(!cache.connect().await);
        let status = cache.status().await;
        assert_eq!(status.consecutive_failures, 2);
        // Retry budget exhausted: permanently unhealthy, nothing scheduled.
        assert!(!status.retry_scheduled);
        assert!(!cache.healthy().await);

        // A further connect attempt is refused outright.
        assert!(!cache.connect().await);
        assert_eq!(cache.status().await.consecutive_failures, 2);
    }

    #[tokio::test]
    async fn reset_clears_the_exhausted_state() {
        let cache = RemoteCache::new(unreachable_config(1));

        assert!(!cache.connect().await);
        assert!(!cache.status().await.retry_scheduled);

        // reset() re-attempts immediately; the endpoint is still down, so the
        // counter restarts at one rather than staying pinned at the cap.
        assert!(!cache.reset().await);
        assert_eq!(cache.status().await.consecutive_failures, 1);
    }

    #[tokio::test]
    async fn tick_respects_the_retry_schedule() {
        let cache = RemoteCache::new(unreachable_config(5));

        assert!(!cache.connect().await);
        let after_first = cache.status().await.consecutive_failures;
        assert_eq!(after_first, 1);

        // The next retry is ~100ms out; an immediate tick must not attempt.
        cache.tick().await;
        assert_eq!(cache.status().await.consecutive_failures, 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        cache.tick().await;
        assert_eq!(cache.status().await.consecutive_failures, 2);
    }
}
