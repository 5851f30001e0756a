//! Lazily connected handle to the document store
//!
//! A [`ConnectionHandle`] owns the single outbound connection used by every
//! request handler. The first `acquire()` starts a connect *episode*; callers
//! arriving while it is in flight join the same shared future instead of
//! dialing again. A successful episode caches the connection until
//! [`ConnectionHandle::invalidate`] is called. A failed episode records the
//! cause and leaves the handle ready for the next caller to retry.
//!
//! ```text
//!   Unconnected ──acquire──▶ Connecting ──ok──▶ Connected
//!        ▲                      │                  │
//!        │                      └──err──▶ Failed   │
//!        │                                  │      │
//!        └───────────── invalidate ─────────┴──────┘
//!   (Failed also goes straight back to Connecting on the next acquire)
//! ```

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::types::{ConnectionError, SpendbookError};

/// Physical connect primitive supplied by a persistence driver
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    /// Open and verify one connection. The handle bounds this call with
    /// [`ConnectionConfig::connect_timeout`].
    async fn connect(&self, config: &ConnectionConfig) -> Result<Self::Connection, ConnectionError>;
}

/// Observable lifecycle state of a [`ConnectionHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HandleState {
    Unconnected,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleState::Unconnected => write!(f, "unconnected"),
            HandleState::Connecting => write!(f, "connecting"),
            HandleState::Connected => write!(f, "connected"),
            HandleState::Failed => write!(f, "failed"),
        }
    }
}

type Outcome<T> = Result<Arc<T>, ConnectionError>;
type Attempt<T> = Shared<BoxFuture<'static, Outcome<T>>>;

/// The active connection and the pending attempt live in separate variants,
/// so they can never both be populated.
enum Slot<T> {
    Unconnected,
    Connecting { episode: u64, attempt: Attempt<T> },
    Connected(Arc<T>),
    Failed,
}

struct Inner<T> {
    slot: Slot<T>,
    last_error: Option<ConnectionError>,
    episodes: u64,
}

/// Process-wide guard around one lazily established store connection.
///
/// Construct it once at startup and share it (usually through `Arc`); it
/// performs no I/O until the first [`acquire`](Self::acquire).
pub struct ConnectionHandle<C: Connector> {
    config: Arc<ConnectionConfig>,
    connector: Arc<C>,
    inner: Arc<Mutex<Inner<C::Connection>>>,
}

impl<C: Connector> ConnectionHandle<C> {
    /// Create an unconnected handle.
    ///
    /// Fails with [`SpendbookError::Config`] when the configuration can never
    /// produce a connection, which keeps misuse apart from [`ConnectionError`].
    pub fn new(config: ConnectionConfig, connector: C) -> Result<Self, SpendbookError> {
        config.validate().map_err(SpendbookError::Config)?;

        Ok(Self {
            config: Arc::new(config),
            connector: Arc::new(connector),
            inner: Arc::new(Mutex::new(Inner {
                slot: Slot::Unconnected,
                last_error: None,
                episodes: 0,
            })),
        })
    }

    /// Return the cached connection, connecting first if needed.
    ///
    /// Concurrent callers during a connect episode all await the same
    /// attempt and receive the same outcome. Waiters impose no timeout of
    /// their own; the attempt is bounded by the configured connect timeout.
    /// The attempt runs on its own task and settles the handle even if every
    /// waiter is dropped.
    pub async fn acquire(&self) -> Result<Arc<C::Connection>, ConnectionError> {
        let attempt = {
            let mut inner = self.lock();

            let joined = match &inner.slot {
                Slot::Connected(conn) => {
                    debug!("Using cached store connection");
                    return Ok(Arc::clone(conn));
                }
                Slot::Connecting { episode, attempt } => Some((*episode, attempt.clone())),
                Slot::Unconnected | Slot::Failed => None,
            };

            match joined {
                Some((episode, attempt)) => {
                    debug!(episode, "Joining in-flight store connection attempt");
                    attempt
                }
                None => {
                    inner.episodes += 1;
                    let episode = inner.episodes;
                    let attempt = self.start_attempt(episode);
                    inner.slot = Slot::Connecting {
                        episode,
                        attempt: attempt.clone(),
                    };
                    attempt
                }
            }
        };

        attempt.await
    }

    /// Drop the cached connection so the next `acquire()` reconnects.
    ///
    /// An episode that is currently connecting is left untouched.
    pub fn invalidate(&self) {
        let mut inner = self.lock();
        if let Slot::Connecting { episode, .. } = &inner.slot {
            debug!(episode = *episode, "Ignoring invalidate while connecting");
            return;
        }
        if !matches!(inner.slot, Slot::Unconnected) {
            info!("Store connection invalidated");
            inner.slot = Slot::Unconnected;
        }
    }

    /// Invalidate only if `conn` is still the cached connection.
    ///
    /// Handlers that saw `conn` break call this so a late report cannot
    /// discard a newer, healthy connection.
    pub fn invalidate_connection(&self, conn: &Arc<C::Connection>) {
        let mut inner = self.lock();
        let is_current = matches!(&inner.slot, Slot::Connected(active) if Arc::ptr_eq(active, conn));
        if is_current {
            warn!("Store connection reported broken, invalidating");
            inner.slot = Slot::Unconnected;
        }
    }

    /// Snapshot of the lifecycle state
    pub fn state(&self) -> HandleState {
        match self.lock().slot {
            Slot::Unconnected => HandleState::Unconnected,
            Slot::Connecting { .. } => HandleState::Connecting,
            Slot::Connected(_) => HandleState::Connected,
            Slot::Failed => HandleState::Failed,
        }
    }

    /// Cause of the most recent failed episode, cleared on success
    pub fn last_error(&self) -> Option<ConnectionError> {
        self.lock().last_error.clone()
    }

    /// Number of connect episodes started so far
    pub fn episodes(&self) -> u64 {
        self.lock().episodes
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner<C::Connection>> {
        lock_inner(&self.inner)
    }

    /// Spawn the physical connect for `episode`.
    ///
    /// The spawned task commits the outcome before publishing it, so waiters
    /// always observe the settled state once their `acquire()` returns.
    fn start_attempt(&self, episode: u64) -> Attempt<C::Connection> {
        let connector = Arc::clone(&self.connector);
        let config = Arc::clone(&self.config);
        let inner = Arc::clone(&self.inner);
        let bound = config.connect_timeout();

        info!(episode, timeout_ms = bound.as_millis() as u64, "Connecting to store");

        let task = tokio::spawn(async move {
            let outcome = match tokio::time::timeout(bound, connector.connect(&config)).await {
                Ok(Ok(conn)) => Ok(Arc::new(conn)),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(ConnectionError::Timeout {
                    after_ms: bound.as_millis() as u64,
                }),
            };
            settle(&inner, episode, &outcome);
            outcome
        });

        async move { task.await.unwrap_or_else(|e| Err(aborted(e))) }
            .boxed()
            .shared()
    }
}

fn lock_inner<T>(inner: &Mutex<Inner<T>>) -> MutexGuard<'_, Inner<T>> {
    // Critical sections only swap enum variants, so a poisoned lock still
    // holds a consistent state.
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn aborted(err: JoinError) -> ConnectionError {
    ConnectionError::Unavailable(format!("connect task ended abnormally: {err}"))
}

/// Commit an episode's outcome if that episode is still the current one
fn settle<T>(inner: &Mutex<Inner<T>>, episode: u64, outcome: &Outcome<T>) {
    let mut inner = lock_inner(inner);

    let current = matches!(&inner.slot, Slot::Connecting { episode: e, .. } if *e == episode);
    if !current {
        return;
    }

    match outcome {
        Ok(conn) => {
            info!(episode, "Store connection established");
            inner.slot = Slot::Connected(Arc::clone(conn));
            inner.last_error = None;
        }
        Err(e) => {
            warn!(episode, error = %e, "Store connection attempt failed");
            inner.slot = Slot::Failed;
            inner.last_error = Some(e.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AddressFamily;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingConnector {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        type Connection = usize;

        async fn connect(&self, _config: &ConnectionConfig) -> Result<usize, ConnectionError> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            uri: "mongodb://localhost:27017".into(),
            db_name: "spendbook-test".into(),
            pool_size_max: 10,
            server_selection_timeout_ms: 100,
            socket_timeout_ms: 1000,
            address_family: AddressFamily::Any,
        }
    }

    #[tokio::test]
    async fn test_new_handle_does_not_connect() {
        let handle = ConnectionHandle::new(
            config(),
            CountingConnector {
                calls: AtomicUsize::new(0),
            },
        )
        .unwrap();

        assert_eq!(handle.state(), HandleState::Unconnected);
        assert_eq!(handle.episodes(), 0);
        assert!(handle.last_error().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_connection_ignores_stale_handle() {
        let handle = ConnectionHandle::new(
            config(),
            CountingConnector {
                calls: AtomicUsize::new(0),
            },
        )
        .unwrap();

        let first = handle.acquire().await.unwrap();
        handle.invalidate();
        let second = handle.acquire().await.unwrap();
        assert_eq!((*first, *second), (1, 2));

        // A late report about the first connection must not drop the second
        handle.invalidate_connection(&first);
        assert_eq!(handle.state(), HandleState::Connected);

        handle.invalidate_connection(&second);
        assert_eq!(handle.state(), HandleState::Unconnected);
    }

    #[test]
    fn test_empty_uri_is_config_error() {
        let mut bad = config();
        bad.uri = String::new();

        let result = ConnectionHandle::new(
            bad,
            CountingConnector {
                calls: AtomicUsize::new(0),
            },
        );
        assert!(matches!(result, Err(SpendbookError::Config(_))));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(HandleState::Connecting.to_string(), "connecting");
        assert_eq!(
            serde_json::to_string(&HandleState::Failed).unwrap(),
            "\"failed\""
        );
    }
}
