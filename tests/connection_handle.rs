//! Connection handle integration tests
//!
//! Drives `ConnectionHandle` with scripted connectors under paused tokio time:
//! - One physical attempt per episode, shared by every concurrent caller
//! - Cached reuse once connected
//! - Recovery after a failed episode
//! - Time-bounded attempts
//! - Invalidation and cancellation
//! - Episodes that settle with no caller waiting

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

use spendbook::config::AddressFamily;
use spendbook::{ConnectionConfig, ConnectionError, ConnectionHandle, Connector, HandleState};

// =============================================================================
// Scripted connector
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum Step {
    Succeed,
    /// Rejected credentials
    Refuse,
    /// Never resolves
    Hang,
}

#[derive(Debug, PartialEq, Eq)]
struct FakeConn {
    id: usize,
}

/// Plays `steps` in order, one per connect call; the last step repeats.
struct ScriptedConnector {
    calls: Arc<AtomicUsize>,
    delay: Duration,
    steps: Vec<Step>,
}

impl ScriptedConnector {
    fn new(delay_ms: u64, steps: &[Step]) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = Self {
            calls: Arc::clone(&calls),
            delay: Duration::from_millis(delay_ms),
            steps: steps.to_vec(),
        };
        (connector, calls)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Connection = FakeConn;

    async fn connect(&self, _config: &ConnectionConfig) -> Result<FakeConn, ConnectionError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .get(n)
            .or(self.steps.last())
            .copied()
            .unwrap_or(Step::Succeed);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match step {
            Step::Succeed => Ok(FakeConn { id: n + 1 }),
            Step::Refuse => Err(ConnectionError::Refused("authentication failed".into())),
            Step::Hang => futures::future::pending().await,
        }
    }
}

fn config(timeout_ms: u64) -> ConnectionConfig {
    ConnectionConfig {
        uri: "mongodb://127.0.0.1:27017".into(),
        db_name: "spendbook-test".into(),
        pool_size_max: 10,
        server_selection_timeout_ms: timeout_ms,
        socket_timeout_ms: 1000,
        address_family: AddressFamily::Any,
    }
}

fn handle(
    timeout_ms: u64,
    delay_ms: u64,
    steps: &[Step],
) -> (ConnectionHandle<ScriptedConnector>, Arc<AtomicUsize>) {
    let (connector, calls) = ScriptedConnector::new(delay_ms, steps);
    (ConnectionHandle::new(config(timeout_ms), connector).unwrap(), calls)
}

/// Let spawned tasks run until the handle has an attempt in flight
async fn wait_for_connecting<C: Connector>(handle: &ConnectionHandle<C>) {
    while handle.state() != HandleState::Connecting {
        tokio::task::yield_now().await;
    }
}

// =============================================================================
// Single attempt per episode
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_attempt() {
    let (handle, calls) = handle(1000, 20, &[Step::Succeed]);

    let results = join_all((0..10).map(|_| handle.acquire())).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let first = results[0].as_ref().unwrap();
    for result in &results {
        let conn = result.as_ref().unwrap();
        assert!(Arc::ptr_eq(first, conn), "every caller gets the same connection");
    }
    assert_eq!(handle.state(), HandleState::Connected);
    assert_eq!(handle.episodes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_callers_share_one_failure() {
    let (handle, calls) = handle(1000, 20, &[Step::Refuse]);

    let results = join_all((0..4).map(|_| handle.acquire())).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(
            result.unwrap_err(),
            ConnectionError::Refused("authentication failed".into())
        );
    }
    assert_eq!(handle.state(), HandleState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_callers_share_one_attempt() {
    let (handle, calls) = handle(1000, 50, &[Step::Succeed]);
    let handle = Arc::new(handle);

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let handle = Arc::clone(&handle);
            tokio::spawn(async move { handle.acquire().await })
        })
        .collect();

    for task in join_all(tasks).await {
        let conn = task.unwrap().unwrap();
        assert_eq!(conn.id, 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Reuse and recovery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_connected_handle_reuses_connection() {
    let (handle, calls) = handle(1000, 0, &[Step::Succeed]);

    let first = handle.acquire().await.unwrap();
    for _ in 0..5 {
        let again = handle.acquire().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.episodes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_recovers_after_failed_attempt() {
    let (handle, calls) = handle(1000, 0, &[Step::Refuse, Step::Succeed]);

    let err = assert_err!(handle.acquire().await);
    assert!(matches!(err, ConnectionError::Refused(_)));
    assert_eq!(handle.state(), HandleState::Failed);
    assert_eq!(handle.last_error(), Some(err));

    let conn = assert_ok!(handle.acquire().await);
    assert_eq!(conn.id, 2);
    assert_eq!(handle.state(), HandleState::Connected);
    assert!(handle.last_error().is_none());

    let cached = handle.acquire().await.unwrap();
    assert!(Arc::ptr_eq(&conn, &cached));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Time bound
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_hanging_connect_times_out() {
    let (handle, _calls) = handle(50, 0, &[Step::Hang]);

    let start = Instant::now();
    let err = handle.acquire().await.unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err, ConnectionError::Timeout { after_ms: 50 });
    assert!(elapsed >= Duration::from_millis(50), "elapsed {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(100), "elapsed {:?}", elapsed);
    assert_eq!(handle.state(), HandleState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_slow_refusal_reports_timeout_to_every_caller() {
    // Store answers after 500ms with an auth error; the bound is 100ms
    let (handle, calls) = handle(100, 500, &[Step::Refuse]);

    let start = Instant::now();
    let results = join_all((0..5).map(|_| handle.acquire())).await;

    assert!(start.elapsed() < Duration::from_millis(500));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap_err(), ConnectionError::Timeout { after_ms: 100 });
    }
    assert_eq!(handle.state(), HandleState::Failed);
    assert_eq!(
        handle.last_error(),
        Some(ConnectionError::Timeout { after_ms: 100 })
    );

    // The failed episode is not cached; the next caller dials again
    assert_err!(handle.acquire().await);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(handle.episodes(), 2);
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_one_new_attempt() {
    let (handle, calls) = handle(1000, 10, &[Step::Succeed]);

    let first = handle.acquire().await.unwrap();
    handle.invalidate();
    assert_eq!(handle.state(), HandleState::Unconnected);

    let results = join_all((0..3).map(|_| handle.acquire())).await;
    for result in results {
        let conn = result.unwrap();
        assert_eq!(conn.id, 2);
        assert!(!Arc::ptr_eq(&first, &conn));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_while_connecting_keeps_episode() {
    let (handle, calls) = handle(1000, 100, &[Step::Succeed]);
    let handle = Arc::new(handle);

    let waiter = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.acquire().await })
    };
    wait_for_connecting(&handle).await;

    handle.invalidate();
    assert_eq!(handle.state(), HandleState::Connecting);

    let conn = waiter.await.unwrap().unwrap();
    assert_eq!(conn.id, 1);
    assert_eq!(handle.state(), HandleState::Connected);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_clears_failed_state() {
    let (handle, _calls) = handle(1000, 0, &[Step::Refuse]);

    assert_err!(handle.acquire().await);
    handle.invalidate();

    assert_eq!(handle.state(), HandleState::Unconnected);
    // The cause stays visible until a later episode succeeds
    assert!(handle.last_error().is_some());
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancelled_waiter_does_not_cancel_episode() {
    let (handle, calls) = handle(1000, 100, &[Step::Succeed]);
    let handle = Arc::new(handle);

    let starter = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.acquire().await })
    };
    wait_for_connecting(&handle).await;

    let survivor = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.acquire().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    starter.abort();
    assert!(starter.await.unwrap_err().is_cancelled());

    let conn = survivor.await.unwrap().unwrap();
    assert_eq!(conn.id, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.state(), HandleState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_attempt_settles_connected() {
    let (handle, calls) = handle(100, 50, &[Step::Succeed]);

    // Caller-side timeout shorter than the connect
    let gave_up = tokio::time::timeout(Duration::from_millis(5), handle.acquire()).await;
    assert!(gave_up.is_err());
    assert_eq!(handle.state(), HandleState::Connecting);

    // Nobody is waiting, yet the episode still completes
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(handle.state(), HandleState::Connected);

    let start = Instant::now();
    let conn = handle.acquire().await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(conn.id, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.episodes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_attempt_settles_failed() {
    let (handle, calls) = handle(1000, 50, &[Step::Refuse, Step::Succeed]);

    let gave_up = tokio::time::timeout(Duration::from_millis(5), handle.acquire()).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(handle.state(), HandleState::Failed);
    assert!(matches!(handle.last_error(), Some(ConnectionError::Refused(_))));

    // The failure stays with its episode; the next caller dials again
    let conn = handle.acquire().await.unwrap();
    assert_eq!(conn.id, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(handle.episodes(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_late_caller_joins_abandoned_attempt_in_flight() {
    let (handle, calls) = handle(1000, 100, &[Step::Succeed]);

    let gave_up = tokio::time::timeout(Duration::from_millis(10), handle.acquire()).await;
    assert!(gave_up.is_err());

    // Still in flight: the next caller waits for the same episode
    let start = Instant::now();
    let conn = handle.acquire().await.unwrap();
    let waited = start.elapsed();
    assert!(waited >= Duration::from_millis(80), "waited {:?}", waited);
    assert!(waited <= Duration::from_millis(100), "waited {:?}", waited);
    assert_eq!(conn.id, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
