//! The browser connection pool: idle/active accounting, a FIFO wait queue,
//! idle eviction, and a dispatcher that hands sessions to waiters (§4.4).

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, timeout};

use crate::session::{Session, SessionError};

/// Tuning parameters for a [`Pool`]; immutable once the pool is built (§3).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub browser_path: PathBuf,
    pub base_port: u16,
    pub min_sessions: usize,
    pub max_sessions: usize,
    pub idle_timeout: Duration,
    pub acquire_timeout: Duration,
}

/// How long a single session launch (pre-warm, growth, or `ensure_min`) is
/// allowed to take before it's treated as a failure.
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Dispatcher poll period (§4.4.3).
const DISPATCH_POLL: Duration = Duration::from_millis(100);

/// Bounded retry count for `ensure_min` (open question #2 in DESIGN.md).
const ENSURE_MIN_MAX_ATTEMPTS: u32 = 5;

/// Inter-attempt pause for both pre-warm retries and `ensure_min`.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

type LaunchFuture = Pin<Box<dyn Future<Output = Result<Session, SessionError>> + Send>>;
type Launcher = Arc<dyn Fn(u16) -> LaunchFuture + Send + Sync>;

/// Errors from acquiring, releasing, or launching into a [`Pool`].
#[derive(Debug)]
pub enum PoolError {
    /// The pool has begun or completed shutdown.
    Closed,
    /// `acquire` waited longer than `acquire_timeout`.
    AcquireTimeout,
    /// A session launch (pre-warm, growth, or dispatch) timed out.
    LaunchTimeout,
    /// A session launch failed with a concrete error.
    Launch(SessionError),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "pool is shut down"),
            Self::AcquireTimeout => write!(f, "acquire timed out waiting for a session"),
            Self::LaunchTimeout => write!(f, "session launch timed out"),
            Self::Launch(e) => write!(f, "session launch failed: {e}"),
        }
    }
}

impl std::error::Error for PoolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Launch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PoolError> for crate::error::AppError {
    fn from(e: PoolError) -> Self {
        use crate::error::ExitCode;
        match e {
            PoolError::Closed => Self::new(e.to_string(), ExitCode::GeneralError),
            PoolError::AcquireTimeout | PoolError::LaunchTimeout => {
                Self::new(e.to_string(), ExitCode::TimeoutError)
            }
            PoolError::Launch(session_err) => session_err.into(),
        }
    }
}

/// A session parked in the idle set, tagged with its last-release time.
struct PooledEntry {
    session: Session,
    last_used: Instant,
}

/// A single-use completion slot for a caller waiting for a session.
struct WaitTicket {
    tx: Mutex<Option<oneshot::Sender<Result<Session, PoolError>>>>,
}

impl WaitTicket {
    fn new() -> (Arc<Self>, oneshot::Receiver<Result<Session, PoolError>>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }
}

/// The pool core described in §4.4: idle set, wait queue, counters,
/// dispatcher, and idle-eviction ticker, all behind one `Arc` so background
/// tasks and callers can share ownership.
pub struct Pool {
    config: PoolConfig,
    launcher: Launcher,
    idle: Mutex<VecDeque<PooledEntry>>,
    wait_queue: Mutex<VecDeque<Arc<WaitTicket>>>,
    total: AtomicUsize,
    active: AtomicUsize,
    waiting: AtomicUsize,
    shutdown: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("total", &self.total.load(Ordering::Relaxed))
            .field("active", &self.active.load(Ordering::Relaxed))
            .field("waiting", &self.waiting.load(Ordering::Relaxed))
            .field("shutdown", &self.shutdown.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Build a pool with the real browser launcher (one subprocess per
    /// session, driven by [`Session::launch`]), pre-warming `min_sessions`
    /// synchronously before returning.
    pub async fn new(config: PoolConfig) -> Arc<Self> {
        let executable = config.browser_path.clone();
        let launcher: Launcher = Arc::new(move |port| {
            let executable = executable.clone();
            Box::pin(async move { Session::launch(&executable, port).await })
        });
        Self::with_launcher(config, launcher).await
    }

    /// Build a pool with an injected launcher — the seam integration tests
    /// use to substitute fake sessions for real browser subprocesses.
    pub async fn with_launcher(config: PoolConfig, launcher: Launcher) -> Arc<Self> {
        let min = config.min_sessions;
        let pool = Arc::new(Self {
            config,
            launcher,
            idle: Mutex::new(VecDeque::new()),
            wait_queue: Mutex::new(VecDeque::new()),
            total: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        });

        pool.prewarm(min).await;
        pool.spawn_background_tasks().await;
        pool
    }

    async fn spawn_background_tasks(self: &Arc<Self>) {
        let dispatcher = {
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.dispatcher_loop().await })
        };
        let evictor = {
            let pool = Arc::clone(self);
            tokio::spawn(async move { pool.eviction_loop().await })
        };
        let mut background = self.background.lock().await;
        background.push(dispatcher);
        background.push(evictor);
    }

    /// Current counts: `(total, active, waiting)`.
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.total.load(Ordering::Acquire),
            self.active.load(Ordering::Acquire),
            self.waiting.load(Ordering::Acquire),
        )
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn next_port(&self, index: usize) -> u16 {
        self.config
            .base_port
            .saturating_add(u16::try_from(index).unwrap_or(u16::MAX))
    }

    async fn launch_at(&self, index: usize) -> Result<Session, PoolError> {
        let port = self.next_port(index);
        match timeout(LAUNCH_TIMEOUT, (self.launcher)(port)).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(PoolError::Launch(e)),
            Err(_) => Err(PoolError::LaunchTimeout),
        }
    }

    async fn prewarm(&self, count: usize) {
        for i in 0..count {
            match self.launch_at(i).await {
                Ok(session) => {
                    self.total.fetch_add(1, Ordering::AcqRel);
                    self.idle.lock().await.push_back(PooledEntry {
                        session,
                        last_used: Instant::now(),
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, slot = i, "pre-warm session failed, skipping");
                }
            }
        }
    }

    /// Best-effort background top-up to `min_sessions`, used after a pool
    /// is constructed with zero pre-warm (the shared singleton's path).
    /// Each missing slot gets bounded retries with a 1s pause, logging and
    /// giving up rather than retrying indefinitely (open question #2).
    pub async fn ensure_min(&self) {
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            let total = self.total.load(Ordering::Acquire);
            if total >= self.config.min_sessions {
                return;
            }

            let mut last_err = None;
            let mut filled = false;
            for attempt in 1..=ENSURE_MIN_MAX_ATTEMPTS {
                match self.launch_at(total).await {
                    Ok(session) => {
                        self.total.fetch_add(1, Ordering::AcqRel);
                        self.idle.lock().await.push_back(PooledEntry {
                            session,
                            last_used: Instant::now(),
                        });
                        filled = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, attempt, "ensure_min attempt failed");
                        last_err = Some(e);
                        if attempt < ENSURE_MIN_MAX_ATTEMPTS {
                            tokio::time::sleep(RETRY_PAUSE).await;
                        }
                    }
                }
            }
            if !filled {
                tracing::warn!(error = ?last_err, "ensure_min exhausted retries, giving up");
                return;
            }
        }
    }

    async fn pop_idle_async(&self) -> Option<Session> {
        self.idle.lock().await.pop_front().map(|entry| entry.session)
    }

    /// Attempt to grow the pool by one session, bounded by `max_sessions`.
    /// Returns `Ok(None)` if the pool is already at capacity.
    async fn try_grow(&self) -> Result<Option<Session>, PoolError> {
        loop {
            let current = self.total.load(Ordering::Acquire);
            if current >= self.config.max_sessions {
                return Ok(None);
            }
            if self
                .total
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return match self.launch_at(current).await {
                    Ok(session) => Ok(Some(session)),
                    Err(e) => {
                        self.total.fetch_sub(1, Ordering::AcqRel);
                        Err(e)
                    }
                };
            }
        }
    }

    /// Acquire a session: idle fast path, then growth, then wait queue.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool has shut down,
    /// [`PoolError::AcquireTimeout`] if the configured timeout elapses
    /// while waiting, or a launch error from the growth path.
    pub async fn acquire(&self) -> Result<Session, PoolError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        if let Some(session) = self.pop_idle_async().await {
            self.active.fetch_add(1, Ordering::AcqRel);
            return Ok(session);
        }

        if let Some(session) = self.try_grow().await? {
            self.active.fetch_add(1, Ordering::AcqRel);
            return Ok(session);
        }

        self.wait_for_release().await
    }

    async fn wait_for_release(&self) -> Result<Session, PoolError> {
        let (ticket, mut rx) = WaitTicket::new();
        self.wait_queue.lock().await.push_back(Arc::clone(&ticket));
        self.waiting.fetch_add(1, Ordering::AcqRel);

        tokio::select! {
            res = &mut rx => {
                res.unwrap_or(Err(PoolError::Closed))
            }
            () = tokio::time::sleep(self.config.acquire_timeout) => {
                if self.try_take_ticket(&ticket).await {
                    let mut q = self.wait_queue.lock().await;
                    q.retain(|t| !Arc::ptr_eq(t, &ticket));
                    drop(q);
                    self.waiting.fetch_sub(1, Ordering::AcqRel);
                    Err(PoolError::AcquireTimeout)
                } else {
                    // Lost the race: a completion was already in flight.
                    rx.await.unwrap_or(Err(PoolError::Closed))
                }
            }
        }
    }

    /// Take ownership of a ticket's sender without completing it — used
    /// only by the acquire-timeout path to claim the "nobody else gets
    /// this ticket" race.
    async fn try_take_ticket(&self, ticket: &WaitTicket) -> bool {
        ticket.tx.lock().await.take().is_some()
    }

    /// Try to deliver `result` to `ticket`. On success the `waiting`
    /// counter is decremented exactly once. On failure (already consumed)
    /// the value is handed back so the caller can recover it.
    async fn complete_ticket(
        &self,
        ticket: &WaitTicket,
        result: Result<Session, PoolError>,
    ) -> Result<(), Result<Session, PoolError>> {
        let mut guard = ticket.tx.lock().await;
        match guard.take() {
            Some(tx) => {
                drop(guard);
                self.waiting.fetch_sub(1, Ordering::AcqRel);
                tx.send(result)
            }
            None => Err(result),
        }
    }

    /// Release a session back to the pool: hand it directly to the head
    /// of the wait queue if non-empty (the throughput-critical path),
    /// otherwise park it in the idle set.
    pub async fn release(&self, session: Session) {
        if self.shutdown.load(Ordering::Acquire) {
            self.active.fetch_sub(1, Ordering::AcqRel);
            session.close().await;
            return;
        }

        self.active.fetch_sub(1, Ordering::AcqRel);

        let mut session = session;
        let ticket = self.wait_queue.lock().await.pop_front();
        if let Some(ticket) = ticket {
            self.active.fetch_add(1, Ordering::AcqRel);
            match self.complete_ticket(&ticket, Ok(session)).await {
                Ok(()) => return,
                Err(Ok(returned)) => {
                    self.active.fetch_sub(1, Ordering::AcqRel);
                    session = returned;
                }
                Err(Err(_)) => unreachable!("release always hands off Ok(session)"),
            }
        }

        self.idle.lock().await.push_back(PooledEntry {
            session,
            last_used: Instant::now(),
        });
    }

    /// Drain the wait queue whenever a session can be supplied. Runs on a
    /// ~100ms poll so release-driven hand-offs and timer-driven eviction
    /// both make forward progress without starving waiters.
    async fn dispatcher_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(DISPATCH_POLL);
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            self.dispatch_once().await;
        }
    }

    async fn dispatch_once(&self) {
        loop {
            let ticket = match self.wait_queue.lock().await.pop_front() {
                Some(t) => t,
                None => return,
            };

            let obtained = match self.pop_idle_async().await {
                Some(session) => {
                    self.active.fetch_add(1, Ordering::AcqRel);
                    Some(Ok(session))
                }
                None => match self.try_grow().await {
                    Ok(Some(session)) => {
                        self.active.fetch_add(1, Ordering::AcqRel);
                        Some(Ok(session))
                    }
                    Ok(None) => None,
                    Err(e) => Some(Err(e)),
                },
            };

            match obtained {
                Some(Ok(session)) => match self.complete_ticket(&ticket, Ok(session)).await {
                    Ok(()) => {}
                    Err(Ok(returned)) => {
                        self.active.fetch_sub(1, Ordering::AcqRel);
                        self.idle.lock().await.push_back(PooledEntry {
                            session: returned,
                            last_used: Instant::now(),
                        });
                    }
                    Err(Err(_)) => unreachable!("dispatch always hands off Ok(session)"),
                },
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "dispatcher launch attempt failed, re-queuing waiter");
                    self.wait_queue.lock().await.push_front(ticket);
                    return;
                }
                None => {
                    self.wait_queue.lock().await.push_front(ticket);
                    return;
                }
            }
        }
    }

    /// Periodically evict idle sessions older than `idle_timeout`, down to
    /// (but never below) `min_sessions` (§4.4.4).
    async fn eviction_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.idle_timeout);
        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::Acquire) {
                return;
            }
            self.evict_idle().await;
        }
    }

    async fn evict_idle(&self) {
        let now = Instant::now();
        let mut to_close = Vec::new();
        {
            let mut idle = self.idle.lock().await;
            while self.total.load(Ordering::Acquire) > self.config.min_sessions {
                let stale = idle
                    .front()
                    .is_some_and(|entry| now.duration_since(entry.last_used) > self.config.idle_timeout);
                if !stale {
                    break;
                }
                let entry = idle.pop_front().expect("front just matched as stale");
                self.total.fetch_sub(1, Ordering::AcqRel);
                to_close.push(entry.session);
            }
        }
        for session in to_close {
            session.close().await;
        }
    }

    /// Idempotent shutdown: stops background tasks, fails every waiting
    /// ticket with [`PoolError::Closed`], and closes every idle session.
    /// Active (checked-out) sessions are closed on release, not here.
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        for handle in self.background.lock().await.drain(..) {
            handle.abort();
        }

        let tickets: Vec<_> = self.wait_queue.lock().await.drain(..).collect();
        for ticket in tickets {
            let _ = self.complete_ticket(&ticket, Err(PoolError::Closed)).await;
        }

        let idle_entries: Vec<_> = self.idle.lock().await.drain(..).collect();
        for entry in idle_entries {
            entry.session.close().await;
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::path::PathBuf;
    use std::process::Stdio;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::{Value, json};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;
    use tokio_tungstenite::tungstenite::Message;

    use super::*;
    use crate::cdp::{CdpConfig, CdpSession};
    use crate::chrome::ChromeError;

    async fn start_mock_cdp_server() -> (SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let (mut sink, mut source) = ws.split();
                    while let Some(Ok(msg)) = source.next().await {
                        if let Message::Text(text) = msg {
                            let cmd: Value = serde_json::from_str(&text).unwrap();
                            let response = json!({"id": cmd["id"], "result": {}});
                            if sink
                                .send(Message::Text(response.to_string().into()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                });
            }
        });
        (addr, handle)
    }

    /// A launcher that stands a `sleep` subprocess plus a mock CDP server in
    /// for a real browser, for exercising pool logic in isolation.
    fn fake_launcher() -> Launcher {
        Arc::new(|port| {
            Box::pin(async move {
                let (addr, _server) = start_mock_cdp_server().await;
                let child = tokio::process::Command::new("sleep")
                    .arg("100")
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()
                    .map_err(|e| {
                        SessionError::Chrome(ChromeError::LaunchFailed(e.to_string()))
                    })?;
                let cdp = CdpSession::connect(&format!("ws://{addr}"), CdpConfig::default())
                    .await
                    .map_err(SessionError::Cdp)?;
                Ok(Session::for_test(child, port, cdp))
            })
        })
    }

    fn base_config() -> PoolConfig {
        PoolConfig {
            browser_path: PathBuf::from("/nonexistent/chrome"),
            base_port: 20000,
            min_sessions: 0,
            max_sessions: 2,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn total_never_exceeds_max_sessions() {
        let pool = Pool::with_launcher(base_config(), fake_launcher()).await;

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let (total, active, _) = pool.counts();
        assert_eq!(total, 2);
        assert_eq!(active, 2);

        let pool_clone = Arc::clone(&pool);
        let pending = tokio::spawn(async move { pool_clone.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pool.counts().0, 2, "total must not exceed max_sessions");

        pool.release(a).await;
        let c = pending.await.unwrap().unwrap();
        pool.release(b).await;
        pool.release(c).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn queue_fairness_hands_off_in_fifo_order() {
        let mut config = base_config();
        config.acquire_timeout = Duration::from_secs(5);
        let pool = Pool::with_launcher(config, fake_launcher()).await;

        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();

        let (order_tx, mut order_rx) = tokio::sync::mpsc::unbounded_channel();

        let pool_c = Arc::clone(&pool);
        let tx_c = order_tx.clone();
        let c = tokio::spawn(async move {
            let session = pool_c.acquire().await.unwrap();
            tx_c.send('C').unwrap();
            session
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let pool_d = Arc::clone(&pool);
        let tx_d = order_tx.clone();
        let d = tokio::spawn(async move {
            let session = pool_d.acquire().await.unwrap();
            tx_d.send('D').unwrap();
            session
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        pool.release(a).await;

        let first = order_rx.recv().await.unwrap();
        assert_eq!(first, 'C', "release must hand off to the earliest waiter");

        let c_session = c.await.unwrap();
        pool.release(c_session).await;
        let second = order_rx.recv().await.unwrap();
        assert_eq!(second, 'D');

        let d_session = d.await.unwrap();
        pool.release(d_session).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn acquire_times_out_and_resets_waiting_counter() {
        let mut config = base_config();
        config.max_sessions = 1;
        config.acquire_timeout = Duration::from_millis(300);
        let pool = Pool::with_launcher(config, fake_launcher()).await;

        let held = pool.acquire().await.unwrap();
        let start = Instant::now();
        let result = pool.acquire().await;
        let elapsed = start.elapsed();

        assert!(matches!(result, Err(PoolError::AcquireTimeout)));
        assert!(elapsed >= Duration::from_millis(300));
        assert_eq!(pool.counts().2, 0, "waiting counter must reset after timeout");

        pool.release(held).await;
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn idle_sessions_are_evicted_down_to_min() {
        let mut config = base_config();
        config.min_sessions = 1;
        config.max_sessions = 3;
        config.idle_timeout = Duration::from_millis(200);
        let pool = Pool::with_launcher(config, fake_launcher()).await;

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        pool.release(a).await;
        pool.release(b).await;
        pool.release(c).await;
        assert_eq!(pool.counts().0, 3);

        tokio::time::sleep(Duration::from_millis(600)).await;

        assert_eq!(pool.counts().0, 1, "eviction must stop at min_sessions");
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_fails_in_flight_waiters_with_pool_closed() {
        let mut config = base_config();
        config.max_sessions = 1;
        config.acquire_timeout = Duration::from_secs(10);
        let pool = Pool::with_launcher(config, fake_launcher()).await;

        let held = pool.acquire().await.unwrap();
        let pool_clone = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { pool_clone.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve promptly after shutdown")
            .unwrap();
        assert!(matches!(result, Err(PoolError::Closed)));

        held.close().await;
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let pool = Pool::with_launcher(base_config(), fake_launcher()).await;
        pool.shutdown().await;
        pool.shutdown().await;
        assert!(pool.is_shutdown());
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));
    }
}
