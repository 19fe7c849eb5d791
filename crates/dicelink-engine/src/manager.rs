//! Per-endpoint connection lifecycle.
//!
//! One [`ConnectionManager`] owns everything stateful about serving one
//! endpoint: the single-flight connect guard, the state machine, the
//! correlation registry, the retry controller and the current session's
//! outbound channel. `serve` runs one connection cycle; `serve_with_retry`
//! supervises cycles under the backoff policy; `set_enable` and
//! `do_relogin` are the external control surface.
//!
//! Cancellation is layered: the *cycle* token (fresh per enable) tears down
//! retries, socket pumps and pending requests together; each connection
//! attempt gets a child *session* token so a forced relogin can drop just
//! the live socket and let the retry loop bring up a new one.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use dicelink_core::{
    ApiError, BoxedBotCore, ConnectionState, Endpoint, EngineError, ExitCode, StatusSink,
    TransportResult,
};

use crate::api::ApiClient;
use crate::correlation::CorrelationRegistry;
use crate::dispatch::{EventDispatcher, PlatformDriver};
use crate::retry::{RetryController, RetryOutcome, RetryPolicy, RetryState};

// =============================================================================
// Connector seam
// =============================================================================

/// A live duplex connection: raw frames out, raw frames in.
///
/// The inbound receiver closing means the transport dropped.
#[derive(Debug)]
pub struct Connection {
    /// Sender for outgoing raw frames.
    pub outbound: mpsc::Sender<Vec<u8>>,
    /// Receiver of incoming raw frames.
    pub inbound: mpsc::Receiver<Vec<u8>>,
    /// Human-readable peer description for logs.
    pub remote: String,
}

/// Establishes one duplex connection, in either direction.
///
/// Client-mode connectors dial out; server-mode connectors listen and wait
/// for the gateway to connect in. Either way `connect` resolves once the
/// transport is ready to carry frames, or fails with a transport error the
/// engine classifies as transient or fatal.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, cancel: CancellationToken) -> TransportResult<Connection>;
}

// =============================================================================
// Engine configuration
// =============================================================================

/// Tunables for one connection manager.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout for correlated API calls.
    pub call_timeout: Duration,
    /// Interval of the pending-request sweep.
    pub sweep_interval: Duration,
    /// Backoff policy for the retry controller.
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

// =============================================================================
// ConnectionManager
// =============================================================================

/// Why the read loop ended.
enum ReadEnd {
    /// Cancellation fired (disable, shutdown or relogin).
    Cancelled,
    /// The transport dropped.
    Dropped,
}

/// RAII release of the single-flight connect flag; covers panic unwinds.
struct ConnectGuard(Arc<Mutex<bool>>);

impl Drop for ConnectGuard {
    fn drop(&mut self) {
        *self.0.lock() = false;
    }
}

/// Top-level per-endpoint engine object.
pub struct ConnectionManager {
    endpoint: Arc<Endpoint>,
    connector: Arc<dyn Connector>,
    driver: Arc<dyn PlatformDriver>,
    dispatcher: Arc<EventDispatcher>,
    registry: Arc<CorrelationRegistry>,
    retry: RetryController,
    status_sink: Arc<dyn StatusSink>,
    config: EngineConfig,
    /// Single-flight guard: at most one transport attempt per endpoint.
    is_connecting: Arc<Mutex<bool>>,
    /// Cycle-scoped cancellation, replaced on each enable.
    cancel: Mutex<CancellationToken>,
    /// Session token of the live connection attempt, for relogin.
    current_session: Mutex<Option<CancellationToken>>,
    /// API client of the live connection, if any.
    api: Mutex<Option<ApiClient>>,
}

impl ConnectionManager {
    pub fn new(
        endpoint: Arc<Endpoint>,
        connector: Arc<dyn Connector>,
        driver: Arc<dyn PlatformDriver>,
        bot_core: BoxedBotCore,
        config: EngineConfig,
        status_sink: Arc<dyn StatusSink>,
    ) -> Arc<Self> {
        let registry = Arc::new(CorrelationRegistry::new(config.call_timeout));
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::clone(&driver),
            Arc::clone(&registry),
            bot_core,
        ));
        Arc::new(Self {
            endpoint,
            connector,
            driver,
            dispatcher,
            registry,
            retry: RetryController::new(config.retry.clone()),
            status_sink,
            config,
            is_connecting: Arc::new(Mutex::new(false)),
            cancel: Mutex::new(CancellationToken::new()),
            current_session: Mutex::new(None),
            api: Mutex::new(None),
        })
    }

    /// The endpoint this manager serves.
    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    /// The live connection's API client, if connected.
    pub fn api(&self) -> Option<ApiClient> {
        self.api.lock().clone()
    }

    /// Current retry bookkeeping.
    pub fn retry_state(&self) -> RetryState {
        self.retry.state()
    }

    fn persist(&self) {
        self.status_sink.persist(&self.endpoint.snapshot());
    }

    /// Acquires the single-flight connect flag or fails fast.
    ///
    /// Never blocks waiting for the other attempt: a second caller gets
    /// `AlreadyConnecting` immediately.
    fn try_begin_connect(&self) -> Result<ConnectGuard, EngineError> {
        let mut flag = self.is_connecting.lock();
        if *flag {
            return Err(EngineError::AlreadyConnecting);
        }
        *flag = true;
        Ok(ConnectGuard(Arc::clone(&self.is_connecting)))
    }

    // =========================================================================
    // serve
    // =========================================================================

    /// Runs one connection cycle: connect, handshake, pump frames until the
    /// transport drops or the endpoint is torn down.
    ///
    /// State goes `Connecting` before the attempt and `Connected` after the
    /// identity handshake. A transient failure leaves the state at
    /// `Connecting` for the duration of the retry phase (the supervising
    /// loop settles it); a fatal failure moves it to `Failed` and disables
    /// the endpoint.
    pub async fn serve(&self) -> Result<ExitCode, EngineError> {
        let _guard = self.try_begin_connect()?;

        if !self.endpoint.enabled() {
            return Err(EngineError::Disabled);
        }
        let cycle = self.cancel.lock().clone();
        if cycle.is_cancelled() {
            return Err(EngineError::Disabled);
        }

        self.endpoint.transition(ConnectionState::Connecting);
        self.persist();

        let session = cycle.child_token();
        *self.current_session.lock() = Some(session.clone());

        let result = self.serve_session(&cycle, &session).await;

        *self.current_session.lock() = None;
        *self.api.lock() = None;
        self.registry.fail_all();
        result
    }

    async fn serve_session(
        &self,
        cycle: &CancellationToken,
        session: &CancellationToken,
    ) -> Result<ExitCode, EngineError> {
        let connection = match self.connector.connect(session.clone()).await {
            Ok(c) => c,
            Err(e) if e.is_fatal() => {
                error!(endpoint = %self.endpoint.id, error = %e, "fatal connection failure, disabling endpoint");
                self.endpoint.transition(ConnectionState::Failed);
                self.endpoint.set_enabled(false);
                self.persist();
                return Ok(ExitCode::Fatal);
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint.id, error = %e, "connection attempt failed");
                return Ok(ExitCode::Transient);
            }
        };

        info!(
            endpoint = %self.endpoint.id,
            remote = %connection.remote,
            "transport established"
        );

        let api = ApiClient::new(
            connection.outbound.clone(),
            Arc::clone(&self.registry),
            self.config.call_timeout,
        );
        *self.api.lock() = Some(api.clone());

        // The read loop runs on its own task so the handshake below can
        // receive its correlated response. A panic inside dispatch is
        // contained by the task boundary and surfaced through the join.
        let read_task = {
            let dispatcher = Arc::clone(&self.dispatcher);
            let session = session.clone();
            let mut inbound = connection.inbound;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = session.cancelled() => return ReadEnd::Cancelled,
                        frame = inbound.recv() => match frame {
                            Some(raw) => dispatcher.dispatch(&raw).await,
                            None => return ReadEnd::Dropped,
                        }
                    }
                }
            })
        };

        // Minimal identity handshake; the endpoint is not Connected until
        // we know who we are.
        match self.driver.identify(&api).await {
            Ok(identity) => {
                info!(
                    endpoint = %self.endpoint.id,
                    user_id = %identity.user_id,
                    nickname = %identity.nickname,
                    "connected"
                );
                self.endpoint.set_identity(identity.user_id, identity.nickname);
                self.endpoint.transition(ConnectionState::Connected);
                self.retry.reset_attempts();
                self.persist();
            }
            Err(e @ (ApiError::Retcode { .. } | ApiError::NotSupported)) => {
                error!(endpoint = %self.endpoint.id, error = %e, "identity handshake rejected, disabling endpoint");
                session.cancel();
                let _ = read_task.await;
                self.endpoint.transition(ConnectionState::Failed);
                self.endpoint.set_enabled(false);
                self.persist();
                return Ok(ExitCode::Fatal);
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint.id, error = %e, "identity handshake failed");
                session.cancel();
                let _ = read_task.await;
                return Ok(ExitCode::Transient);
            }
        }

        // Serve until the transport drops or we are torn down.
        let end = read_task.await;
        match end {
            Ok(ReadEnd::Cancelled) if cycle.is_cancelled() => {
                info!(endpoint = %self.endpoint.id, "shutting down");
                self.endpoint.transition(ConnectionState::Disconnected);
                self.persist();
                Ok(ExitCode::Clean)
            }
            Ok(ReadEnd::Cancelled) => {
                // Session-only cancel: forced relogin. Reconnect.
                info!(endpoint = %self.endpoint.id, "session dropped for relogin");
                self.endpoint.transition(ConnectionState::Disconnected);
                self.persist();
                Ok(ExitCode::Transient)
            }
            Ok(ReadEnd::Dropped) => {
                warn!(endpoint = %self.endpoint.id, "transport dropped");
                self.endpoint.transition(ConnectionState::Disconnected);
                self.persist();
                Ok(ExitCode::Transient)
            }
            Err(join_error) => {
                // Recovery guard: a panicking read loop must not take the
                // process down. Surface it as a failure instead.
                error!(endpoint = %self.endpoint.id, error = %join_error, "read loop aborted abnormally");
                self.endpoint.transition(ConnectionState::Failed);
                self.persist();
                Ok(ExitCode::Fatal)
            }
        }
    }

    // =========================================================================
    // Supervision
    // =========================================================================

    /// Runs `serve` under the retry controller until clean shutdown,
    /// disablement, fatal failure or retry exhaustion, settling the final
    /// endpoint state.
    pub async fn serve_with_retry(self: &Arc<Self>) -> RetryOutcome {
        let cycle = self.cancel.lock().clone();
        let sweeper = self
            .registry
            .spawn_sweeper(self.config.sweep_interval, cycle.clone());

        let outcome = {
            let manager = Arc::clone(self);
            let endpoint = Arc::clone(&self.endpoint);
            self.retry
                .run(
                    &cycle,
                    move || endpoint.enabled(),
                    move || {
                        let manager = Arc::clone(&manager);
                        async move {
                            match manager.serve().await {
                                Ok(code) => code,
                                Err(EngineError::AlreadyConnecting) => {
                                    warn!("connection attempt already in flight");
                                    ExitCode::Transient
                                }
                                Err(EngineError::Disabled) => ExitCode::Clean,
                            }
                        }
                    },
                )
                .await
        };
        sweeper.abort();

        match outcome {
            RetryOutcome::Exhausted => {
                warn!(endpoint = %self.endpoint.id, "retries exhausted, endpoint failed");
                self.endpoint.transition(ConnectionState::Failed);
                self.persist();
            }
            RetryOutcome::Stopped => {
                if self.endpoint.state() == ConnectionState::Connecting {
                    self.endpoint.transition(ConnectionState::Disconnected);
                    self.persist();
                }
            }
            RetryOutcome::Fatal => {}
            RetryOutcome::AlreadyRetrying => {
                warn!(endpoint = %self.endpoint.id, "serve loop not started: another retry loop is active");
            }
        }
        outcome
    }

    /// Spawns the supervised serve loop on its own task.
    pub fn spawn_serve_loop(self: &Arc<Self>) -> JoinHandle<RetryOutcome> {
        let manager = Arc::clone(self);
        tokio::spawn(async move { manager.serve_with_retry().await })
    }

    // =========================================================================
    // Control surface
    // =========================================================================

    /// Enables or disables the endpoint.
    ///
    /// Enabling clears a sticky `Failed`, opens a fresh cancellation scope
    /// and starts the supervised serve loop. Disabling cancels the scope,
    /// which closes the socket, aborts any backoff sleep and fails all
    /// pending correlated requests. The updated endpoint state is persisted
    /// either way.
    pub fn set_enable(self: &Arc<Self>, enabled: bool) {
        if enabled {
            self.endpoint.set_enabled(true);
            if self.endpoint.state() == ConnectionState::Failed {
                self.endpoint.transition(ConnectionState::Disconnected);
            }
            {
                let mut cancel = self.cancel.lock();
                if cancel.is_cancelled() {
                    *cancel = CancellationToken::new();
                }
            }
            self.persist();
            self.spawn_serve_loop();
        } else {
            info!(endpoint = %self.endpoint.id, "disabling endpoint");
            self.endpoint.set_enabled(false);
            self.cancel.lock().cancel();
            self.registry.fail_all();
            if matches!(
                self.endpoint.state(),
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                self.endpoint.transition(ConnectionState::Disconnected);
            }
            self.persist();
        }
    }

    /// Forces a fresh connection cycle even if currently connected.
    ///
    /// Returns `false` if the endpoint is disabled. The actual dial still
    /// goes through the single-flight guard, so a relogin can never race a
    /// second transport attempt into existence.
    pub fn do_relogin(self: &Arc<Self>) -> bool {
        if !self.endpoint.enabled() {
            return false;
        }
        let session = self.current_session.lock().clone();
        match session {
            Some(token) => {
                info!(endpoint = %self.endpoint.id, "forcing relogin");
                token.cancel();
                true
            }
            None => {
                // No cycle in flight; behave like a plain enable-triggered
                // serve. The retry controller refuses a duplicate loop.
                if self.retry.state().is_retrying {
                    return false;
                }
                // A sticky Failed (retry exhaustion) blocks the Connecting
                // transition; relogin is an explicit operator action, so
                // reset it the way re-enabling does.
                if self.endpoint.state() == ConnectionState::Failed {
                    self.endpoint.transition(ConnectionState::Disconnected);
                    self.persist();
                }
                self.spawn_serve_loop();
                true
            }
        }
    }

    /// Tears the endpoint down for process shutdown. Does not flip the
    /// enabled flag: the endpoint comes back on next start.
    pub fn stop(&self) {
        self.cancel.lock().cancel();
        self.registry.fail_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::EchoToken;
    use crate::dispatch::{BotIdentity, Frame};
    use dicelink_core::{
        AdapterResult, ApiResult, BotCore, LogStatusSink, NormalizedMessage, TransportError,
    };
    use serde_json::{Value, json};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NullCore;

    #[async_trait::async_trait]
    impl BotCore for NullCore {
        async fn on_message(&self, _message: NormalizedMessage) {}
    }

    /// Driver whose handshake is a sentinel-token `get_login_info`.
    struct TestDriver;

    #[async_trait::async_trait]
    impl PlatformDriver for TestDriver {
        fn translate(&self, _frame: &Value) -> AdapterResult<Frame> {
            Ok(Frame::Ignored)
        }

        async fn identify(&self, api: &ApiClient) -> ApiResult<BotIdentity> {
            let data = api
                .call_sentinel(EchoToken::LOGIN_INFO, "get_login_info", json!({}))
                .await?;
            Ok(BotIdentity {
                user_id: format!("QQ:{}", data["user_id"].as_i64().unwrap_or_default()),
                nickname: data["nickname"].as_str().unwrap_or_default().to_string(),
            })
        }
    }

    #[derive(Clone, Copy)]
    enum Script {
        Fail,
        FailAuth,
        Succeed,
        /// Block until cancelled (used to hold the single-flight guard).
        Hang,
    }

    /// Scripted in-memory transport: each `connect` consumes the next step.
    struct ScriptedConnector {
        script: Mutex<VecDeque<Script>>,
        dials: AtomicU32,
        /// Kill switches for live gateways, one per successful dial.
        gateways: Mutex<Vec<CancellationToken>>,
    }

    impl ScriptedConnector {
        fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                dials: AtomicU32::new(0),
                gateways: Mutex::new(Vec::new()),
            })
        }

        fn dials(&self) -> u32 {
            self.dials.load(Ordering::SeqCst)
        }

        fn drop_gateways(&self) {
            for gateway in self.gateways.lock().drain(..) {
                gateway.cancel();
            }
        }
    }

    #[async_trait::async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, cancel: CancellationToken) -> TransportResult<Connection> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().pop_front().unwrap_or(Script::Fail);
            match step {
                Script::Fail => Err(TransportError::ConnectionFailed {
                    url: "ws://gateway.test/ws".into(),
                    reason: "connection refused".into(),
                }),
                Script::FailAuth => Err(TransportError::Unauthorized {
                    url: "ws://gateway.test/ws".into(),
                    reason: "bad token".into(),
                }),
                Script::Hang => {
                    cancel.cancelled().await;
                    Err(TransportError::Cancelled)
                }
                Script::Succeed => {
                    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(64);
                    let (in_tx, in_rx) = mpsc::channel::<Vec<u8>>(64);
                    let kill = CancellationToken::new();
                    self.gateways.lock().push(kill.clone());

                    // Minimal gateway: answer every echoed request with a
                    // login-info payload. Dropping `in_tx` on kill closes
                    // the manager's inbound channel, simulating a drop.
                    tokio::spawn(async move {
                        loop {
                            tokio::select! {
                                _ = kill.cancelled() => break,
                                raw = out_rx.recv() => {
                                    let Some(raw) = raw else { break };
                                    let request: Value = serde_json::from_slice(&raw).unwrap();
                                    if let Some(echo) = request.get("echo") {
                                        let reply = json!({
                                            "status": "ok",
                                            "retcode": 0,
                                            "echo": echo,
                                            "data": {"user_id": 10001, "nickname": "TestBot"},
                                        });
                                        if in_tx.send(reply.to_string().into_bytes()).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                            }
                        }
                    });

                    Ok(Connection {
                        outbound: out_tx,
                        inbound: in_rx,
                        remote: "gateway.test".into(),
                    })
                }
            }
        }
    }

    fn manager_with(
        connector: Arc<ScriptedConnector>,
        retry: RetryPolicy,
    ) -> Arc<ConnectionManager> {
        let endpoint = Endpoint::new("ep-test", "QQ", "onebot", "/tmp/ep-test");
        endpoint.set_enabled(true);
        ConnectionManager::new(
            endpoint,
            connector,
            Arc::new(TestDriver),
            Arc::new(NullCore),
            EngineConfig {
                call_timeout: Duration::from_secs(5),
                sweep_interval: Duration::from_secs(30),
                retry,
            },
            Arc::new(LogStatusSink),
        )
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }

    #[tokio::test]
    async fn concurrent_serve_fails_fast() {
        let connector = ScriptedConnector::new([Script::Hang]);
        let manager = manager_with(Arc::clone(&connector), fast_retry(5));

        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.serve().await })
        };
        // Let the first serve acquire the guard and block in the dial.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = manager.serve().await;
        assert!(matches!(second, Err(EngineError::AlreadyConnecting)));
        assert_eq!(connector.dials(), 1);

        manager.stop();
        let first = first.await.unwrap();
        assert!(matches!(first, Ok(ExitCode::Transient)));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reaches_failed_and_stays() {
        let connector =
            ScriptedConnector::new([Script::Fail, Script::Fail, Script::Fail, Script::Fail]);
        let manager = manager_with(Arc::clone(&connector), fast_retry(3));

        let outcome = manager.serve_with_retry().await;
        assert_eq!(outcome, RetryOutcome::Exhausted);
        assert_eq!(connector.dials(), 3);
        assert_eq!(manager.endpoint().state(), ConnectionState::Failed);
        assert_eq!(manager.retry_state().attempts, 3);

        // Sticky until explicit re-enable.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.endpoint().state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_mid_backoff_settles_disconnected() {
        let connector = ScriptedConnector::new(std::iter::repeat_n(Script::Fail, 10));
        let manager = manager_with(Arc::clone(&connector), fast_retry(5));

        let loop_task = manager.spawn_serve_loop();
        // Attempts at 0s and 1s; disable during the 2s backoff before the
        // third.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        manager.set_enable(false);

        let outcome = loop_task.await.unwrap();
        assert_eq!(outcome, RetryOutcome::Stopped);
        assert_eq!(connector.dials(), 2);
        assert_eq!(manager.endpoint().state(), ConnectionState::Disconnected);

        // No further attempt ever starts.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.dials(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_resets_attempts() {
        let connector = ScriptedConnector::new([Script::Fail, Script::Succeed, Script::Succeed]);
        let manager = manager_with(Arc::clone(&connector), fast_retry(5));

        let loop_task = manager.spawn_serve_loop();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(manager.endpoint().state(), ConnectionState::Connected);
        assert_eq!(manager.retry_state().attempts, 0);
        assert_eq!(manager.endpoint().user_id(), "QQ:10001");

        // Simulated drop; the loop reconnects on the next scripted success.
        connector.drop_gateways();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.endpoint().state(), ConnectionState::Connected);
        assert_eq!(manager.retry_state().attempts, 0);
        assert_eq!(connector.dials(), 3);

        manager.set_enable(false);
        let _ = loop_task.await;
    }

    #[tokio::test]
    async fn fatal_auth_failure_disables_endpoint() {
        let connector = ScriptedConnector::new([Script::FailAuth, Script::Fail]);
        let manager = manager_with(Arc::clone(&connector), fast_retry(5));

        let outcome = manager.serve_with_retry().await;
        assert_eq!(outcome, RetryOutcome::Fatal);
        assert_eq!(connector.dials(), 1);
        assert_eq!(manager.endpoint().state(), ConnectionState::Failed);
        assert!(!manager.endpoint().enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn relogin_forces_fresh_session() {
        let connector = ScriptedConnector::new([Script::Succeed, Script::Succeed]);
        let manager = manager_with(Arc::clone(&connector), fast_retry(5));

        let loop_task = manager.spawn_serve_loop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.endpoint().state(), ConnectionState::Connected);

        assert!(manager.do_relogin());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(manager.endpoint().state(), ConnectionState::Connected);
        assert_eq!(connector.dials(), 2);

        manager.set_enable(false);
        let _ = loop_task.await;
    }

    #[tokio::test(start_paused = true)]
    async fn relogin_after_exhaustion_recovers_to_connected() {
        let connector = ScriptedConnector::new([Script::Fail, Script::Fail, Script::Succeed]);
        let manager = manager_with(Arc::clone(&connector), fast_retry(2));

        let outcome = manager.serve_with_retry().await;
        assert_eq!(outcome, RetryOutcome::Exhausted);
        assert_eq!(manager.endpoint().state(), ConnectionState::Failed);
        // Exhaustion does not disable; only fatal failures do.
        assert!(manager.endpoint().enabled());

        // An explicit relogin must clear the sticky Failed so the new cycle
        // can reach Connected; the observable state must track the live
        // connection.
        assert!(manager.do_relogin());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(manager.endpoint().state(), ConnectionState::Connected);
        assert_eq!(manager.endpoint().user_id(), "QQ:10001");
        assert_eq!(connector.dials(), 3);

        manager.set_enable(false);
        assert_eq!(manager.endpoint().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn second_serve_loop_is_refused() {
        let connector = ScriptedConnector::new([Script::Hang]);
        let manager = manager_with(Arc::clone(&connector), fast_retry(5));

        let loop_task = manager.spawn_serve_loop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = manager.serve_with_retry().await;
        assert_eq!(second, RetryOutcome::AlreadyRetrying);
        assert_eq!(connector.dials(), 1);

        manager.stop();
        let _ = loop_task.await;
    }

    #[tokio::test(start_paused = true)]
    async fn disable_fails_pending_requests() {
        let connector = ScriptedConnector::new([Script::Succeed]);
        let manager = manager_with(Arc::clone(&connector), fast_retry(5));

        let loop_task = manager.spawn_serve_loop();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let api = manager.api().expect("connected");

        // A request whose response will never come: the scripted gateway
        // only answers echoed frames, so park one without sending.
        let (token, rx) = api.registry().register();
        let waiter = {
            let registry = Arc::clone(api.registry());
            tokio::spawn(async move {
                registry
                    .await_response(token, rx, Duration::from_secs(60))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        manager.set_enable(false);

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(ApiError::NotConnected)));
        let _ = loop_task.await;
    }
}
