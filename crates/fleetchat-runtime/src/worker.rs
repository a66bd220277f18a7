//! Plugin workers.
//!
//! Each loaded plugin runs as one worker: a dedicated task owning the
//! plugin's [`PluginEngine`], reachable only through the message protocol.
//! A companion router task on the host side matches responses against the
//! pending-request table and re-emits console records; nothing shares
//! mutable memory with the worker besides the two channels.
//!
//! The worker state machine:
//!
//! ```text
//! initializing -> ready <-> busy
//!       \            \       \
//!        +--- error <-+-------+     (fatal failure, non-terminal states)
//!         \____ disposed ____/      (terminal, from any state)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use fleetchat_sandbox::{CapabilitySurface, ConsoleLevel, ConsoleRecord, SecureConsole};

use crate::engine::{EngineContext, EngineError, PluginEngine};
use crate::error::{Result, RuntimeError};
use crate::protocol::{RequestPayload, WorkerEvent, WorkerRequest, WorkerResponse};
use crate::tracker::{Termination, TerminationReason};

/// How long a graceful `dispose` waits before the task is torn down anyway.
const DISPOSE_GRACE: Duration = Duration::from_millis(500);

/// Channel depth for both directions of the worker protocol.
const CHANNEL_CAPACITY: usize = 32;

// ---------------------------------------------------------------------------
// Status and state snapshots
// ---------------------------------------------------------------------------

/// Lifecycle status of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Initializing,
    Ready,
    Busy,
    Error,
    Disposed,
}

impl WorkerStatus {
    /// Whether the state machine permits moving from `self` to `to`.
    ///
    /// Transitions are monotonic except for the ready/busy cycle;
    /// `Disposed` is terminal.
    pub fn can_transition(self, to: WorkerStatus) -> bool {
        use WorkerStatus::*;
        match (self, to) {
            (Disposed, _) => false,
            (_, Disposed) => true,
            (Initializing, Ready | Error) => true,
            (Ready, Busy | Error) => true,
            (Busy, Ready | Error) => true,
            _ => false,
        }
    }
}

/// Point-in-time view of a worker, returned by the manager's state queries.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerState {
    /// Plugin id this worker belongs to.
    pub id: String,
    pub status: WorkerStatus,
    pub last_activity: DateTime<Utc>,
    /// Bytes, as last reported by the engine.
    pub memory_usage: u64,
}

/// Shared memory gauge the worker updates after every engine call and the
/// resource tracker samples on its interval.
#[derive(Debug, Clone, Default)]
pub struct MemoryGauge(Arc<AtomicU64>);

impl MemoryGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, bytes: u64) {
        self.0.store(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Engine-facing sink for unsolicited console records.
///
/// Records travel the same channel as responses and are told apart by
/// variant; a full or closed channel drops the record rather than blocking
/// the engine.
#[derive(Clone)]
pub struct ConsoleSink {
    plugin: String,
    tx: mpsc::Sender<WorkerEvent>,
}

impl ConsoleSink {
    pub(crate) fn new(plugin: impl Into<String>, tx: mpsc::Sender<WorkerEvent>) -> Self {
        Self {
            plugin: plugin.into(),
            tx,
        }
    }

    /// Emit one console record.
    pub fn emit(&self, level: ConsoleLevel, message: impl Into<String>) {
        let record = ConsoleRecord {
            plugin: self.plugin.clone(),
            level,
            message: message.into(),
        };
        if self.tx.try_send(WorkerEvent::Console(record)).is_err() {
            tracing::debug!(plugin = %self.plugin, "console record dropped (channel closed or full)");
        }
    }
}

// ---------------------------------------------------------------------------
// Worker handle
// ---------------------------------------------------------------------------

struct HandleInner {
    plugin_id: String,
    req_tx: mpsc::Sender<WorkerRequest>,
    /// Outstanding requests awaiting their response.
    pending: Arc<DashMap<u64, oneshot::Sender<WorkerResponse>>>,
    next_id: AtomicU64,
    gauge: MemoryGauge,
    worker_task: JoinHandle<()>,
    router_task: JoinHandle<()>,
}

/// Host-side handle to one worker. Cheaply cloneable.
#[derive(Clone)]
pub struct WorkerHandle {
    inner: Arc<HandleInner>,
}

impl WorkerHandle {
    pub fn plugin_id(&self) -> &str {
        &self.inner.plugin_id
    }

    /// Clone of the gauge this worker reports memory through.
    pub fn memory_gauge(&self) -> MemoryGauge {
        self.inner.gauge.clone()
    }

    pub fn memory_usage(&self) -> u64 {
        self.inner.gauge.get()
    }

    async fn send(&self, payload: RequestPayload) -> Result<(u64, oneshot::Receiver<WorkerResponse>)> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id, tx);

        if self
            .inner
            .req_tx
            .send(WorkerRequest { id, payload })
            .await
            .is_err()
        {
            self.inner.pending.remove(&id);
            return Err(RuntimeError::Disposed(self.inner.plugin_id.clone()));
        }
        Ok((id, rx))
    }

    /// Send one request and await its response.
    pub async fn request(&self, payload: RequestPayload) -> Result<WorkerResponse> {
        let (_id, rx) = self.send(payload).await?;
        rx.await
            .map_err(|_| RuntimeError::Disposed(self.inner.plugin_id.clone()))
    }

    /// Send one request with a watchdog.
    ///
    /// When the watchdog fires the pending entry is evicted immediately, so
    /// a late response is discarded instead of resolving a request the
    /// caller already gave up on.
    pub async fn request_timeout(
        &self,
        payload: RequestPayload,
        limit: Duration,
    ) -> Result<WorkerResponse> {
        let (id, rx) = self.send(payload).await?;
        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RuntimeError::Disposed(self.inner.plugin_id.clone())),
            Err(_) => {
                self.inner.pending.remove(&id);
                Err(RuntimeError::Timeout {
                    limit_ms: limit.as_millis() as u64,
                })
            }
        }
    }

    /// Drop every pending entry; their callers resolve with a disposed
    /// error. Part of teardown, and the reason late responses cannot leak
    /// memory after disposal.
    pub fn evict_pending(&self) {
        self.inner.pending.clear();
    }

    /// Tear the worker down: attempt a graceful `dispose` exchange, then
    /// abort both tasks and evict the pending table. Terminal.
    pub async fn dispose(&self) {
        let graceful = self
            .request_timeout(RequestPayload::Dispose, DISPOSE_GRACE)
            .await;
        if graceful.is_err() {
            tracing::debug!(plugin = %self.inner.plugin_id, "graceful dispose timed out, aborting worker");
        }
        self.inner.worker_task.abort();
        self.inner.router_task.abort();
        self.evict_pending();
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Spawn a worker for one plugin.
///
/// `surface` is the capability object later injected into the engine at the
/// `init` handshake; `terminations` is the single channel through which
/// fatal worker failures reach the manager.
pub fn spawn_worker(
    plugin_id: impl Into<String>,
    engine: Box<dyn PluginEngine>,
    surface: CapabilitySurface,
    terminations: mpsc::Sender<Termination>,
) -> WorkerHandle {
    let plugin_id = plugin_id.into();
    let (req_tx, req_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (evt_tx, evt_rx) = mpsc::channel(CHANNEL_CAPACITY);

    let pending: Arc<DashMap<u64, oneshot::Sender<WorkerResponse>>> = Arc::new(DashMap::new());
    let gauge = MemoryGauge::new();

    let worker_task = tokio::spawn(worker_loop(
        plugin_id.clone(),
        engine,
        surface,
        req_rx,
        evt_tx,
        gauge.clone(),
    ));

    let router_task = tokio::spawn(router_loop(
        plugin_id.clone(),
        Arc::clone(&pending),
        evt_rx,
        terminations,
    ));

    tracing::debug!(plugin = %plugin_id, "worker spawned");

    WorkerHandle {
        inner: Arc::new(HandleInner {
            plugin_id,
            req_tx,
            pending,
            next_id: AtomicU64::new(1),
            gauge,
            worker_task,
            router_task,
        }),
    }
}

/// The worker task: drives the engine through protocol requests.
async fn worker_loop(
    plugin_id: String,
    mut engine: Box<dyn PluginEngine>,
    surface: CapabilitySurface,
    mut req_rx: mpsc::Receiver<WorkerRequest>,
    evt_tx: mpsc::Sender<WorkerEvent>,
    gauge: MemoryGauge,
) {
    let mut initialized = false;

    while let Some(WorkerRequest { id, payload }) = req_rx.recv().await {
        let outcome: std::result::Result<serde_json::Value, EngineError> = match payload {
            RequestPayload::Init(init) => {
                if initialized {
                    Err(EngineError::command("worker already initialized"))
                } else {
                    let ctx = EngineContext {
                        plugin_id: plugin_id.clone(),
                        manifest: Arc::new(init.manifest),
                        program: init.program,
                        surface: surface.clone(),
                        console: ConsoleSink::new(&plugin_id, evt_tx.clone()),
                    };
                    engine.initialize(ctx).await.map(|()| {
                        initialized = true;
                        serde_json::json!({ "status": "ready" })
                    })
                }
            }
            RequestPayload::Execute(invoke) => engine.invoke(&invoke.command, invoke.args).await,
            RequestPayload::Render(invoke) => engine.render(&invoke.command, invoke.args).await,
            RequestPayload::Ping => Ok(serde_json::json!("pong")),
            RequestPayload::SetState(state) => {
                engine.set_state(state).await.map(|()| serde_json::Value::Null)
            }
            RequestPayload::GetState => engine.get_state().await,
            RequestPayload::Dispose => {
                let _ = evt_tx
                    .send(WorkerEvent::Response(WorkerResponse::ok(
                        id,
                        serde_json::Value::Null,
                    )))
                    .await;
                break;
            }
        };

        gauge.set(engine.memory_usage());

        match outcome {
            Ok(value) => {
                let _ = evt_tx
                    .send(WorkerEvent::Response(WorkerResponse::ok(id, value)))
                    .await;
            }
            Err(EngineError::Command { message, stack }) => {
                let _ = evt_tx
                    .send(WorkerEvent::Response(WorkerResponse::err(
                        id, message, stack,
                    )))
                    .await;
            }
            Err(EngineError::Fatal { message, stack }) => {
                let _ = evt_tx
                    .send(WorkerEvent::Response(WorkerResponse::err(
                        id,
                        message.clone(),
                        stack.clone(),
                    )))
                    .await;
                let _ = evt_tx.send(WorkerEvent::Fatal { message, stack }).await;
                break;
            }
        }
    }

    tracing::debug!(plugin = %plugin_id, "worker loop exited");
}

/// The host-side router: resolves responses against the pending table,
/// re-emits console records, and reports fatal failures to the manager.
async fn router_loop(
    plugin_id: String,
    pending: Arc<DashMap<u64, oneshot::Sender<WorkerResponse>>>,
    mut evt_rx: mpsc::Receiver<WorkerEvent>,
    terminations: mpsc::Sender<Termination>,
) {
    let console = SecureConsole::new(&plugin_id);

    while let Some(event) = evt_rx.recv().await {
        match event {
            WorkerEvent::Response(response) => match pending.remove(&response.id) {
                Some((_, tx)) => {
                    let _ = tx.send(response);
                }
                None => {
                    tracing::warn!(
                        plugin = %plugin_id,
                        id = response.id,
                        "discarding response with no pending request"
                    );
                }
            },
            WorkerEvent::Console(record) => console.emit(&record),
            WorkerEvent::Fatal { message, stack } => {
                tracing::error!(plugin = %plugin_id, error = %message, "worker reported fatal failure");
                let _ = terminations
                    .send(Termination {
                        plugin_id: plugin_id.clone(),
                        reason: TerminationReason::WorkerFatal { message, stack },
                    })
                    .await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{self, Behavior, FixtureEngine};
    use crate::protocol::InvokePayload;

    fn execute(command: &str) -> RequestPayload {
        RequestPayload::Execute(InvokePayload {
            command: command.into(),
            args: serde_json::Value::Null,
        })
    }

    async fn ready_worker(engine: FixtureEngine) -> (WorkerHandle, mpsc::Receiver<Termination>) {
        let (term_tx, term_rx) = mpsc::channel(8);
        let handle = spawn_worker(
            "test-plugin",
            Box::new(engine),
            fixtures::surface("test-plugin"),
            term_tx,
        );
        let response = handle
            .request(RequestPayload::Init(fixtures::init_payload()))
            .await
            .unwrap();
        assert!(response.is_ok(), "init failed: {:?}", response.error);
        (handle, term_rx)
    }

    #[tokio::test]
    async fn init_then_execute() {
        let engine = FixtureEngine::new().on("greet", Behavior::Value(serde_json::json!("hi")));
        let (handle, _term) = ready_worker(engine).await;

        let response = handle.request(execute("greet")).await.unwrap();
        assert!(response.is_ok());
        assert_eq!(response.result, Some(serde_json::json!("hi")));
    }

    #[tokio::test]
    async fn request_ids_strictly_increase() {
        let engine = FixtureEngine::new().on("n", Behavior::Value(serde_json::json!(1)));
        let (handle, _term) = ready_worker(engine).await;

        let a = handle.request(execute("n")).await.unwrap();
        let b = handle.request(execute("n")).await.unwrap();
        let c = handle.request(RequestPayload::Ping).await.unwrap();
        assert!(a.id < b.id && b.id < c.id);
    }

    #[tokio::test]
    async fn double_init_is_rejected() {
        let engine = FixtureEngine::new();
        let (handle, _term) = ready_worker(engine).await;

        let response = handle
            .request(RequestPayload::Init(fixtures::init_payload()))
            .await
            .unwrap();
        assert!(!response.is_ok());
    }

    #[tokio::test]
    async fn handled_error_keeps_worker_usable() {
        let engine = FixtureEngine::new()
            .on("bad", Behavior::Fail("no such todo".into()))
            .on("good", Behavior::Value(serde_json::json!(true)));
        let (handle, _term) = ready_worker(engine).await;

        let failed = handle.request(execute("bad")).await.unwrap();
        assert_eq!(failed.error.as_deref(), Some("no such todo"));
        assert!(failed.result.is_none());

        let ok = handle.request(execute("good")).await.unwrap();
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn fatal_error_reports_termination_and_kills_worker() {
        let engine = FixtureEngine::new().on("boom", Behavior::Fatal("stack overflow".into()));
        let (handle, mut term_rx) = ready_worker(engine).await;

        let response = handle.request(execute("boom")).await.unwrap();
        assert!(!response.is_ok());

        let termination = term_rx.recv().await.unwrap();
        assert_eq!(termination.plugin_id, "test-plugin");
        assert!(matches!(
            termination.reason,
            TerminationReason::WorkerFatal { .. }
        ));

        // The worker loop has exited; further requests fail as disposed.
        let after = handle.request(RequestPayload::Ping).await;
        assert!(matches!(after, Err(RuntimeError::Disposed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_timeout_evicts_pending_and_discards_late_response() {
        let engine = FixtureEngine::new().on(
            "slow",
            Behavior::SleepThen(Duration::from_millis(200), serde_json::json!("late")),
        );
        let (handle, _term) = ready_worker(engine).await;

        let result = handle
            .request_timeout(execute("slow"), Duration::from_millis(50))
            .await;
        assert!(matches!(result, Err(RuntimeError::Timeout { limit_ms: 50 })));

        // The late response has no pending entry to resolve; the worker
        // stays alive and serves the next request.
        let pong = handle.request(RequestPayload::Ping).await.unwrap();
        assert!(pong.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_resolves_hung_requests() {
        let engine = FixtureEngine::new().on("hang", Behavior::Hang);
        let (handle, _term) = ready_worker(engine).await;

        let hung = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.request(execute("hang")).await })
        };
        tokio::task::yield_now().await;

        handle.dispose().await;

        let result = hung.await.unwrap();
        assert!(matches!(result, Err(RuntimeError::Disposed(_))));
    }

    #[tokio::test]
    async fn console_records_are_multiplexed() {
        let engine = FixtureEngine::new().on(
            "chatty",
            Behavior::Console(ConsoleLevel::Info, "working".into(), serde_json::json!(1)),
        );
        let (handle, _term) = ready_worker(engine).await;

        // The console record travels the event channel ahead of the
        // response; receiving the response proves the router consumed the
        // record without mistaking it for a reply.
        let response = handle.request(execute("chatty")).await.unwrap();
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn memory_gauge_tracks_engine_reports() {
        let engine = FixtureEngine::new()
            .with_memory(4096)
            .on("x", Behavior::Value(serde_json::Value::Null));
        let (handle, _term) = ready_worker(engine).await;

        handle.request(execute("x")).await.unwrap();
        assert_eq!(handle.memory_usage(), 4096);
    }

    #[test]
    fn status_transitions() {
        use WorkerStatus::*;
        assert!(Initializing.can_transition(Ready));
        assert!(Ready.can_transition(Busy));
        assert!(Busy.can_transition(Ready));
        assert!(Busy.can_transition(Error));
        assert!(Error.can_transition(Disposed));
        assert!(Ready.can_transition(Disposed));

        // No reverse transitions outside the ready/busy cycle.
        assert!(!Ready.can_transition(Initializing));
        assert!(!Error.can_transition(Ready));
        assert!(!Disposed.can_transition(Ready));
        assert!(!Disposed.can_transition(Error));
    }
}
