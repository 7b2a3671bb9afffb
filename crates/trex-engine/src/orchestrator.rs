//! ---
//! trex_section: "01-core-functionality"
//! trex_subsection: "module"
//! trex_type: "source"
//! trex_scope: "code"
//! trex_description: "Primary orchestration facade and lifecycle management."
//! trex_version: "v0.1.0"
//! trex_owner: "tbd"
//! ---
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use trex_adapter::{AdapterError, TestAdapter};
use trex_common::config::RunnerConfig;
use uuid::Uuid;

use crate::dispatch::{DispatchEvent, Dispatcher};
use crate::extensions::{self, ExtensionHost};
use crate::inventory::{Inventory, TestCase, TestId};
use crate::progress::{ProgressTracker, RunCounts};

const EVENT_CHANNEL_DEPTH: usize = 256;

/// Lifecycle state of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// No discovery has happened yet.
    Idle,
    /// A discovery pass is in flight.
    Discovering,
    /// An inventory is loaded and no run is in progress.
    Ready,
    /// A run session is executing.
    Running,
    /// The last run session completed; behaves as `Ready` for new calls.
    Finished,
}

/// Errors surfaced by the orchestrator facade.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested operation is not legal in the current state.
    #[error("{operation} is not valid while the engine is {state:?}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the engine was in.
        state: EngineState,
    },
    /// `run` was called with no tests selected.
    #[error("run selection is empty")]
    EmptySelection,
    /// The selection references a test missing from the inventory.
    #[error("unknown test case {0}")]
    UnknownTest(TestId),
    /// Discovery failed; the inventory is unchanged.
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    /// A session task failed to join.
    #[error("run session failed: {0}")]
    Session(String),
}

/// Aggregate outcome of one run session, attached to the completion event.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Identifier of the session this summary describes.
    pub session_id: Uuid,
    /// Final per-status tallies.
    pub counts: RunCounts,
    /// Whether the session was canceled before admitting every test.
    pub canceled: bool,
    /// When the session started.
    pub started_at: DateTime<Utc>,
    /// When the session finished or drained after cancellation.
    pub finished_at: DateTime<Utc>,
}

/// Event fanned out to every subscriber of the engine bus.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A test case changed status; carries the post-transition snapshot.
    StatusChanged(TestCase),
    /// The run session finished; emitted exactly once per `run` call.
    RunFinished(RunSummary),
}

struct SessionHandles {
    cancel: watch::Sender<bool>,
    dispatch: Option<JoinHandle<()>>,
    relay: Option<JoinHandle<()>>,
}

/// Top-level facade over discovery, dispatch, progress, and extension hooks.
///
/// The orchestrator owns the inventory of discovered tests and one run
/// session at a time. Subscribers observe the run through
/// [`TestOrchestrator::subscribe`]; the progress tracker is always updated
/// before an event is fanned out, so a subscriber that asks "is the run
/// complete" after an event sees bookkeeping at least as fresh as the event.
pub struct TestOrchestrator {
    adapter: Arc<dyn TestAdapter>,
    extensions: Arc<dyn ExtensionHost>,
    inventory: Arc<Inventory>,
    tracker: Arc<ProgressTracker>,
    max_concurrency: usize,
    state: Arc<Mutex<EngineState>>,
    events: broadcast::Sender<EngineEvent>,
    session: Mutex<Option<SessionHandles>>,
}

impl TestOrchestrator {
    /// Build an orchestrator over the given adapter and extension host.
    ///
    /// The effective concurrency cap is clamped to the adapter's declared
    /// safe ceiling; for adapters that are not reentrant-safe that clamp is
    /// a correctness requirement.
    pub fn new(
        adapter: Arc<dyn TestAdapter>,
        extensions: Arc<dyn ExtensionHost>,
        max_concurrency: usize,
    ) -> Self {
        let mut cap = max_concurrency.max(1);
        if let Some(ceiling) = adapter.max_safe_concurrency() {
            let ceiling = ceiling.max(1);
            if cap > ceiling {
                warn!(
                    requested = cap,
                    ceiling,
                    adapter = %adapter.display_name(),
                    "clamping concurrency to the adapter's safe ceiling"
                );
                cap = ceiling;
            }
        }
        let (events, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        Self {
            adapter,
            extensions,
            inventory: Arc::new(Inventory::new()),
            tracker: Arc::new(ProgressTracker::new()),
            max_concurrency: cap,
            state: Arc::new(Mutex::new(EngineState::Idle)),
            events,
            session: Mutex::new(None),
        }
    }

    /// Build an orchestrator from the runner section of the application
    /// config.
    pub fn from_config(
        config: &RunnerConfig,
        adapter: Arc<dyn TestAdapter>,
        extensions: Arc<dyn ExtensionHost>,
    ) -> Self {
        Self::new(adapter, extensions, config.max_concurrency)
    }

    /// Subscribe to status-change and run-finished events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> EngineState {
        *self.state.lock()
    }

    /// Effective concurrency cap after adapter clamping.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Snapshot of the current inventory in discovery order.
    pub fn inventory(&self) -> Vec<TestCase> {
        self.inventory.snapshot()
    }

    /// Snapshot of the current session's progress tallies.
    pub fn progress(&self) -> RunCounts {
        self.tracker.counts()
    }

    /// Enumerate the assembly's tests through the adapter, replacing the
    /// inventory wholesale.
    ///
    /// Valid from `Idle`, `Ready`, and `Finished`. On failure the previous
    /// inventory and state are left untouched.
    pub async fn discover(&self) -> Result<Vec<TestCase>, EngineError> {
        let previous = {
            let mut state = self.state.lock();
            match *state {
                EngineState::Idle | EngineState::Ready | EngineState::Finished => {
                    let previous = *state;
                    *state = EngineState::Discovering;
                    previous
                }
                current => {
                    return Err(EngineError::InvalidState {
                        operation: "discover",
                        state: current,
                    })
                }
            }
        };

        match self.adapter.discover().await {
            Ok(discovered) => {
                let cases: Vec<TestCase> = discovered.into_iter().map(Into::into).collect();
                info!(
                    adapter = %self.adapter.display_name(),
                    assembly = %self.adapter.assembly_path().display(),
                    count = cases.len(),
                    "discovery complete"
                );
                self.inventory.replace(cases);
                self.tracker.reset(0);
                *self.session.lock() = None;
                *self.state.lock() = EngineState::Ready;
                Ok(self.inventory.snapshot())
            }
            Err(err) => {
                *self.state.lock() = previous;
                Err(err.into())
            }
        }
    }

    /// Start one run session over the selected tests.
    ///
    /// Returns as soon as the session is launched; progress is observed via
    /// [`TestOrchestrator::subscribe`] or awaited with
    /// [`TestOrchestrator::join_session`].
    pub async fn run(&self, selection: Vec<TestId>) -> Result<Uuid, EngineError> {
        if selection.is_empty() {
            return Err(EngineError::EmptySelection);
        }
        for id in &selection {
            if !self.inventory.contains(id) {
                return Err(EngineError::UnknownTest(id.clone()));
            }
        }
        {
            let mut state = self.state.lock();
            match *state {
                EngineState::Ready | EngineState::Finished => *state = EngineState::Running,
                current => {
                    return Err(EngineError::InvalidState {
                        operation: "run",
                        state: current,
                    })
                }
            }
        }

        extensions::fire_before_run(self.extensions.as_ref()).await;
        self.tracker.reset(selection.len());

        let session_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(
            session = %session_id,
            total = selection.len(),
            max_concurrency = self.max_concurrency,
            "run started"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(
            self.inventory.clone(),
            self.adapter.clone(),
            self.max_concurrency,
        );
        let dispatch = dispatcher.spawn_session(selection, event_tx, cancel_rx);
        let relay = tokio::spawn(relay_session(
            event_rx,
            self.tracker.clone(),
            self.events.clone(),
            self.extensions.clone(),
            self.state.clone(),
            session_id,
            started_at,
        ));
        *self.session.lock() = Some(SessionHandles {
            cancel: cancel_tx,
            dispatch: Some(dispatch),
            relay: Some(relay),
        });
        Ok(session_id)
    }

    /// Request cooperative cancellation of the current session.
    ///
    /// Stops further admission; tests already running reach their natural
    /// terminal status before the session finishes. A no-op outside
    /// `Running`.
    pub fn cancel(&self) {
        if self.state() != EngineState::Running {
            return;
        }
        if let Some(handles) = self.session.lock().as_ref() {
            info!("run cancellation requested");
            let _ = handles.cancel.send(true);
        }
    }

    /// Await the current session's dispatch and relay tasks.
    pub async fn join_session(&self) -> Result<(), EngineError> {
        let (dispatch, relay) = {
            let mut session = self.session.lock();
            match session.as_mut() {
                Some(handles) => (handles.dispatch.take(), handles.relay.take()),
                None => (None, None),
            }
        };
        if let Some(handle) = dispatch {
            handle
                .await
                .map_err(|err| EngineError::Session(err.to_string()))?;
        }
        if let Some(handle) = relay {
            handle
                .await
                .map_err(|err| EngineError::Session(err.to_string()))?;
        }
        Ok(())
    }
}

/// Relay dispatch notifications to subscribers until the session completes,
/// then fire the after-run hook and emit the single completion event.
async fn relay_session(
    mut events: mpsc::UnboundedReceiver<DispatchEvent>,
    tracker: Arc<ProgressTracker>,
    bus: broadcast::Sender<EngineEvent>,
    host: Arc<dyn ExtensionHost>,
    state: Arc<Mutex<EngineState>>,
    session_id: Uuid,
    started_at: DateTime<Utc>,
) {
    let mut canceled = false;
    while let Some(event) = events.recv().await {
        match event {
            DispatchEvent::Status(case) => {
                // Bookkeeping first so done() reflects this transition before
                // any subscriber observes it.
                tracker.update(&case);
                let _ = bus.send(EngineEvent::StatusChanged(case));
                if tracker.done() {
                    break;
                }
            }
            DispatchEvent::Drained {
                canceled: was_canceled,
            } => {
                canceled = was_canceled;
                break;
            }
        }
    }

    extensions::fire_after_run(host.as_ref()).await;
    let counts = tracker.counts();
    let summary = RunSummary {
        session_id,
        counts,
        canceled,
        started_at,
        finished_at: Utc::now(),
    };
    *state.lock() = EngineState::Finished;
    info!(
        session = %session_id,
        total = counts.total,
        passed = counts.passed,
        failed = counts.failed,
        canceled,
        "run finished"
    );
    let _ = bus.send(EngineEvent::RunFinished(summary));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use trex_adapter::{DiscoveredCase, RunError};

    use crate::extensions::NoopExtensionHost;
    use crate::inventory::ExecutionStatus;

    struct StaticAdapter {
        methods: Vec<&'static str>,
        fail_discovery: AtomicBool,
    }

    impl StaticAdapter {
        fn new(methods: Vec<&'static str>) -> Arc<Self> {
            Arc::new(Self {
                methods,
                fail_discovery: AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl TestAdapter for StaticAdapter {
        fn display_name(&self) -> &str {
            "static"
        }

        fn assembly_path(&self) -> &Path {
            Path::new("static.dll")
        }

        fn set_assembly_path(&mut self, _path: PathBuf) {}

        fn test_method_attribute(&self) -> &str {
            "TestMethod"
        }

        fn test_method_description_attribute(&self) -> &str {
            "TestMethodDescription"
        }

        async fn discover(&self) -> Result<Vec<DiscoveredCase>, AdapterError> {
            if self.fail_discovery.load(Ordering::SeqCst) {
                return Err(AdapterError::Discovery("assembly rejected".to_owned()));
            }
            Ok(self
                .methods
                .iter()
                .map(|method| DiscoveredCase {
                    class_name: "Suite".to_owned(),
                    method_name: (*method).to_owned(),
                    markers: Vec::new(),
                    description: String::new(),
                })
                .collect())
        }

        async fn run_test(&self, _case_id: &str) -> Result<(), RunError> {
            Ok(())
        }
    }

    fn orchestrator(adapter: Arc<StaticAdapter>) -> TestOrchestrator {
        TestOrchestrator::new(adapter, Arc::new(NoopExtensionHost), 2)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn discover_then_run_reaches_finished() {
        let engine = orchestrator(StaticAdapter::new(vec!["a", "b"]));
        assert_eq!(engine.state(), EngineState::Idle);

        let inventory = engine.discover().await.expect("discovery succeeds");
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(inventory.len(), 2);

        let selection: Vec<TestId> = inventory.into_iter().map(|case| case.id).collect();
        engine.run(selection).await.expect("run starts");
        engine.join_session().await.expect("session joins");

        assert_eq!(engine.state(), EngineState::Finished);
        let counts = engine.progress();
        assert_eq!(counts.passed, 2);
        assert_eq!(counts.terminal_total(), counts.total);
    }

    #[tokio::test]
    async fn run_is_rejected_before_discovery() {
        let engine = orchestrator(StaticAdapter::new(vec!["a"]));
        let err = engine
            .run(vec![TestId::new("Suite", "a")])
            .await
            .expect_err("run without inventory");
        assert!(matches!(err, EngineError::UnknownTest(_)));
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let engine = orchestrator(StaticAdapter::new(vec!["a"]));
        engine.discover().await.expect("discovery succeeds");
        let err = engine.run(Vec::new()).await.expect_err("empty selection");
        assert!(matches!(err, EngineError::EmptySelection));
    }

    #[tokio::test]
    async fn unknown_selection_is_rejected() {
        let engine = orchestrator(StaticAdapter::new(vec!["a"]));
        engine.discover().await.expect("discovery succeeds");
        let err = engine
            .run(vec![TestId::new("Suite", "missing")])
            .await
            .expect_err("unknown test");
        assert!(matches!(err, EngineError::UnknownTest(_)));
    }

    #[tokio::test]
    async fn failed_discovery_leaves_inventory_untouched() {
        let adapter = StaticAdapter::new(vec!["a"]);
        let engine = orchestrator(adapter.clone());
        engine.discover().await.expect("first discovery succeeds");
        let before = engine.inventory();

        adapter.fail_discovery.store(true, Ordering::SeqCst);
        let err = engine.discover().await.expect_err("discovery fails");
        assert!(matches!(err, EngineError::Adapter(_)));
        assert_eq!(engine.inventory(), before);
        assert_eq!(engine.state(), EngineState::Ready);
    }
}
