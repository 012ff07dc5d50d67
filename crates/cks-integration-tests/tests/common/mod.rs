//! Shared test harness for integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cks_approval::{EngineConfig, Submission, ToolCallEngine, ToolExecutor};
use cks_core::{
    ExecutionOutcome, RequestId, SessionId, ToolArguments, ToolCall, ToolCallRequest,
    ToolRunStatus,
};
use cks_desktop::spawn_dispatcher;
use cks_events::{AuditTrail, EventReceiver, EventSubscriber, GateEvent};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a test waits for a call to settle before failing.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

/// What the recording executor does with each call.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Succeed with `ok: <tool>`.
    Succeed,
    /// Fail with this message.
    Fail(String),
    /// Block until the call is cancelled, then fail with `cancelled`.
    WaitForCancel,
}

/// Executor that records which requests it was asked to run.
pub struct RecordingExecutor {
    behaviour: Behaviour,
    executed: Mutex<Vec<RequestId>>,
}

#[allow(dead_code)]
impl RecordingExecutor {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Request ids in the order execution started.
    pub fn executed(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|id| id.as_str().to_owned())
            .collect()
    }
}

#[async_trait::async_trait]
impl ToolExecutor for RecordingExecutor {
    async fn execute(&self, request: &ToolCallRequest, cancel: CancellationToken) -> ExecutionOutcome {
        self.executed
            .lock()
            .unwrap()
            .push(request.request_id.clone());
        match &self.behaviour {
            Behaviour::Succeed => ExecutionOutcome::success(format!("ok: {}", request.tool)),
            Behaviour::Fail(message) => ExecutionOutcome::error(message.clone()),
            Behaviour::WaitForCancel => {
                cancel.cancelled().await;
                ExecutionOutcome::error("cancelled")
            },
        }
    }
}

/// Wires an engine, its event stream, an audit trail and a recording executor.
#[allow(dead_code)]
pub struct GateHarness {
    /// The engine under test.
    pub engine: ToolCallEngine,
    /// Terminal events recorded through the synchronous registry.
    pub audit: Arc<AuditTrail>,
    /// Executor used by [`GateHarness::start`].
    pub recorder: Arc<RecordingExecutor>,
    /// Every event published since the harness was built.
    pub events: EventReceiver,
    dispatcher: Option<JoinHandle<usize>>,
}

#[allow(dead_code)]
impl GateHarness {
    /// Harness with default engine settings and a succeeding executor.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default(), Behaviour::Succeed)
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Self {
        Self::with_config(EngineConfig::default(), behaviour)
    }

    pub fn with_config(config: EngineConfig, behaviour: Behaviour) -> Self {
        let engine = ToolCallEngine::new(config);
        let audit = Arc::new(AuditTrail::new());
        engine
            .bus()
            .registry()
            .register(Arc::clone(&audit) as Arc<dyn EventSubscriber>);
        let events = engine.subscribe();

        Self {
            engine,
            audit,
            recorder: Arc::new(RecordingExecutor::new(behaviour)),
            events,
            dispatcher: None,
        }
    }

    /// Start dispatching approved calls to the recording executor.
    pub fn start(&mut self) {
        let executor = Arc::clone(&self.recorder) as Arc<dyn ToolExecutor>;
        self.start_with(executor);
    }

    /// Start dispatching approved calls to `executor`.
    pub fn start_with(&mut self, executor: Arc<dyn ToolExecutor>) {
        self.dispatcher = spawn_dispatcher(&self.engine, executor);
        assert!(self.dispatcher.is_some(), "dispatcher already started");
    }

    pub fn submit(&self, request: ToolCallRequest) -> Submission {
        self.engine.submit(request).unwrap()
    }

    /// Events published so far that have not been read yet.
    pub fn drain(&mut self) -> Vec<Arc<GateEvent>> {
        self.events.drain()
    }

    /// `(request_id, status)` of every unread tool-call event.
    pub fn timeline(&mut self) -> Vec<(String, ToolRunStatus)> {
        self.drain()
            .iter()
            .filter_map(|event| event.as_tool_call())
            .map(|call| (call.request_id().as_str().to_owned(), call.status))
            .collect()
    }

    /// Wait for the terminal event of `request_id`.
    pub async fn settled(&mut self, request_id: &str) -> ToolCall {
        let wait = async {
            loop {
                let event = self.events.recv().await.expect("event bus closed");
                if let Some(call) = event.as_tool_call() {
                    if call.request_id().as_str() == request_id && call.is_terminal() {
                        return call.clone();
                    }
                }
            }
        };
        tokio::time::timeout(SETTLE_TIMEOUT, wait)
            .await
            .unwrap_or_else(|_| panic!("request {request_id} never settled"))
    }
}

impl Drop for GateHarness {
    fn drop(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
    }
}

/// Build a request with a fixed identifier.
pub fn request(session: &str, id: &str, tool: &str, args: Value) -> ToolCallRequest {
    let arguments: ToolArguments = match args {
        Value::Object(map) => map,
        _ => ToolArguments::new(),
    };
    ToolCallRequest::new(SessionId::from(session), tool, arguments).with_request_id(id)
}

#[allow(dead_code)]
pub fn request_id(id: &str) -> RequestId {
    RequestId::from(id)
}

#[allow(dead_code)]
pub fn session(id: &str) -> SessionId {
    SessionId::from(id)
}
