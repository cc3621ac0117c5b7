//! Scripted stand-ins for the desktop, the planner and the verifier.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use deskpilot_lib::agent_engine::action::PlannedAction;
use deskpilot_lib::agent_engine::engine::{AgentEngine, Collaborators};
use deskpilot_lib::agent_engine::event_bus::{EventBus, StatusEvent};
use deskpilot_lib::agent_engine::loop_control::StopHandle;
use deskpilot_lib::agent_engine::parser::parse_planner_output;
use deskpilot_lib::agent_engine::task_history::TaskHistory;
use deskpilot_lib::config::AppConfig;
use deskpilot_lib::errors::{DeskPilotError, DeskPilotResult};
use deskpilot_lib::executor::primitive::{Actuator, PrimitiveAction, PrimitiveResult};
use deskpilot_lib::perception::gate::{FixedGate, ScreenshotGate};
use deskpilot_lib::perception::traits::{ScanContext, Sensor};
use deskpilot_lib::perception::types::{Bounds, ElementDescriptor, Screenshot};
use deskpilot_lib::planner::{CompletionVerifier, Planner, PlannerRequest, Verdict, VerifyRequest};

pub fn element(selector: &str, role: &str, name: &str) -> ElementDescriptor {
    ElementDescriptor {
        role: role.into(),
        name: name.into(),
        selector: selector.into(),
        bounds: Some(Bounds {
            x: 100.0,
            y: 100.0,
            width: 40.0,
            height: 20.0,
        }),
        clickable: true,
        focused: false,
    }
}

type FailRule = Box<dyn Fn(&PrimitiveAction) -> bool + Send + Sync>;
type SceneRule = Box<dyn Fn(&PrimitiveAction, &mut Vec<ElementDescriptor>) + Send + Sync>;

/// In-memory desktop. Primitives can rewrite the visible elements.
pub struct FakeDesktop {
    elements: Mutex<Vec<ElementDescriptor>>,
    performed: Mutex<Vec<PrimitiveAction>>,
    scans: Mutex<Vec<ScanContext>>,
    fail_when: Option<FailRule>,
    on_perform: Option<SceneRule>,
    panic_on_perform: bool,
    front_app: Mutex<Option<String>>,
}

impl FakeDesktop {
    pub fn new(elements: Vec<ElementDescriptor>) -> Self {
        Self {
            elements: Mutex::new(elements),
            performed: Mutex::new(Vec::new()),
            scans: Mutex::new(Vec::new()),
            fail_when: None,
            on_perform: None,
            panic_on_perform: false,
            front_app: Mutex::new(None),
        }
    }

    pub fn failing(mut self, rule: impl Fn(&PrimitiveAction) -> bool + Send + Sync + 'static) -> Self {
        self.fail_when = Some(Box::new(rule));
        self
    }

    pub fn with_scene(
        mut self,
        rule: impl Fn(&PrimitiveAction, &mut Vec<ElementDescriptor>) + Send + Sync + 'static,
    ) -> Self {
        self.on_perform = Some(Box::new(rule));
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_perform = true;
        self
    }

    pub fn performed(&self) -> Vec<PrimitiveAction> {
        self.performed.lock().unwrap().clone()
    }

    pub fn scans(&self) -> Vec<ScanContext> {
        self.scans.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sensor for FakeDesktop {
    async fn scan(&self, ctx: &ScanContext) -> DeskPilotResult<Vec<ElementDescriptor>> {
        self.scans.lock().unwrap().push(ctx.clone());
        Ok(self.elements.lock().unwrap().clone())
    }

    async fn screenshot(&self) -> DeskPilotResult<Option<Screenshot>> {
        Ok(Some(Screenshot::png("iVBORw0KGgo=".into())))
    }

    async fn focused_app(&self) -> DeskPilotResult<Option<String>> {
        Ok(self.front_app.lock().unwrap().clone())
    }
}

#[async_trait]
impl Actuator for FakeDesktop {
    async fn perform(&self, action: &PrimitiveAction) -> PrimitiveResult {
        if self.panic_on_perform {
            panic!("accessibility bridge crashed");
        }
        self.performed.lock().unwrap().push(action.clone());
        if self.fail_when.as_ref().is_some_and(|f| f(action)) {
            return PrimitiveResult::failure(format!("{} had no effect", action.name()));
        }
        if let PrimitiveAction::OpenApp { app_name } = action {
            *self.front_app.lock().unwrap() = Some(app_name.clone());
        }
        if let Some(rule) = &self.on_perform {
            rule(action, &mut self.elements.lock().unwrap());
        }
        PrimitiveResult::ok(format!("{} done", action.name()))
    }
}

/// One scripted planner answer.
#[derive(Clone)]
pub enum Reply {
    Action(PlannedAction),
    /// Raw model text, run through the output parser.
    Raw(String),
    Fail(String),
    /// Never answers; exercises the planner timeout.
    Hang,
    /// Raise the stop flag, then answer.
    StopThen(StopHandle, PlannedAction),
}

type PlanFn = Box<dyn Fn(&PlannerRequest, usize) -> Reply + Send + Sync>;

pub struct ScriptedPlanner {
    script: PlanFn,
    requests: Mutex<Vec<PlannerRequest>>,
}

impl ScriptedPlanner {
    /// Answers in order; the last reply repeats once the script runs out.
    pub fn sequence(replies: Vec<Reply>) -> Self {
        Self::from_fn(move |_, call| {
            let i = call.min(replies.len().saturating_sub(1));
            replies[i].clone()
        })
    }

    pub fn from_fn(f: impl Fn(&PlannerRequest, usize) -> Reply + Send + Sync + 'static) -> Self {
        Self {
            script: Box::new(f),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PlannerRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(&self, req: &PlannerRequest) -> DeskPilotResult<PlannedAction> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(req.clone());
            requests.len() - 1
        };
        match (self.script)(req, call) {
            Reply::Action(p) => Ok(p),
            Reply::Raw(text) => Ok(parse_planner_output(&text)),
            Reply::Fail(msg) => Err(DeskPilotError::Planner(msg)),
            Reply::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(DeskPilotError::Planner("unreachable".into()))
            }
            Reply::StopThen(stop, p) => {
                stop.request_stop();
                Ok(p)
            }
        }
    }
}

type VerifyFn = Box<dyn Fn(&VerifyRequest) -> DeskPilotResult<Verdict> + Send + Sync>;

pub struct ScriptedVerifier {
    replies: Mutex<VecDeque<DeskPilotResult<Verdict>>>,
    judge: Option<VerifyFn>,
    calls: AtomicUsize,
    saw_screenshot: Mutex<Vec<bool>>,
}

impl ScriptedVerifier {
    /// Answers in order; once empty, every claim is accepted.
    pub fn sequence(replies: Vec<DeskPilotResult<Verdict>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            judge: None,
            calls: AtomicUsize::new(0),
            saw_screenshot: Mutex::new(Vec::new()),
        }
    }

    pub fn judging(f: impl Fn(&VerifyRequest) -> DeskPilotResult<Verdict> + Send + Sync + 'static) -> Self {
        Self {
            judge: Some(Box::new(f)),
            ..Self::sequence(Vec::new())
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn saw_screenshot(&self) -> Vec<bool> {
        self.saw_screenshot.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionVerifier for ScriptedVerifier {
    async fn verify(&self, req: &VerifyRequest) -> DeskPilotResult<Verdict> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.saw_screenshot
            .lock()
            .unwrap()
            .push(req.observation.screenshot.is_some());
        if let Some(judge) = &self.judge {
            return judge(req);
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Verdict::complete("looks complete")))
    }
}

pub fn test_config(max_steps: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.agent.max_steps = max_steps;
    config.agent.planner_timeout_secs = 1;
    config.agent.observe_timeout_secs = 1;
    config.agent.actuator_timeout_secs = 1;
    config.agent.verify_timeout_secs = 1;
    config.agent.settle_ms = 10;
    config
}

pub struct Harness {
    pub engine: AgentEngine,
    pub desktop: Arc<FakeDesktop>,
    pub planner: Arc<ScriptedPlanner>,
    pub verifier: Arc<ScriptedVerifier>,
    pub history: Arc<TaskHistory>,
    pub events: EventBus,
}

impl Harness {
    pub fn new(
        config: AppConfig,
        desktop: FakeDesktop,
        planner: ScriptedPlanner,
        verifier: ScriptedVerifier,
    ) -> Self {
        Self::with_gate(config, desktop, planner, verifier, Arc::new(FixedGate(false)))
    }

    pub fn with_gate(
        config: AppConfig,
        desktop: FakeDesktop,
        planner: ScriptedPlanner,
        verifier: ScriptedVerifier,
        gate: Arc<dyn ScreenshotGate>,
    ) -> Self {
        let desktop = Arc::new(desktop);
        let planner = Arc::new(planner);
        let verifier = Arc::new(verifier);
        let history = Arc::new(TaskHistory::new(config.history.task_capacity));
        let events = EventBus::new();
        let engine = AgentEngine::new(
            Collaborators {
                sensor: desktop.clone(),
                actuator: desktop.clone(),
                planner: planner.clone(),
                verifier: verifier.clone(),
                gate,
            },
            &config,
            Arc::clone(&history),
            events.clone(),
        )
        .expect("engine builds from test config");
        Self {
            engine,
            desktop,
            planner,
            verifier,
            history,
            events,
        }
    }
}

/// Everything currently buffered on a subscription.
pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
