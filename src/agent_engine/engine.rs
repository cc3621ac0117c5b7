use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::agent_engine::action::{Action, ActionKind, PlannedAction};
use crate::agent_engine::event_bus::{EventBus, StatusEmitter};
use crate::agent_engine::history::{sessions_dir, ActionLog, ActionLogEntry, ExecutionRecord};
use crate::agent_engine::intent::{classify_plan, classify_task, PlanSignal, TaskIntent};
use crate::agent_engine::loop_control::{
    FailureKey, LoopController, RetryStrategy, StopHandle, StopReason, StopToken,
};
use crate::agent_engine::state::{AbortReason, AgentState, LoopConfig, OutcomeKind, TerminalOutcome};
use crate::agent_engine::task_history::{CompletedTask, TaskHistory};
use crate::config::{AppConfig, HistoryConfig};
use crate::errors::DeskPilotResult;
use crate::executor::dispatcher::Dispatcher;
use crate::executor::primitive::Actuator;
use crate::executor::safety::SafetyPolicy;
use crate::executor::verify::verification_for;
use crate::perception::gate::ScreenshotGate;
use crate::perception::pipeline::{ObserveRequest, StateObserver};
use crate::perception::traits::Sensor;
use crate::planner::{CompletionVerifier, Planner, PlannerRequest, Verdict, VerifyRequest};

/// Extra pause before dispatching after an `AddDelay` escalation.
const ESCALATION_DELAY: Duration = Duration::from_millis(500);

/// External collaborators of the loop. Each one is swappable for tests.
pub struct Collaborators {
    pub sensor: Arc<dyn Sensor>,
    pub actuator: Arc<dyn Actuator>,
    pub planner: Arc<dyn Planner>,
    pub verifier: Arc<dyn CompletionVerifier>,
    pub gate: Arc<dyn ScreenshotGate>,
}

/// Runs tasks through the PLANNING → EXECUTING → VERIFYING loop.
///
/// `execute_task` takes `&self`, so several tasks may run at once on one
/// engine. They share the task history and the stop handle but nothing else;
/// a stop request reaches every task running at that moment.
/// They also share the desktop: callers must not run two UI-mutating tasks
/// against the same session concurrently.
pub struct AgentEngine {
    sensor: Arc<dyn Sensor>,
    planner: Arc<dyn Planner>,
    verifier: Arc<dyn CompletionVerifier>,
    gate: Arc<dyn ScreenshotGate>,
    dispatcher: Dispatcher,
    task_history: Arc<TaskHistory>,
    events: EventBus,
    stop: StopHandle,
    loop_config: LoopConfig,
    history_config: HistoryConfig,
    max_elements: usize,
}

/// Mutable state owned by one task execution.
struct TaskRun<'a> {
    task_id: String,
    task: &'a str,
    intent: TaskIntent,
    stop: StopToken,
    emitter: StatusEmitter,
    state: AgentState,
    ctrl: LoopController,
    observer: StateObserver,
    log: ActionLog,
    target_app: Option<String>,
    last_action: Option<ActionKind>,
    last_failed: bool,
}

impl TaskRun<'_> {
    fn enter(&mut self, next: AgentState) {
        tracing::debug!(task_id = %self.task_id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
    }

    fn log_step(&mut self, step: u32, planned: PlannedAction, record: ExecutionRecord) {
        let entry = ActionLogEntry {
            step,
            planned,
            timestamp_iso: Utc::now().to_rfc3339(),
            executed: Some(record),
        };
        self.emitter.action(step, entry.render_line());
        self.log.append(entry);
    }
}

/// How the loop ended, before it is turned into a [`TerminalOutcome`].
struct Finish {
    kind: OutcomeKind,
    success: bool,
    summary: String,
}

impl Finish {
    fn new(kind: OutcomeKind, success: bool, summary: impl Into<String>) -> Self {
        Self {
            kind,
            success,
            summary: summary.into(),
        }
    }
}

impl AgentEngine {
    pub fn new(
        collaborators: Collaborators,
        config: &AppConfig,
        task_history: Arc<TaskHistory>,
        events: EventBus,
    ) -> DeskPilotResult<Self> {
        let loop_config = LoopConfig::from(&config.agent);
        let safety = SafetyPolicy::from_config(&config.safety)?;
        let dispatcher = Dispatcher::new(collaborators.actuator, safety, loop_config.actuator_timeout);
        Ok(Self {
            sensor: collaborators.sensor,
            planner: collaborators.planner,
            verifier: collaborators.verifier,
            gate: collaborators.gate,
            dispatcher,
            task_history,
            events,
            stop: StopHandle::new(),
            loop_config,
            history_config: config.history.clone(),
            max_elements: config.actuator.max_elements,
        })
    }

    /// Use a caller-owned stop flag instead of a private one.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    /// Clone of the handle whose requests stop every running task.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn task_history(&self) -> &Arc<TaskHistory> {
        &self.task_history
    }

    pub fn loop_config(&self) -> &LoopConfig {
        &self.loop_config
    }

    /// Runs one task to a terminal outcome. Never returns an error: failures of
    /// any kind end up in the outcome and in exactly one terminal status event.
    pub async fn execute_task(&self, task: &str) -> TerminalOutcome {
        let task_id = uuid::Uuid::new_v4().to_string();
        let started = Utc::now();
        let intent = classify_task(task);
        tracing::info!(task_id = %task_id, task = %task, ?intent, "task started");

        if intent == TaskIntent::Halt {
            // A bare stop command halts whatever is running and plans nothing itself.
            self.stop.request_stop();
            let emitter = self.events.emitter(&task_id);
            let finish = Finish::new(OutcomeKind::Stopped, true, "Stopped at user request");
            return self.finish(task_id, task, started, &emitter, ActionLog::new(""), 0, finish);
        }

        let stop = self.stop.token();
        let mut log = ActionLog::new(&task_id);
        if self.history_config.persist_sessions {
            log = log.with_session_file(&sessions_dir());
        }
        let mut run = TaskRun {
            emitter: self.events.emitter(&task_id),
            task_id,
            task,
            intent,
            ctrl: LoopController::new(self.loop_config.clone(), stop.clone()),
            stop,
            state: AgentState::Idle,
            observer: StateObserver::new(
                Arc::clone(&self.sensor),
                Arc::clone(&self.gate),
                self.loop_config.observe_timeout,
                self.max_elements,
            ),
            log,
            target_app: None,
            last_action: None,
            last_failed: false,
        };

        let finish = self.run_loop(&mut run).await;
        let steps = run.ctrl.step();
        let TaskRun {
            task_id,
            emitter,
            log,
            ..
        } = run;
        self.finish(task_id, task, started, &emitter, log, steps, finish)
    }

    async fn run_loop(&self, run: &mut TaskRun<'_>) -> Finish {
        loop {
            // ── Budget / stop check ───────────────────────────────────────
            if let Some(reason) = run.ctrl.should_stop() {
                let (abort, finish) = match reason {
                    StopReason::UserRequested => (
                        AbortReason::UserRequested,
                        Finish::new(
                            OutcomeKind::Stopped,
                            false,
                            format!("Stopped at user request after {} steps", run.ctrl.step()),
                        ),
                    ),
                    StopReason::BudgetExhausted => (
                        AbortReason::BudgetExhausted,
                        Finish::new(
                            OutcomeKind::BudgetExhausted,
                            false,
                            format!(
                                "Did not complete within {} steps ({} failed)",
                                run.ctrl.max_steps(),
                                run.ctrl.total_failures()
                            ),
                        ),
                    ),
                };
                tracing::info!(task_id = %run.task_id, ?abort, "loop aborted");
                run.enter(AgentState::Aborted { reason: abort });
                return finish;
            }

            // ── Planning ──────────────────────────────────────────────────
            let step = run.ctrl.begin_step();
            run.enter(AgentState::Planning { step });
            run.emitter
                .step(step, format!("Step {step}/{}", run.ctrl.max_steps()));

            let memory = run.log.render(
                self.history_config.memory_max_entries,
                self.history_config.memory_max_chars,
            );
            let observation = run
                .observer
                .observe(&ObserveRequest {
                    task: run.task,
                    step,
                    memory: &memory,
                    last_action: run.last_action,
                    last_failed: run.last_failed,
                    target_app: run.target_app.clone(),
                })
                .await;

            let escalation = run.ctrl.escalation(!observation.elements.is_empty());
            if let Some(esc) = &escalation {
                tracing::warn!(
                    task_id = %run.task_id,
                    step,
                    strategy = ?esc.strategy,
                    failures = esc.failures,
                    "forcing strategy change"
                );
                run.emitter.thinking(step, esc.render());
            }
            let last_action_failures = run.ctrl.last_failures();

            let request = PlannerRequest {
                task: run.task.to_string(),
                step,
                max_steps: run.ctrl.max_steps(),
                observation,
                memory: memory.clone(),
                task_history: self.task_history.render(self.history_config.tasks_in_prompt),
                last_action_failures,
                escalation: escalation.clone(),
                target_app: run.target_app.clone(),
            };
            run.emitter.thinking(step, "Deciding next action");
            let planned = self.plan(&request).await;
            tracing::info!(
                task_id = %run.task_id,
                step,
                action = %planned.kind(),
                intent = %planned.intent,
                "action planned"
            );

            match classify_plan(run.intent, &planned) {
                PlanSignal::Stop => {
                    let summary = done_summary(&planned, "Stopped as requested");
                    run.log_step(step, planned, ExecutionRecord::ok("stop accepted without verification"));
                    run.enter(AgentState::Done {
                        summary: summary.clone(),
                    });
                    return Finish::new(OutcomeKind::Completed, true, summary);
                }
                PlanSignal::DoneClaim => {
                    run.enter(AgentState::Verifying {
                        step,
                        completion_check: true,
                    });
                    let verdict = self.verify_completion(run, &memory).await;
                    if verdict.complete {
                        let summary = done_summary(&planned, &verdict.reason);
                        run.ctrl.record_outcome(&planned, true);
                        run.log_step(
                            step,
                            planned,
                            ExecutionRecord::ok("completion verified")
                                .with_verification(Some(verdict.reason)),
                        );
                        run.enter(AgentState::Done {
                            summary: summary.clone(),
                        });
                        return Finish::new(OutcomeKind::Completed, true, summary);
                    }
                    tracing::info!(task_id = %run.task_id, step, reason = %verdict.reason, "done claim rejected");
                    run.ctrl.record_outcome(&planned, false);
                    run.log_step(
                        step,
                        planned,
                        ExecutionRecord::failed(format!(
                            "task not complete yet: {}",
                            verdict.reason
                        )),
                    );
                    run.last_action = Some(ActionKind::Done);
                    run.last_failed = true;
                    continue;
                }
                PlanSignal::Continue => {}
            }

            // ── Repeated-failure guard ────────────────────────────────────
            if run.ctrl.is_blocked(&planned) {
                let failures = run.ctrl.failures_for(&FailureKey::of(&planned));
                tracing::warn!(
                    task_id = %run.task_id,
                    step,
                    action = %planned.kind(),
                    failures,
                    "identical action refused"
                );
                let kind = planned.kind();
                run.ctrl.record_outcome(&planned, false);
                run.log_step(
                    step,
                    planned,
                    ExecutionRecord::failed(format!(
                        "refused: this exact action already failed {failures} times; choose a different approach"
                    )),
                );
                run.last_action = Some(kind);
                run.last_failed = true;
                continue;
            }

            if escalation.is_some_and(|e| e.strategy == RetryStrategy::AddDelay) {
                tokio::time::sleep(ESCALATION_DELAY).await;
            }

            // ── Executing ─────────────────────────────────────────────────
            run.enter(AgentState::Executing {
                step,
                action: planned.clone(),
            });
            run.emitter.thinking(step, format!("{}: {}", planned.action.describe(), planned.intent));
            let before = request.observation.elements;
            let dispatched = match self.dispatcher.dispatch(&planned.action, &before).await {
                Ok(d) => d,
                Err(e) => {
                    tracing::error!(task_id = %run.task_id, step, "actuator failure: {e}");
                    run.log_step(step, planned, ExecutionRecord::failed(e.to_string()));
                    run.enter(AgentState::Error(e.to_string()));
                    return Finish::new(OutcomeKind::Error, false, e.to_string());
                }
            };

            // ── Verifying ─────────────────────────────────────────────────
            run.enter(AgentState::Verifying {
                step,
                completion_check: false,
            });
            let success = dispatched.result.success;
            let touched_os = dispatched.primitive.is_some();
            let after = if touched_os && success {
                run.observer
                    .settle(run.target_app.clone(), self.loop_config.settle, &run.stop, &before)
                    .await
            } else {
                before.clone()
            };
            let front_app = match &planned.action {
                Action::OpenApp { app_name } if success => {
                    run.target_app = Some(app_name.clone());
                    run.observer.focused_app().await
                }
                _ => None,
            };
            let verification = verification_for(
                &planned.action,
                &dispatched.result,
                &before,
                &after,
                front_app.as_deref(),
            );

            let record = if success {
                ExecutionRecord::ok(&dispatched.result.message).with_verification(verification)
            } else {
                ExecutionRecord::failed(&dispatched.result.message)
            };
            tracing::info!(
                task_id = %run.task_id,
                step,
                action = %planned.kind(),
                success,
                message = %dispatched.result.message,
                "step finished"
            );
            let kind = planned.kind();
            run.ctrl.record_outcome(&planned, success);
            run.log_step(step, planned, record);
            run.last_action = Some(kind);
            run.last_failed = !success;
        }
    }

    /// Planner errors and timeouts become an invalid action: one failed step.
    async fn plan(&self, request: &PlannerRequest) -> PlannedAction {
        let limit = self.loop_config.planner_timeout;
        match tokio::time::timeout(limit, self.planner.plan(request)).await {
            Ok(Ok(planned)) => planned,
            Ok(Err(e)) => {
                tracing::warn!(step = request.step, "planner failed: {e}");
                PlannedAction::invalid("<planner error>", format!("planner failed: {e}"))
            }
            Err(_) => {
                tracing::warn!(step = request.step, secs = limit.as_secs(), "planner timed out");
                PlannedAction::invalid(
                    "<planner timeout>",
                    format!("planner timed out after {}s", limit.as_secs()),
                )
            }
        }
    }

    /// Fresh full observation plus an independent check. Errors reject the claim.
    async fn verify_completion(&self, run: &TaskRun<'_>, memory: &str) -> Verdict {
        let step = run.ctrl.step();
        run.emitter
            .thinking(step, "Checking whether the task is actually complete");
        let observation = run.observer.full_observation(run.target_app.clone()).await;
        let req = VerifyRequest {
            task: run.task.to_string(),
            observation,
            memory: memory.to_string(),
        };
        let limit = self.loop_config.verify_timeout;
        match tokio::time::timeout(limit, self.verifier.verify(&req)).await {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                tracing::warn!(step, "completion check failed: {e}");
                Verdict::incomplete(format!("completion check failed: {e}"))
            }
            Err(_) => {
                tracing::warn!(step, secs = limit.as_secs(), "completion check timed out");
                Verdict::incomplete(format!("completion check timed out after {}s", limit.as_secs()))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        task_id: String,
        task: &str,
        started: chrono::DateTime<Utc>,
        emitter: &StatusEmitter,
        log: ActionLog,
        steps: u32,
        finish: Finish,
    ) -> TerminalOutcome {
        let entries = log.into_entries();
        let outcome = TerminalOutcome {
            task_id,
            success: finish.success,
            summary: finish.summary,
            kind: finish.kind,
            steps,
            action_log: entries,
        };

        self.task_history.record(CompletedTask {
            id: outcome.task_id.clone(),
            task: task.to_string(),
            start_time: started,
            end_time: Utc::now(),
            success: outcome.success,
            summary: outcome.summary.clone(),
            final_state: outcome.final_state().to_string(),
            actions_performed: outcome
                .action_log
                .iter()
                .filter(|e| e.succeeded())
                .map(|e| e.planned.action.describe())
                .collect(),
        });

        match outcome.kind {
            OutcomeKind::Error => emitter.error(outcome.summary.clone()),
            _ => emitter.completion(outcome.success, outcome.summary.clone()),
        }
        tracing::info!(
            task_id = %outcome.task_id,
            state = outcome.final_state(),
            success = outcome.success,
            steps,
            "task finished"
        );
        outcome
    }
}

fn done_summary(planned: &PlannedAction, fallback: &str) -> String {
    match &planned.action {
        Action::Done {
            summary: Some(summary),
        } if !summary.trim().is_empty() => summary.clone(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::action::Target;
    use crate::executor::primitive::{PrimitiveAction, PrimitiveResult};
    use crate::perception::gate::FixedGate;
    use crate::perception::traits::ScanContext;
    use crate::perception::types::{ElementDescriptor, Screenshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticSensor;

    #[async_trait]
    impl Sensor for StaticSensor {
        async fn scan(&self, _ctx: &ScanContext) -> DeskPilotResult<Vec<ElementDescriptor>> {
            Ok(Vec::new())
        }

        async fn screenshot(&self) -> DeskPilotResult<Option<Screenshot>> {
            Ok(None)
        }
    }

    struct OkActuator;

    #[async_trait]
    impl Actuator for OkActuator {
        async fn perform(&self, action: &PrimitiveAction) -> PrimitiveResult {
            PrimitiveResult::ok(format!("{} ok", action.name()))
        }
    }

    struct Scripted(Mutex<Vec<PlannedAction>>);

    #[async_trait]
    impl Planner for Scripted {
        async fn plan(&self, _req: &PlannerRequest) -> DeskPilotResult<PlannedAction> {
            let mut queue = self.0.lock().unwrap();
            Ok(if queue.is_empty() {
                PlannedAction::new(Action::Wait { millis: 1 }, "idle")
            } else {
                queue.remove(0)
            })
        }
    }

    struct Accept;

    #[async_trait]
    impl CompletionVerifier for Accept {
        async fn verify(&self, _req: &VerifyRequest) -> DeskPilotResult<Verdict> {
            Ok(Verdict::complete("looks done"))
        }
    }

    fn engine(plan: Vec<PlannedAction>) -> AgentEngine {
        let mut config = AppConfig::default();
        config.agent.settle_ms = 10;
        AgentEngine::new(
            Collaborators {
                sensor: Arc::new(StaticSensor),
                actuator: Arc::new(OkActuator),
                planner: Arc::new(Scripted(Mutex::new(plan))),
                verifier: Arc::new(Accept),
                gate: Arc::new(FixedGate(false)),
            },
            &config,
            Arc::new(TaskHistory::new(5)),
            EventBus::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn open_app_sets_target_and_done_is_verified() {
        let e = engine(vec![
            PlannedAction::new(Action::OpenApp { app_name: "Notes".into() }, "open notes"),
            PlannedAction::new(Action::Done { summary: Some("Notes is open".into()) }, "finished"),
        ]);
        let outcome = e.execute_task("open Notes").await;
        assert!(outcome.success);
        assert_eq!(outcome.kind, OutcomeKind::Completed);
        assert_eq!(outcome.summary, "Notes is open");
        assert_eq!(outcome.steps, 2);
        let snap = e.task_history().snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].actions_performed, vec!["Opened (Notes)", "Completed task"]);
    }

    #[tokio::test]
    async fn missing_element_with_empty_scan_is_passed_through() {
        let e = engine(vec![
            PlannedAction::new(
                Action::Click { target: Target::Element { selector: "Save".into() } },
                "press save",
            ),
            PlannedAction::new(Action::Done { summary: None }, "saved"),
        ]);
        let outcome = e.execute_task("save the file").await;
        assert!(outcome.action_log[0].succeeded());
        assert_eq!(outcome.summary, "looks done");
    }

    #[tokio::test]
    async fn halt_task_records_history_without_steps() {
        let e = engine(Vec::new());
        let outcome = e.execute_task("stop").await;
        assert_eq!(outcome.kind, OutcomeKind::Stopped);
        assert_eq!(outcome.steps, 0);
        assert_eq!(e.stop_handle().requests(), 1);
        assert_eq!(e.task_history().snapshot()[0].final_state, "stopped");
    }
}
