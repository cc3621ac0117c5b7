use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent_engine::action::{ActionKind, PlannedAction};
use crate::agent_engine::state::LoopConfig;

/// Engine-wide stop switch. Every request stops all tasks running at that
/// moment; tasks started afterwards are unaffected. Nothing ever clears it.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicU64>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of stop requests made so far.
    pub fn requests(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Token for one task, armed by any request made after this call.
    pub fn token(&self) -> StopToken {
        StopToken {
            handle: self.clone(),
            armed_at: self.requests(),
        }
    }
}

/// Per-task view of a [`StopHandle`]. Checked at the top of every loop
/// iteration; a primitive that has already been dispatched is allowed to finish.
#[derive(Debug, Clone)]
pub struct StopToken {
    handle: StopHandle,
    armed_at: u64,
}

impl StopToken {
    pub fn is_stop_requested(&self) -> bool {
        self.handle.requests() != self.armed_at
    }
}

/// Key for the consecutive-failure counter: action kind plus normalized intent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureKey {
    pub kind: ActionKind,
    pub intent: String,
}

impl FailureKey {
    pub fn of(planned: &PlannedAction) -> Self {
        Self {
            kind: planned.kind(),
            intent: planned
                .intent
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .to_lowercase(),
        }
    }
}

/// How the planner should change course after repeated identical failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Click or focus the input field before typing again.
    Refocus,
    /// Give the UI time to settle before the next attempt.
    AddDelay,
    /// Target a different element or selector.
    SwitchSelector,
    /// Use a different kind of action altogether.
    SwitchActionType,
}

impl RetryStrategy {
    pub fn choose(kind: ActionKind, elements_available: bool) -> Self {
        match kind {
            ActionKind::Type => RetryStrategy::Refocus,
            ActionKind::Key => RetryStrategy::AddDelay,
            k if k.is_pointer() && elements_available => RetryStrategy::SwitchSelector,
            _ => RetryStrategy::SwitchActionType,
        }
    }

    pub fn instruction(&self) -> &'static str {
        match self {
            RetryStrategy::Refocus => {
                "click or focus the target input field first, then type"
            }
            RetryStrategy::AddDelay => {
                "wait for the interface to settle, then try a different key or shortcut"
            }
            RetryStrategy::SwitchSelector => {
                "pick a different element/selector from the current element list"
            }
            RetryStrategy::SwitchActionType => {
                "use a different type of action (e.g. keyboard shortcut, open_app, navigate_to_url)"
            }
        }
    }
}

/// Injected into the next planner request once the same action failed too often.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Escalation {
    pub key: FailureKey,
    pub failures: u32,
    pub strategy: RetryStrategy,
}

impl Escalation {
    pub fn render(&self) -> String {
        format!(
            "STRATEGY CHANGE REQUIRED: the action [{}] \"{}\" has failed {} times in a row. \
             Do NOT repeat it; {}.",
            self.key.kind, self.key.intent, self.failures, self.strategy.instruction()
        )
    }
}

/// Why the loop may not continue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    UserRequested,
    BudgetExhausted,
}

/// Per-task loop bookkeeping: step budget, stop flag and the consecutive-failure counter.
pub struct LoopController {
    config: LoopConfig,
    stop: StopToken,
    step: u32,
    last_key: Option<FailureKey>,
    consecutive_failures: u32,
    total_failures: u32,
}

impl LoopController {
    pub fn new(config: LoopConfig, stop: StopToken) -> Self {
        Self {
            config,
            stop,
            step: 0,
            last_key: None,
            consecutive_failures: 0,
            total_failures: 0,
        }
    }

    pub fn step(&self) -> u32 {
        self.step
    }

    pub fn max_steps(&self) -> u32 {
        self.config.max_steps
    }

    pub fn total_failures(&self) -> u32 {
        self.total_failures
    }

    /// Checked before every iteration. Stop requests win over the budget.
    pub fn should_stop(&self) -> Option<StopReason> {
        if self.stop.is_stop_requested() {
            Some(StopReason::UserRequested)
        } else if self.step >= self.config.max_steps {
            Some(StopReason::BudgetExhausted)
        } else {
            None
        }
    }

    /// Starts a new iteration and returns its 1-based step number.
    pub fn begin_step(&mut self) -> u32 {
        self.step += 1;
        self.step
    }

    /// Consecutive failures recorded for `key` (0 if the last action differed).
    /// Consecutive failures of the most recently planned (kind, intent) pair.
    pub fn last_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn failures_for(&self, key: &FailureKey) -> u32 {
        match &self.last_key {
            Some(last) if last == key => self.consecutive_failures,
            _ => 0,
        }
    }

    /// True when `planned` is the same action that already failed the limit.
    pub fn is_blocked(&self, planned: &PlannedAction) -> bool {
        self.failures_for(&FailureKey::of(planned)) >= self.config.max_identical_failures
    }

    /// A different action resets the counter.
    pub fn note_planned(&mut self, planned: &PlannedAction) {
        let key = FailureKey::of(planned);
        if self.last_key.as_ref() != Some(&key) {
            self.last_key = Some(key);
            self.consecutive_failures = 0;
        }
    }

    pub fn record_outcome(&mut self, planned: &PlannedAction, success: bool) {
        self.note_planned(planned);
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.total_failures += 1;
        }
    }

    /// The escalation to pass into the next planning request, if any.
    pub fn escalation(&self, elements_available: bool) -> Option<Escalation> {
        let key = self.last_key.as_ref()?;
        if self.consecutive_failures < self.config.max_identical_failures {
            return None;
        }
        Some(Escalation {
            key: key.clone(),
            failures: self.consecutive_failures,
            strategy: RetryStrategy::choose(key.kind, elements_available),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::action::{Action, Target};

    fn ctrl(max_steps: u32) -> LoopController {
        let config = LoopConfig {
            max_steps,
            ..LoopConfig::default()
        };
        LoopController::new(config, StopHandle::new().token())
    }

    fn click(intent: &str) -> PlannedAction {
        PlannedAction::new(
            Action::Click {
                target: Target::Element { selector: "ax:1".into() },
            },
            intent,
        )
    }

    #[test]
    fn budget_and_stop() {
        let stop = StopHandle::new();
        let mut c = LoopController::new(
            LoopConfig {
                max_steps: 2,
                ..LoopConfig::default()
            },
            stop.token(),
        );
        assert_eq!(c.should_stop(), None);
        assert_eq!(c.begin_step(), 1);
        assert_eq!(c.begin_step(), 2);
        assert_eq!(c.should_stop(), Some(StopReason::BudgetExhausted));
        stop.request_stop();
        assert_eq!(c.should_stop(), Some(StopReason::UserRequested));
    }

    #[test]
    fn tokens_only_see_later_requests() {
        let stop = StopHandle::new();
        let running = stop.token();
        stop.request_stop();
        let started_after = stop.token();
        assert!(running.is_stop_requested());
        assert!(!started_after.is_stop_requested());
        assert_eq!(stop.requests(), 1);
    }

    #[test]
    fn escalates_after_three_identical_failures() {
        let mut c = ctrl(30);
        let a = click("Press Save");
        for n in 1..=3 {
            assert!(!c.is_blocked(&a));
            c.record_outcome(&a, false);
            assert_eq!(c.failures_for(&FailureKey::of(&a)), n);
        }
        assert!(c.is_blocked(&a));
        let esc = c.escalation(true).unwrap();
        assert_eq!(esc.failures, 3);
        assert_eq!(esc.strategy, RetryStrategy::SwitchSelector);
        assert!(esc.render().contains("Do NOT repeat"));
    }

    #[test]
    fn intent_whitespace_and_case_are_normalized() {
        assert_eq!(FailureKey::of(&click("Press  Save")), FailureKey::of(&click("press save")));
    }

    #[test]
    fn different_action_or_success_resets() {
        let mut c = ctrl(30);
        let a = click("press save");
        c.record_outcome(&a, false);
        c.record_outcome(&a, false);
        c.record_outcome(&click("press cancel"), false);
        assert_eq!(c.failures_for(&FailureKey::of(&a)), 0);

        c.record_outcome(&a, false);
        c.record_outcome(&a, true);
        assert_eq!(c.failures_for(&FailureKey::of(&a)), 0);
        assert!(c.escalation(true).is_none());
        assert_eq!(c.total_failures(), 4);
    }

    #[test]
    fn strategy_depends_on_kind() {
        assert_eq!(RetryStrategy::choose(ActionKind::Type, true), RetryStrategy::Refocus);
        assert_eq!(RetryStrategy::choose(ActionKind::Key, false), RetryStrategy::AddDelay);
        assert_eq!(RetryStrategy::choose(ActionKind::Click, false), RetryStrategy::SwitchActionType);
        assert_eq!(RetryStrategy::choose(ActionKind::OpenApp, true), RetryStrategy::SwitchActionType);
    }
}
