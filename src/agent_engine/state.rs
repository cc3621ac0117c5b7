use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_engine::action::PlannedAction;
use crate::agent_engine::history::ActionLogEntry;
use crate::config::AgentConfig;

/// Lifecycle states of one task execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Planning { step: u32 },
    Executing { step: u32, action: PlannedAction },
    /// `completion_check` is true when a `done` claim is being verified.
    Verifying { step: u32, completion_check: bool },
    Done { summary: String },
    Aborted { reason: AbortReason },
    Error(String),
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AgentState::Done { .. } | AgentState::Aborted { .. } | AgentState::Error(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    UserRequested,
    BudgetExhausted,
}

/// Per-task loop limits, derived from `[agent]` in config.toml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    pub max_steps: u32,
    pub max_identical_failures: u32,
    pub observe_timeout: Duration,
    pub planner_timeout: Duration,
    pub actuator_timeout: Duration,
    pub verify_timeout: Duration,
    pub settle: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for LoopConfig {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            max_steps: cfg.max_steps.max(1),
            max_identical_failures: cfg.max_identical_failures.max(1),
            observe_timeout: Duration::from_secs(cfg.observe_timeout_secs),
            planner_timeout: Duration::from_secs(cfg.planner_timeout_secs),
            actuator_timeout: Duration::from_secs(cfg.actuator_timeout_secs),
            verify_timeout: Duration::from_secs(cfg.verify_timeout_secs),
            settle: Duration::from_millis(cfg.settle_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// A verified (or stop-requested) `done`.
    Completed,
    /// The user asked to stop, either through the stop flag or a stop-phrase task.
    Stopped,
    /// Step budget reached without a verified `done`.
    BudgetExhausted,
    /// A collaborator broke its contract. The loop was torn down.
    Error,
}

/// What `execute_task` hands back to the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalOutcome {
    pub task_id: String,
    pub success: bool,
    pub summary: String,
    pub kind: OutcomeKind,
    pub steps: u32,
    pub action_log: Vec<ActionLogEntry>,
}

impl TerminalOutcome {
    pub fn final_state(&self) -> &'static str {
        match self.kind {
            OutcomeKind::Completed => "done",
            OutcomeKind::Stopped => "stopped",
            OutcomeKind::BudgetExhausted => "aborted",
            OutcomeKind::Error => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_config_follows_agent_config() {
        let cfg = AgentConfig {
            max_steps: 0,
            planner_timeout_secs: 2,
            ..AgentConfig::default()
        };
        let lc = LoopConfig::from(&cfg);
        assert_eq!(lc.max_steps, 1);
        assert_eq!(lc.max_identical_failures, 3);
        assert_eq!(lc.planner_timeout, Duration::from_secs(2));
    }

    #[test]
    fn terminal_states() {
        assert!(AgentState::Done { summary: "ok".into() }.is_terminal());
        assert!(AgentState::Aborted { reason: AbortReason::BudgetExhausted }.is_terminal());
        assert!(!AgentState::Planning { step: 1 }.is_terminal());
        let json = serde_json::to_value(AgentState::Verifying { step: 3, completion_check: true }).unwrap();
        assert_eq!(json["state"], "verifying");
    }
}
