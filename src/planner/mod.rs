//! Decision seams of the control loop: choosing the next action and checking
//! a completion claim. Both are injected into the engine as trait objects.

pub mod llm_planner;
pub mod prompt;
pub mod verifier;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent_engine::action::PlannedAction;
use crate::agent_engine::loop_control::Escalation;
use crate::errors::DeskPilotResult;
use crate::perception::types::{ElementDescriptor, Observation};

/// Everything the planner sees for one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerRequest {
    pub task: String,
    pub step: u32,
    pub max_steps: u32,
    pub observation: Observation,
    /// Bounded rendering of this task's action log.
    pub memory: String,
    /// Bounded rendering of earlier tasks. Context only.
    pub task_history: String,
    /// Consecutive failures of the most recent (kind, intent) pair.
    pub last_action_failures: u32,
    /// Set once the same action has failed too often; the planner must change approach.
    pub escalation: Option<Escalation>,
    pub target_app: Option<String>,
}

impl PlannerRequest {
    pub fn elements(&self) -> &[ElementDescriptor] {
        &self.observation.elements
    }

    pub fn failure_flag(&self) -> bool {
        self.escalation.is_some()
    }
}

/// Picks exactly one action per call.
///
/// Malformed model output is not an error: it comes back as an
/// [`Action::Invalid`](crate::agent_engine::action::Action::Invalid). `Err`
/// means the planner could not be reached at all.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, req: &PlannerRequest) -> DeskPilotResult<PlannedAction>;
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub task: String,
    /// Fresh observation taken after the `done` claim.
    pub observation: Observation,
    pub memory: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub complete: bool,
    pub reason: String,
}

impl Verdict {
    pub fn complete(reason: impl Into<String>) -> Self {
        Self {
            complete: true,
            reason: reason.into(),
        }
    }

    pub fn incomplete(reason: impl Into<String>) -> Self {
        Self {
            complete: false,
            reason: reason.into(),
        }
    }
}

/// Independent check of a `done` claim.
#[async_trait]
pub trait CompletionVerifier: Send + Sync {
    async fn verify(&self, req: &VerifyRequest) -> DeskPilotResult<Verdict>;
}
