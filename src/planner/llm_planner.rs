use std::sync::Arc;

use async_trait::async_trait;

use crate::agent_engine::action::PlannedAction;
use crate::agent_engine::parser::{parse_planner_output, parse_tool_calls};
use crate::errors::DeskPilotResult;
use crate::llm::registry::{LlmRole, ProviderRegistry};
use crate::llm::types::{ChatMessage, LlmResponse};
use crate::planner::prompt::{next_action_tool, render_planner_request, SYSTEM_PROMPT};
use crate::planner::{Planner, PlannerRequest};

/// Planner backed by the `planner` role of the provider registry.
pub struct LlmPlanner {
    registry: Arc<ProviderRegistry>,
    use_tools: bool,
}

impl LlmPlanner {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            use_tools: true,
        }
    }

    /// Plain JSON replies only, for models without function calling.
    pub fn without_tools(mut self) -> Self {
        self.use_tools = false;
        self
    }

    pub fn build_messages(req: &PlannerRequest) -> Vec<ChatMessage> {
        let text = render_planner_request(req);
        let user = match &req.observation.screenshot {
            Some(shot) => ChatMessage::user_with_image(text, shot.data_url()),
            None => ChatMessage::user(text),
        };
        vec![ChatMessage::system(SYSTEM_PROMPT), user]
    }
}

/// Tool calls win over text; anything unusable becomes an invalid action.
pub fn planned_from_response(resp: &LlmResponse) -> PlannedAction {
    if let Some(planned) = parse_tool_calls(&resp.tool_calls) {
        return planned;
    }
    parse_planner_output(&resp.content)
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, req: &PlannerRequest) -> DeskPilotResult<PlannedAction> {
        let (provider, cfg) = self.registry.call_config_for_role(LlmRole::Planner)?;
        let tools = if self.use_tools {
            vec![next_action_tool()]
        } else {
            Vec::new()
        };
        tracing::info!(
            step = req.step,
            provider = provider.name(),
            model = %cfg.model,
            elements = req.elements().len(),
            screenshot = req.observation.screenshot.is_some(),
            escalated = req.failure_flag(),
            "calling planner"
        );

        let resp = provider.chat(Self::build_messages(req), tools, &cfg).await?;
        let planned = planned_from_response(&resp);
        tracing::info!(
            step = req.step,
            action = %planned.kind(),
            intent = %planned.intent,
            "planner chose action"
        );
        Ok(planned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::action::{Action, ActionKind, Target};
    use crate::llm::types::{FunctionCall, ToolCall};
    use crate::perception::types::{Observation, Screenshot};

    fn request(screenshot: Option<Screenshot>) -> PlannerRequest {
        PlannerRequest {
            task: "open Calculator".into(),
            step: 1,
            max_steps: 30,
            observation: Observation {
                elements: Vec::new(),
                screenshot,
                screen_state: None,
            },
            memory: "No actions taken yet.".into(),
            task_history: "No previous tasks completed yet.".into(),
            last_action_failures: 0,
            escalation: None,
            target_app: None,
        }
    }

    #[test]
    fn screenshot_is_attached_to_user_message() {
        let msgs = LlmPlanner::build_messages(&request(Some(Screenshot::png("AAAA".into()))));
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].role, "system");
        assert!(msgs[1].has_image());
        assert!(!LlmPlanner::build_messages(&request(None))[1].has_image());
    }

    #[test]
    fn tool_call_takes_precedence_over_content() {
        let resp = LlmResponse {
            content: r#"{"type":"wait","intent":"pause"}"#.into(),
            reasoning: String::new(),
            tool_calls: vec![ToolCall {
                id: "call_1".into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: "next_action".into(),
                    arguments: r#"{"type":"click","selector":"ax:2","intent":"press ok"}"#.into(),
                },
            }],
        };
        let planned = planned_from_response(&resp);
        assert_eq!(
            planned.action,
            Action::Click { target: Target::Element { selector: "ax:2".into() } }
        );
    }

    #[test]
    fn prose_without_json_is_invalid() {
        let resp = LlmResponse {
            content: "I think we should open the app".into(),
            ..LlmResponse::default()
        };
        assert_eq!(planned_from_response(&resp).kind(), ActionKind::Invalid);
    }

    #[tokio::test]
    async fn missing_provider_is_an_error() {
        let planner = LlmPlanner::new(Arc::new(ProviderRegistry::new("none".into())));
        assert!(planner.plan(&request(None)).await.is_err());
    }
}
