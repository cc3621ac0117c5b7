use std::sync::Arc;

use async_trait::async_trait;

use crate::config::GateMode;
use crate::errors::DeskPilotResult;
use crate::llm::registry::{LlmRole, ProviderRegistry};
use crate::llm::types::{ChatMessage, LlmResponse};

/// Inputs to the per-step screenshot decision.
#[derive(Debug, Clone)]
pub struct GateRequest<'a> {
    pub task: &'a str,
    pub step: u32,
    /// Rendered memory; only the last few lines are used.
    pub memory: &'a str,
    pub last_failed: bool,
}

impl GateRequest<'_> {
    fn recent_memory(&self) -> String {
        let lines: Vec<&str> = self.memory.lines().collect();
        let tail = &lines[lines.len().saturating_sub(3)..];
        if tail.is_empty() {
            "None yet".to_string()
        } else {
            tail.join("\n")
        }
    }
}

/// Decides whether the next planning call gets a screenshot.
#[async_trait]
pub trait ScreenshotGate: Send + Sync {
    async fn needs_screenshot(&self, req: &GateRequest<'_>) -> DeskPilotResult<bool>;
}

/// Fixed answer. `Always` for debugging vision prompts, `Never` for text-only models.
pub struct FixedGate(pub bool);

#[async_trait]
impl ScreenshotGate for FixedGate {
    async fn needs_screenshot(&self, _req: &GateRequest<'_>) -> DeskPilotResult<bool> {
        Ok(self.0)
    }
}

const VISUAL_HINTS: &[&str] = &[
    "click", "button", "screen", "this form", "fill out", "that ", "this page", "current page",
    "red", "blue", "green", "color", "icon", "image", "picture", "corner", "find", "look",
    "see", "where", "verify", "message", "text ", "dm ", "reply", "chat", "conversation",
    "ask ", "post", "tweet", "share", "menu", "select",
];

/// Keyword rules: visual or conversational tasks, the first step, and recoveries get a screenshot.
pub struct HeuristicGate;

impl HeuristicGate {
    pub fn decide(req: &GateRequest<'_>) -> bool {
        if req.step <= 1 || req.last_failed {
            return true;
        }
        let task = format!(" {} ", req.task.to_lowercase());
        VISUAL_HINTS.iter().any(|h| task.contains(h))
    }
}

#[async_trait]
impl ScreenshotGate for HeuristicGate {
    async fn needs_screenshot(&self, req: &GateRequest<'_>) -> DeskPilotResult<bool> {
        Ok(Self::decide(req))
    }
}

/// Cheap yes/no model call. A failed call answers yes.
pub struct LlmGate {
    registry: Arc<ProviderRegistry>,
}

impl LlmGate {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }

    fn prompt(req: &GateRequest<'_>) -> String {
        format!(
            "You decide whether a screenshot is needed for the next desktop action.\n\n\
             TASK: \"{task}\"\n\
             CURRENT STEP: {step}\n\
             LAST ACTION FAILED: {failed}\n\
             RECENT ACTIONS:\n{recent}\n\n\
             Guidelines:\n\
             - Simple actions (open an app, type known text, press a key) usually do NOT need one.\n\
             - Visual tasks (\"click the red button\", \"fill out this form\", \"what's on my screen\") DO.\n\
             - Messaging, chatting and posting tasks DO, and so does waiting for a reply.\n\
             - The first step and recovery after a failure usually do.\n\
             - Be consistent: similar actions in the same task get the same answer.\n\n\
             Answer with just \"yes\" or \"no\".",
            task = req.task,
            step = req.step,
            failed = req.last_failed,
            recent = req.recent_memory(),
        )
    }
}

#[async_trait]
impl ScreenshotGate for LlmGate {
    async fn needs_screenshot(&self, req: &GateRequest<'_>) -> DeskPilotResult<bool> {
        let answer: DeskPilotResult<LlmResponse> = async {
            let (provider, cfg) = self.registry.call_config_for_role(LlmRole::ScreenshotGate)?;
            provider
                .chat(vec![ChatMessage::user(Self::prompt(req))], Vec::new(), &cfg)
                .await
        }
        .await;

        match answer {
            Ok(resp) => {
                let yes = resp.content.to_lowercase().contains("yes");
                tracing::debug!(step = req.step, yes, "screenshot gate answered");
                Ok(yes)
            }
            Err(e) => {
                tracing::warn!(step = req.step, "screenshot gate failed, defaulting to yes: {e}");
                Ok(true)
            }
        }
    }
}

/// Builds the gate selected by `[agent] screenshot_gate`.
pub fn gate_for_mode(mode: GateMode, registry: Arc<ProviderRegistry>) -> Arc<dyn ScreenshotGate> {
    match mode {
        GateMode::Llm => Arc::new(LlmGate::new(registry)),
        GateMode::Heuristic => Arc::new(HeuristicGate),
        GateMode::Always => Arc::new(FixedGate(true)),
        GateMode::Never => Arc::new(FixedGate(false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req<'a>(task: &'a str, step: u32, last_failed: bool) -> GateRequest<'a> {
        GateRequest {
            task,
            step,
            memory: "",
            last_failed,
        }
    }

    #[test]
    fn heuristic_rules() {
        assert!(HeuristicGate::decide(&req("open Calculator and compute 12*4", 1, false)));
        assert!(!HeuristicGate::decide(&req("open Calculator and compute 12*4", 2, false)));
        assert!(HeuristicGate::decide(&req("open Calculator and compute 12*4", 2, true)));
        assert!(HeuristicGate::decide(&req("click the red button", 4, false)));
        assert!(HeuristicGate::decide(&req("message John that I'm late", 3, false)));
    }

    #[test]
    fn recent_memory_keeps_last_three_lines() {
        let r = GateRequest {
            task: "t",
            step: 5,
            memory: "a\nb\nc\nd",
            last_failed: false,
        };
        assert_eq!(r.recent_memory(), "b\nc\nd");
        assert_eq!(req("t", 1, false).recent_memory(), "None yet");
    }

    #[tokio::test]
    async fn llm_gate_defaults_to_yes_without_provider() {
        let gate = LlmGate::new(Arc::new(ProviderRegistry::new("missing".into())));
        assert!(gate.needs_screenshot(&req("type hello", 7, false)).await.unwrap());
    }

    #[tokio::test]
    async fn fixed_gates() {
        let never = gate_for_mode(GateMode::Never, Arc::new(ProviderRegistry::new(String::new())));
        assert!(!never.needs_screenshot(&req("click it", 1, true)).await.unwrap());
    }
}
