use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::DeskPilotResult;
use crate::llm::registry::{LlmRole, ProviderRegistry};
use crate::llm::types::ChatMessage;
use crate::planner::prompt::render_verify_request;
use crate::planner::{CompletionVerifier, Verdict, VerifyRequest};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CompleteFlag {
    Bool(bool),
    Text(String),
}

impl CompleteFlag {
    fn is_yes(&self) -> bool {
        match self {
            CompleteFlag::Bool(b) => *b,
            CompleteFlag::Text(t) => {
                let t = t.trim();
                t.eq_ignore_ascii_case("yes") || t.eq_ignore_ascii_case("true")
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    task_complete: CompleteFlag,
    #[serde(default)]
    reason: String,
}

/// Whole-word reading of a prose reply: a "yes" and no negation.
fn prose_says_yes(lower: &str) -> bool {
    let mut yes = false;
    for word in lower.split(|c: char| !c.is_alphanumeric() && c != '\'') {
        match word {
            "yes" => yes = true,
            "no" | "not" | "cannot" | "incomplete" => return false,
            w if w.ends_with("n't") => return false,
            _ => {}
        }
    }
    yes
}

/// Reads `{"task_complete": "YES"|"NO"|true|false, "reason": ...}`, tolerating fences and prose.
pub fn parse_verdict(text: &str) -> Verdict {
    let trimmed = text.trim();
    let json_slice = match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    };
    if let Ok(raw) = serde_json::from_str::<RawVerdict>(json_slice) {
        let complete = raw.task_complete.is_yes();
        return Verdict {
            complete,
            reason: raw.reason,
        };
    }

    let lower = trimmed.to_lowercase();
    let complete = prose_says_yes(&lower);
    tracing::debug!(complete, "verifier reply was not JSON, used text fallback");
    Verdict {
        complete,
        reason: trimmed.chars().take(200).collect(),
    }
}

/// Looks for evidence of the expected actions in the memory log when there is
/// nothing to look at.
pub struct MemoryVerifier;

impl MemoryVerifier {
    pub fn judge(task: &str, memory: &str) -> Verdict {
        let task_l = task.to_lowercase();
        let memory_l = memory.to_lowercase();
        let typed = memory_l.contains("text entered") || memory_l.contains("[type]");

        let is_message = task_l.contains("message") || task_l.contains("send to") || task_l.contains("text ");
        let is_text = task_l.contains("type")
            || task_l.contains("write")
            || task_l.contains("text")
            || task_l.contains("document");

        if is_message {
            let sent = memory_l.contains("enter key pressed") || memory_l.contains("return");
            return if typed && sent {
                Verdict::complete("message typed and sent")
            } else {
                Verdict::incomplete("no evidence the message was typed and sent")
            };
        }
        if is_text {
            if task_l.contains("bold") && !memory_l.contains("bold formatting") && !memory_l.contains("cmd+b") {
                return Verdict::incomplete("text typed but bold formatting not applied");
            }
            return if typed {
                Verdict::complete("text was entered")
            } else {
                Verdict::incomplete("no text has been entered yet")
            };
        }
        if memory_l.contains("-> ok") {
            Verdict::complete("recent actions succeeded")
        } else {
            Verdict::incomplete("no successful action recorded")
        }
    }
}

#[async_trait]
impl CompletionVerifier for MemoryVerifier {
    async fn verify(&self, req: &VerifyRequest) -> DeskPilotResult<Verdict> {
        Ok(Self::judge(&req.task, &req.memory))
    }
}

/// Vision check against the fresh screenshot, using the `verifier` role.
/// Without a screenshot it falls back to [`MemoryVerifier`].
pub struct LlmVerifier {
    registry: Arc<ProviderRegistry>,
}

impl LlmVerifier {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl CompletionVerifier for LlmVerifier {
    async fn verify(&self, req: &VerifyRequest) -> DeskPilotResult<Verdict> {
        let Some(shot) = &req.observation.screenshot else {
            tracing::warn!("no screenshot for completion check, judging from memory");
            return Ok(MemoryVerifier::judge(&req.task, &req.memory));
        };

        let (provider, cfg) = self.registry.call_config_for_role(LlmRole::Verifier)?;
        let messages = vec![ChatMessage::user_with_image(
            render_verify_request(req),
            shot.data_url(),
        )];
        let resp = provider.chat(messages, Vec::new(), &cfg).await?;
        let verdict = parse_verdict(&resp.content);
        tracing::info!(complete = verdict.complete, reason = %verdict.reason, "completion verdict");
        Ok(verdict)
    }
}
