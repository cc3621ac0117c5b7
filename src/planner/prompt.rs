//! Prompt text for the planner and verifier models.

use serde_json::json;

use crate::llm::types::{FunctionDef, ToolDef};
use crate::perception::types::ElementDescriptor;
use crate::planner::{PlannerRequest, VerifyRequest};

/// Elements beyond this are summarised as a count.
const MAX_LISTED_ELEMENTS: usize = 120;

pub const SYSTEM_PROMPT: &str = "\
You are DeskPilot, a desktop automation agent on macOS. You complete the user's task \
one action at a time.

Rules:
- Reply with exactly ONE action as a single JSON object (or one `next_action` tool call). \
Never return a list of actions.
- Every action needs a short \"intent\" saying what it is meant to achieve.
- When the element list is not empty, target elements by their exact `selector` \
(e.g. \"ax:12\"). Use x/y coordinates only when no listed element fits.
- Read the action memory before choosing. Do not repeat an action that already failed; \
try a different element or a different kind of action.
- Earlier tasks are listed for context only. They never mean the current task is finished.
- Emit {\"type\":\"done\"} only when the current task is visibly complete; completion is checked.

Actions:
  {\"type\":\"click\"|\"double_click\"|\"right_click\"|\"middle_click\"|\"hover\", \"selector\":\"ax:3\", \"intent\":\"...\"}
  {\"type\":\"click\", \"x\":640, \"y\":400, \"intent\":\"...\"}
  {\"type\":\"drag_and_drop\", \"startX\":10, \"startY\":10, \"endX\":200, \"endY\":200, \"duration\":500, \"intent\":\"...\"}
  {\"type\":\"scroll\", \"direction\":\"up|down|left|right\", \"amount\":3, \"intent\":\"...\"}
  {\"type\":\"scroll_at\", \"x\":500, \"y\":300, \"deltaX\":0, \"deltaY\":-5, \"intent\":\"...\"}
  {\"type\":\"type\", \"text\":\"hello\", \"intent\":\"...\"}
  {\"type\":\"key\", \"keyString\":\"cmd+a\", \"intent\":\"...\"}
  {\"type\":\"wait\", \"milliseconds\":1000, \"intent\":\"...\"}
  {\"type\":\"open_app\", \"appName\":\"Calculator\", \"intent\":\"...\"}
  {\"type\":\"navigate_to_url\", \"url\":\"https://example.com\", \"intent\":\"...\"}
  {\"type\":\"search\", \"query\":\"weather today\", \"intent\":\"...\"}
  {\"type\":\"run_script\", \"script\":\"tell application ...\", \"intent\":\"...\"}
  {\"type\":\"done\", \"summary\":\"...\", \"intent\":\"...\"}";

/// One line per element: `selector | role | "name" | @x,y | focused`.
pub fn render_elements(elements: &[ElementDescriptor]) -> String {
    if elements.is_empty() {
        return "(no elements detected; use keyboard actions or x/y coordinates)".to_string();
    }
    let mut lines: Vec<String> = elements
        .iter()
        .take(MAX_LISTED_ELEMENTS)
        .map(|e| {
            let mut line = format!("{} | {} | \"{}\"", e.selector, e.normalized_role(), e.name);
            if let Some(b) = e.bounds {
                let (x, y) = b.center();
                line.push_str(&format!(" | @{x},{y}"));
            }
            if e.focused {
                line.push_str(" | focused");
            }
            line
        })
        .collect();
    if elements.len() > MAX_LISTED_ELEMENTS {
        lines.push(format!("... {} more not listed", elements.len() - MAX_LISTED_ELEMENTS));
    }
    lines.join("\n")
}

pub fn render_planner_request(req: &PlannerRequest) -> String {
    let mut out = format!(
        "TASK: \"{}\"\nSTEP: {} of {}\n",
        req.task, req.step, req.max_steps
    );
    if let Some(app) = &req.target_app {
        out.push_str(&format!("TARGET APP: {app}\n"));
    }
    if let Some(state) = &req.observation.screen_state {
        out.push_str(&format!("SCREEN STATE: {state}\n"));
    }
    out.push_str(&format!(
        "\nELEMENTS ({}):\n{}\n",
        req.elements().len(),
        render_elements(req.elements())
    ));
    out.push_str(&format!("\nACTION MEMORY:\n{}\n", req.memory));
    if req.last_action_failures > 0 {
        out.push_str(&format!(
            "The last action has failed {} time(s) in a row.\n",
            req.last_action_failures
        ));
    }
    if let Some(esc) = &req.escalation {
        out.push_str(&format!("\n{}\n", esc.render()));
    }
    out.push_str(&format!("\n{}\n", req.task_history));
    if req.observation.screenshot.is_some() {
        out.push_str("\nA screenshot of the current screen is attached.\n");
    }
    out.push_str("\nReply with the single next action as JSON.");
    out
}

pub fn render_verify_request(req: &VerifyRequest) -> String {
    format!(
        "The task was: \"{task}\"\n\n\
         Actions taken so far:\n{memory}\n\n\
         Based on the attached screenshot of the user's screen, is this task done?\n\n\
         RESPOND WITH JSON ONLY:\n\
         {{\"task_complete\": \"YES\" or \"NO\", \"reason\": \"short explanation\"}}",
        task = req.task,
        memory = req.memory,
    )
}

/// Function-calling schema for providers that support tools.
pub fn next_action_tool() -> ToolDef {
    ToolDef {
        def_type: "function".into(),
        function: FunctionDef {
            name: "next_action".into(),
            description: "Perform exactly one desktop action.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": [
                            "click", "double_click", "right_click", "middle_click", "hover",
                            "drag_and_drop", "scroll", "scroll_at", "type", "key", "wait",
                            "open_app", "navigate_to_url", "search", "run_script", "done"
                        ]
                    },
                    "intent": { "type": "string", "description": "What this action is meant to achieve" },
                    "selector": { "type": "string", "description": "Exact selector from the element list" },
                    "x": { "type": "integer" },
                    "y": { "type": "integer" },
                    "startX": { "type": "integer" },
                    "startY": { "type": "integer" },
                    "endX": { "type": "integer" },
                    "endY": { "type": "integer" },
                    "duration": { "type": "integer", "description": "Drag duration in ms" },
                    "direction": { "type": "string", "enum": ["up", "down", "left", "right"] },
                    "amount": { "type": "integer" },
                    "deltaX": { "type": "integer" },
                    "deltaY": { "type": "integer" },
                    "text": { "type": "string" },
                    "keyString": { "type": "string", "description": "e.g. cmd+c, return, shift+tab" },
                    "milliseconds": { "type": "integer" },
                    "appName": { "type": "string" },
                    "url": { "type": "string" },
                    "query": { "type": "string" },
                    "script": { "type": "string" },
                    "summary": { "type": "string" }
                },
                "required": ["type", "intent"]
            }),
        },
    }
}
