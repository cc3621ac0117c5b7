//! Validation boundary between raw planner output and the typed [`Action`] vocabulary.
//!
//! Planner output is untrusted: it may be wrapped in markdown, contain several
//! actions, use legacy field names, or miss required fields. Everything that
//! leaves this module is either a well-formed action or an [`Action::Invalid`].

use serde_json::Value;

use crate::agent_engine::action::{Action, PlannedAction, ScrollDirection, Target};
use crate::llm::types::ToolCall;

const MAX_WAIT_MS: u64 = 10_000;
const DEFAULT_WAIT_MS: u64 = 1_000;

/// Parse free-text planner output into exactly one action.
pub fn parse_planner_output(text: &str) -> PlannedAction {
    let cleaned = strip_code_fences(text.trim());

    let value = match extract_json(&cleaned) {
        Some(v) => v,
        None => match recover_partial(&cleaned) {
            Some(v) => {
                tracing::warn!("planner output was not valid JSON, recovered type/intent from text");
                v
            }
            None => {
                tracing::warn!(len = text.len(), "planner output contained no JSON action");
                return PlannedAction::invalid("<none>", "planner response contained no JSON action");
            }
        },
    };

    let (single, batch_len) = reduce_to_single(value);
    if batch_len > 1 {
        tracing::warn!(
            batch_len,
            "planner returned several actions; keeping only the first"
        );
    }
    match single {
        Some(v) => parse_action_value(&v),
        None => PlannedAction::invalid("<empty>", "planner returned an empty action list"),
    }
}

/// Parse a function-calling response. Only the first tool call is honoured.
pub fn parse_tool_calls(calls: &[ToolCall]) -> Option<PlannedAction> {
    let first = calls.first()?;
    if calls.len() > 1 {
        tracing::warn!(count = calls.len(), "planner issued several tool calls; keeping the first");
    }
    let mut args: Value = serde_json::from_str(&first.function.arguments).unwrap_or(Value::Null);
    if !args.is_object() {
        args = serde_json::json!({});
    }
    if args.get("type").is_none() {
        args["type"] = Value::String(first.function.name.clone());
    }
    Some(parse_action_value(&args))
}

/// Validate one JSON object against the action vocabulary.
pub fn parse_action_value(v: &Value) -> PlannedAction {
    let Some(raw_type) = str_field(v, &["type", "action"]) else {
        return PlannedAction::invalid("<missing>", "action has no \"type\" field");
    };
    let Some(intent) = str_field(v, &["intent", "reasoning"]) else {
        return PlannedAction::invalid(raw_type, "action has no \"intent\"");
    };

    match build_action(&raw_type.to_lowercase(), v) {
        Ok(action) => PlannedAction::new(action, intent),
        Err(reason) => PlannedAction {
            action: Action::Invalid {
                raw_type,
                reason,
            },
            intent,
        },
    }
}

fn build_action(kind: &str, v: &Value) -> Result<Action, String> {
    match kind {
        "click" => Ok(Action::Click { target: target(v, kind)? }),
        "double_click" => Ok(Action::DoubleClick { target: target(v, kind)? }),
        "right_click" => Ok(Action::RightClick { target: target(v, kind)? }),
        "middle_click" => Ok(Action::MiddleClick { target: target(v, kind)? }),
        "hover" => Ok(Action::Hover { target: target(v, kind)? }),
        "drag_and_drop" => {
            let sx = int_field(v, &["startX", "start_x"]);
            let sy = int_field(v, &["startY", "start_y"]);
            let ex = int_field(v, &["endX", "end_x"]);
            let ey = int_field(v, &["endY", "end_y"]);
            match (sx, sy, ex, ey) {
                (Some(sx), Some(sy), Some(ex), Some(ey)) => Ok(Action::DragAndDrop {
                    from: (sx as i32, sy as i32),
                    to: (ex as i32, ey as i32),
                    duration_ms: int_field(v, &["duration", "duration_ms"]).map(|d| d.max(0) as u64),
                }),
                _ => Err("drag_and_drop requires startX, startY, endX and endY".into()),
            }
        }
        "scroll" => {
            let direction = match str_field(v, &["direction"]) {
                Some(d) => ScrollDirection::parse(&d)
                    .ok_or_else(|| format!("unknown scroll direction \"{d}\""))?,
                None => ScrollDirection::Down,
            };
            let amount = int_field(v, &["amount", "repeats"]).unwrap_or(1).clamp(1, 50) as u32;
            Ok(Action::Scroll { direction, amount })
        }
        "scroll_at" => {
            let (Some(x), Some(y)) = (int_field(v, &["x"]), int_field(v, &["y"])) else {
                return Err("scroll_at requires x and y".into());
            };
            let delta_x = int_field(v, &["deltaX", "delta_x"]).unwrap_or(0) as i32;
            let delta_y = int_field(v, &["deltaY", "delta_y"]).unwrap_or(0) as i32;
            if delta_x == 0 && delta_y == 0 {
                return Err("scroll_at requires a non-zero deltaX or deltaY".into());
            }
            Ok(Action::ScrollAt {
                x: x as i32,
                y: y as i32,
                delta_x,
                delta_y,
            })
        }
        "type" | "type_text" => match str_field(v, &["text"]) {
            Some(text) => Ok(Action::Type { text }),
            None => Err("type requires non-empty \"text\"".into()),
        },
        "key" | "hotkey" | "key_press" => {
            match str_field(v, &["keyString", "key_string", "keys", "key", "combo"]) {
                Some(combo) => Ok(Action::Key { combo }),
                None => Err("key requires \"keyString\"".into()),
            }
        }
        "wait" => {
            let millis = int_field(v, &["milliseconds", "ms", "duration_ms"])
                .map(|ms| ms.max(0) as u64)
                .or_else(|| float_field(v, &["amount", "seconds"]).map(|s| (s.max(0.0) * 1000.0) as u64))
                .unwrap_or(DEFAULT_WAIT_MS)
                .min(MAX_WAIT_MS);
            Ok(Action::Wait { millis })
        }
        "run_script" | "applescript" => {
            match str_field(v, &["script", "applescriptCode", "applescript_code", "code"]) {
                Some(script) => Ok(Action::RunScript { script }),
                None => Err("run_script requires \"script\"".into()),
            }
        }
        "navigate_to_url" => match str_field(v, &["url", "text"]) {
            Some(url) => Ok(Action::NavigateToUrl { url: normalize_url(&url) }),
            None => Err("navigate_to_url requires \"url\"".into()),
        },
        "open_app" | "spotlight_open_app" | "window" => {
            match str_field(v, &["appName", "app_name", "app", "windowName", "text"]) {
                Some(app_name) => Ok(Action::OpenApp { app_name }),
                None => Err("open_app requires \"appName\"".into()),
            }
        }
        "search" => match str_field(v, &["query", "text"]) {
            Some(query) => Ok(Action::Search { query }),
            None => Err("search requires \"query\"".into()),
        },
        "done" | "finish_task" => Ok(Action::Done {
            summary: str_field(v, &["summary", "text"]),
        }),
        other => Err(format!("unknown action type \"{other}\"")),
    }
}

fn target(v: &Value, kind: &str) -> Result<Target, String> {
    if let Some(selector) = str_field(v, &["selector", "element_id", "elementId", "element", "text"]) {
        return Ok(Target::Element { selector });
    }
    match (int_field(v, &["x"]), int_field(v, &["y"])) {
        (Some(x), Some(y)) => Ok(Target::Point {
            x: x as i32,
            y: y as i32,
        }),
        _ => Err(format!("{kind} requires a selector or x/y coordinates")),
    }
}

fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.contains("://") || trimmed.starts_with("about:") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

/// First non-empty string among `keys`.
fn str_field(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.get(*k))
        .filter_map(|f| f.as_str())
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Integers may arrive as JSON numbers or numeric strings.
fn int_field(v: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().filter_map(|k| v.get(*k)).find_map(|f| {
        f.as_i64()
            .or_else(|| f.as_f64().map(|x| x.round() as i64))
            .or_else(|| f.as_str().and_then(|s| s.trim().parse::<f64>().ok()).map(|x| x.round() as i64))
    })
}

fn float_field(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().filter_map(|k| v.get(*k)).find_map(|f| {
        f.as_f64()
            .or_else(|| f.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
    })
}

fn strip_code_fences(text: &str) -> String {
    if !text.contains("```") {
        return text.to_string();
    }
    let mut out = String::new();
    let mut inside = false;
    for line in text.lines() {
        if line.trim_start().starts_with("```") {
            inside = !inside;
            continue;
        }
        if inside {
            out.push_str(line);
            out.push('\n');
        }
    }
    if out.trim().is_empty() {
        text.replace("```", "")
    } else {
        out
    }
}

/// Finds the first balanced JSON value (object or array) in `text`.
fn extract_json(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }
    for (start, ch) in text.char_indices() {
        if ch != '{' && ch != '[' {
            continue;
        }
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(v)) = stream.next() {
            if v.is_object() || v.is_array() {
                return Some(v);
            }
        }
    }
    None
}

/// Last resort for truncated JSON: pull `"type"` and `"intent"` out with a regex.
fn recover_partial(text: &str) -> Option<Value> {
    let type_re = regex::Regex::new(r#""type"\s*:\s*"([^"]+)""#).ok()?;
    let intent_re = regex::Regex::new(r#""intent"\s*:\s*"([^"]+)""#).ok()?;
    let kind = type_re.captures(text)?.get(1)?.as_str().to_string();
    let intent = intent_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "recovered from malformed planner response".into());
    Some(serde_json::json!({ "type": kind, "intent": intent }))
}

/// Collapse batch-shaped output to its first action. Returns the batch length seen.
fn reduce_to_single(v: Value) -> (Option<Value>, usize) {
    match v {
        Value::Array(items) => {
            let len = items.len();
            (items.into_iter().next(), len)
        }
        Value::Object(mut map) if !map.contains_key("type") => {
            for key in ["actions", "steps", "plan"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    let len = items.len();
                    return (items.into_iter().next(), len);
                }
            }
            if let Some(inner) = map.remove("action") {
                if inner.is_object() {
                    return (Some(inner), 1);
                }
                map.insert("action".into(), inner);
            }
            (Some(Value::Object(map)), 1)
        }
        other => (Some(other), 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::action::ActionKind;
    use crate::llm::types::FunctionCall;

    #[test]
    fn plain_click_with_selector() {
        let p = parse_planner_output(r#"{"type":"click","selector":"ax:12","intent":"press Save"}"#);
        assert_eq!(
            p.action,
            Action::Click { target: Target::Element { selector: "ax:12".into() } }
        );
        assert_eq!(p.intent, "press Save");
    }

    #[test]
    fn fenced_json_with_prose() {
        let text = "Sure! Here's the next step:\n```json\n{\"type\":\"type\",\"text\":\"12*4=\",\"intent\":\"enter the equation\"}\n```\nGood luck.";
        let p = parse_planner_output(text);
        assert_eq!(p.action, Action::Type { text: "12*4=".into() });
    }

    #[test]
    fn batch_array_reduces_to_first() {
        let text = r#"[{"type":"open_app","appName":"Calculator","intent":"open calc"},
                       {"type":"type","text":"1+1","intent":"type"}]"#;
        let p = parse_planner_output(text);
        assert_eq!(p.action, Action::OpenApp { app_name: "Calculator".into() });
    }

    #[test]
    fn batch_in_steps_key_reduces_to_first() {
        let text = r#"{"steps":[{"type":"key","keyString":"cmd+n","intent":"new doc"},{"type":"done","intent":"x"}]}"#;
        let p = parse_planner_output(text);
        assert_eq!(p.action, Action::Key { combo: "cmd+n".into() });
    }

    #[test]
    fn two_objects_in_prose_keep_first() {
        let text = r#"First {"type":"wait","amount":2,"intent":"let it load"} then {"type":"done","intent":"finish"}"#;
        let p = parse_planner_output(text);
        assert_eq!(p.action, Action::Wait { millis: 2000 });
    }

    #[test]
    fn unknown_type_is_invalid_not_panic() {
        let p = parse_planner_output(r#"{"type":"teleport","intent":"go"}"#);
        assert_eq!(p.kind(), ActionKind::Invalid);
        assert_eq!(p.intent, "go");
    }

    #[test]
    fn missing_intent_is_invalid() {
        let p = parse_planner_output(r#"{"type":"click","selector":"ax:1"}"#);
        assert_eq!(p.kind(), ActionKind::Invalid);
    }

    #[test]
    fn missing_required_field_is_invalid() {
        let p = parse_planner_output(r#"{"type":"type","intent":"type nothing"}"#);
        match p.action {
            Action::Invalid { raw_type, reason } => {
                assert_eq!(raw_type, "type");
                assert!(reason.contains("text"));
            }
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn garbage_is_invalid() {
        let p = parse_planner_output("I think we should click the button.");
        assert_eq!(p.kind(), ActionKind::Invalid);
    }

    #[test]
    fn truncated_json_recovers_type() {
        let p = parse_planner_output(r#"{"type": "done", "intent": "calculator shows 48", "summary": "#);
        assert_eq!(p.action, Action::Done { summary: None });
        assert_eq!(p.intent, "calculator shows 48");
    }

    #[test]
    fn legacy_aliases_and_string_numbers() {
        let p = parse_planner_output(r#"{"type":"spotlight_open_app","appName":"Notes","intent":"open"}"#);
        assert_eq!(p.action, Action::OpenApp { app_name: "Notes".into() });

        let p = parse_planner_output(r#"{"type":"applescript","applescriptCode":"beep","intent":"beep"}"#);
        assert_eq!(p.action, Action::RunScript { script: "beep".into() });

        let p = parse_planner_output(r#"{"type":"click","x":"100","y":200.4,"intent":"fallback"}"#);
        assert_eq!(p.action, Action::Click { target: Target::Point { x: 100, y: 200 } });
    }

    #[test]
    fn url_gets_scheme_and_wait_is_clamped() {
        let p = parse_planner_output(r#"{"type":"navigate_to_url","url":"example.com","intent":"go"}"#);
        assert_eq!(p.action, Action::NavigateToUrl { url: "https://example.com".into() });

        let p = parse_planner_output(r#"{"type":"wait","amount":600,"intent":"nap"}"#);
        assert_eq!(p.action, Action::Wait { millis: MAX_WAIT_MS });
    }

    #[test]
    fn scroll_at_needs_delta() {
        let p = parse_planner_output(r#"{"type":"scroll_at","x":1,"y":2,"intent":"scroll"}"#);
        assert_eq!(p.kind(), ActionKind::Invalid);
        let p = parse_planner_output(r#"{"type":"scroll_at","x":1,"y":2,"deltaY":-5,"intent":"scroll"}"#);
        assert_eq!(p.action, Action::ScrollAt { x: 1, y: 2, delta_x: 0, delta_y: -5 });
    }

    #[test]
    fn tool_calls_use_first_only() {
        let calls = vec![
            ToolCall {
                id: "a".into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: "key".into(),
                    arguments: r#"{"keyString":"return","intent":"submit"}"#.into(),
                },
            },
            ToolCall {
                id: "b".into(),
                call_type: "function".into(),
                function: FunctionCall {
                    name: "done".into(),
                    arguments: r#"{"intent":"finish"}"#.into(),
                },
            },
        ];
        let p = parse_tool_calls(&calls).unwrap();
        assert_eq!(p.action, Action::Key { combo: "return".into() });
        assert!(parse_tool_calls(&[]).is_none());
    }
}
