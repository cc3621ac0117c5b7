//! Best-effort confirmation strings for executed actions. Never required for progress.

use crate::agent_engine::action::Action;
use crate::executor::primitive::PrimitiveResult;
use crate::perception::types::ElementDescriptor;

fn shorten(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{head}...")
    }
}

fn key_effect(combo: &str) -> String {
    let k = combo.to_lowercase().replace(' ', "");
    if k.contains("cmd+a") || k.contains("command+a") {
        "Text selected".into()
    } else if k.contains("cmd+b") || k.contains("command+b") {
        "Bold formatting applied".into()
    } else if k.contains("cmd+n") || k.contains("command+n") {
        "New document created".into()
    } else if k.contains("return") || k.contains("enter") {
        "Enter key pressed".into()
    } else {
        format!("Key combo \"{combo}\" executed")
    }
}

/// Describes what a successful action most likely changed.
///
/// `before`/`after` are the scans around the action; `front_app` is the
/// frontmost application after it ran, when the sensor could tell.
pub fn verification_for(
    action: &Action,
    result: &PrimitiveResult,
    before: &[ElementDescriptor],
    after: &[ElementDescriptor],
    front_app: Option<&str>,
) -> Option<String> {
    if !result.success {
        return None;
    }

    let mut notes: Vec<String> = Vec::new();
    let effect = match action {
        Action::OpenApp { app_name } => Some(match front_app {
            Some(front) if front.eq_ignore_ascii_case(app_name) => {
                format!("App \"{app_name}\" opened successfully")
            }
            Some(front) => format!("Requested \"{app_name}\" but \"{front}\" is frontmost"),
            None => format!("Launch of \"{app_name}\" requested"),
        }),
        Action::Type { text } => Some(format!("Text entered: \"{}\"", shorten(text, 60))),
        Action::Key { combo } => Some(key_effect(combo)),
        Action::Click { .. } => Some("Element clicked successfully".into()),
        Action::DoubleClick { .. } => Some("Element double-clicked successfully".into()),
        Action::RightClick { .. } => Some("Element right-clicked successfully".into()),
        Action::MiddleClick { .. } => Some("Element middle-clicked successfully".into()),
        Action::Hover { .. } => Some("Hover completed successfully".into()),
        Action::DragAndDrop { .. } => Some("Drag and drop completed successfully".into()),
        Action::Scroll { .. } | Action::ScrollAt { .. } => Some("Page scrolled successfully".into()),
        Action::NavigateToUrl { url } => Some(format!("Opened {}", shorten(url, 80))),
        Action::Search { query } => Some(format!("Search results requested for \"{}\"", shorten(query, 60))),
        Action::RunScript { .. } => Some("Script executed".into()),
        Action::Wait { .. } | Action::Done { .. } | Action::Invalid { .. } => None,
    };
    notes.extend(effect);

    if before.len() != after.len() && !(before.is_empty() && after.is_empty()) {
        notes.push(format!(
            "UI changed: {} -> {} elements",
            before.len(),
            after.len()
        ));
    }

    if notes.is_empty() {
        None
    } else {
        Some(notes.join("; "))
    }
}
