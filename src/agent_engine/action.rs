use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a pointer action lands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum Target {
    /// Selector (or element name) from the current scan. Preferred.
    Element { selector: String },
    /// Raw screen coordinates. Fallback when no elements were scanned.
    Point { x: i32, y: i32 },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Element { selector } => write!(f, "{selector}"),
            Target::Point { x, y } => write!(f, "({x},{y})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "up" => Some(Self::Up),
            "down" => Some(Self::Down),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// The closed vocabulary the planner may choose from. One per loop iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Click { target: Target },
    DoubleClick { target: Target },
    RightClick { target: Target },
    MiddleClick { target: Target },
    Hover { target: Target },
    DragAndDrop {
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: Option<u64>,
    },
    Scroll { direction: ScrollDirection, amount: u32 },
    ScrollAt {
        x: i32,
        y: i32,
        delta_x: i32,
        delta_y: i32,
    },
    Type { text: String },
    Key { combo: String },
    Wait { millis: u64 },
    RunScript { script: String },
    NavigateToUrl { url: String },
    OpenApp { app_name: String },
    Search { query: String },
    Done { summary: Option<String> },
    /// Planner output that failed validation. Never reaches the actuator.
    Invalid { raw_type: String, reason: String },
}

/// Fieldless tag of an [`Action`], used for failure keys and screenshot decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    DoubleClick,
    RightClick,
    MiddleClick,
    Hover,
    DragAndDrop,
    Scroll,
    ScrollAt,
    Type,
    Key,
    Wait,
    RunScript,
    NavigateToUrl,
    OpenApp,
    Search,
    Done,
    Invalid,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::DoubleClick => "double_click",
            ActionKind::RightClick => "right_click",
            ActionKind::MiddleClick => "middle_click",
            ActionKind::Hover => "hover",
            ActionKind::DragAndDrop => "drag_and_drop",
            ActionKind::Scroll => "scroll",
            ActionKind::ScrollAt => "scroll_at",
            ActionKind::Type => "type",
            ActionKind::Key => "key",
            ActionKind::Wait => "wait",
            ActionKind::RunScript => "run_script",
            ActionKind::NavigateToUrl => "navigate_to_url",
            ActionKind::OpenApp => "open_app",
            ActionKind::Search => "search",
            ActionKind::Done => "done",
            ActionKind::Invalid => "invalid",
        }
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            ActionKind::Click
                | ActionKind::DoubleClick
                | ActionKind::RightClick
                | ActionKind::MiddleClick
                | ActionKind::Hover
                | ActionKind::DragAndDrop
                | ActionKind::ScrollAt
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::DoubleClick { .. } => ActionKind::DoubleClick,
            Action::RightClick { .. } => ActionKind::RightClick,
            Action::MiddleClick { .. } => ActionKind::MiddleClick,
            Action::Hover { .. } => ActionKind::Hover,
            Action::DragAndDrop { .. } => ActionKind::DragAndDrop,
            Action::Scroll { .. } => ActionKind::Scroll,
            Action::ScrollAt { .. } => ActionKind::ScrollAt,
            Action::Type { .. } => ActionKind::Type,
            Action::Key { .. } => ActionKind::Key,
            Action::Wait { .. } => ActionKind::Wait,
            Action::RunScript { .. } => ActionKind::RunScript,
            Action::NavigateToUrl { .. } => ActionKind::NavigateToUrl,
            Action::OpenApp { .. } => ActionKind::OpenApp,
            Action::Search { .. } => ActionKind::Search,
            Action::Done { .. } => ActionKind::Done,
            Action::Invalid { .. } => ActionKind::Invalid,
        }
    }

    pub fn target(&self) -> Option<&Target> {
        match self {
            Action::Click { target }
            | Action::DoubleClick { target }
            | Action::RightClick { target }
            | Action::MiddleClick { target }
            | Action::Hover { target } => Some(target),
            _ => None,
        }
    }

    /// Short human-readable label for status updates.
    pub fn describe(&self) -> String {
        match self {
            Action::Click { target } => format!("Clicked ({target})"),
            Action::DoubleClick { target } => format!("Double-clicked ({target})"),
            Action::RightClick { target } => format!("Right-clicked ({target})"),
            Action::MiddleClick { target } => format!("Middle-clicked ({target})"),
            Action::Hover { target } => format!("Hovered on ({target})"),
            Action::DragAndDrop { from, to, .. } => {
                format!("Dragged from ({},{}) to ({},{})", from.0, from.1, to.0, to.1)
            }
            Action::Scroll { direction, amount } => {
                format!("Scrolled {} ({amount} times)", direction.as_str())
            }
            Action::ScrollAt { x, y, .. } => format!("Scrolled at ({x},{y})"),
            Action::Type { text } => format!("Typed ({text})"),
            Action::Key { combo } => format!("Pressed ({combo})"),
            Action::Wait { millis } => format!("Waited ({millis}ms)"),
            Action::RunScript { .. } => "Executed (script)".into(),
            Action::NavigateToUrl { url } => format!("Navigated to ({url})"),
            Action::OpenApp { app_name } => format!("Opened ({app_name})"),
            Action::Search { query } => format!("Searched for ({query})"),
            Action::Done { .. } => "Completed task".into(),
            Action::Invalid { raw_type, .. } => format!("Rejected ({raw_type})"),
        }
    }
}

/// One validated planner decision: the action plus the planner's stated intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedAction {
    pub action: Action,
    pub intent: String,
}

impl PlannedAction {
    pub fn new(action: Action, intent: impl Into<String>) -> Self {
        Self {
            action,
            intent: intent.into(),
        }
    }

    pub fn invalid(raw_type: impl Into<String>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            action: Action::Invalid {
                raw_type: raw_type.into(),
                reason: reason.clone(),
            },
            intent: format!("unusable planner output: {reason}"),
        }
    }

    pub fn kind(&self) -> ActionKind {
        self.action.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_round_trip_through_serde_names() {
        let a = Action::OpenApp { app_name: "Calculator".into() };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["type"], "open_app");
        assert_eq!(a.kind().as_str(), "open_app");
    }

    #[test]
    fn describe_mentions_target() {
        let a = Action::Click {
            target: Target::Element { selector: "ax:4".into() },
        };
        assert_eq!(a.describe(), "Clicked (ax:4)");
        let b = Action::Hover { target: Target::Point { x: 3, y: 9 } };
        assert_eq!(b.describe(), "Hovered on ((3,9))");
    }

    #[test]
    fn pointer_kinds() {
        assert!(ActionKind::Click.is_pointer());
        assert!(!ActionKind::Type.is_pointer());
    }
}
