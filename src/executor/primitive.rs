use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent_engine::action::ScrollDirection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Where a pointer primitive lands, after resolution against the current scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum PrimitiveTarget {
    /// A scanned element. `point` is its center when the scan reported bounds.
    Element {
        selector: String,
        name: String,
        point: Option<(i32, i32)>,
    },
    /// A selector the current scan could not confirm (empty scan). Passed through as-is.
    Selector { selector: String },
    Point { x: i32, y: i32 },
}

/// One OS-level operation. Everything the loop does to the desktop goes through this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PrimitiveAction {
    Click {
        target: PrimitiveTarget,
        button: MouseButton,
        count: u8,
    },
    Hover { target: PrimitiveTarget },
    Drag {
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: u64,
    },
    Scroll { direction: ScrollDirection, amount: u32 },
    ScrollAt {
        x: i32,
        y: i32,
        delta_x: i32,
        delta_y: i32,
    },
    TypeText { text: String },
    KeyCombo { combo: String },
    RunScript { script: String },
    OpenUrl { url: String },
    OpenApp { app_name: String },
}

impl PrimitiveAction {
    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveAction::Click { .. } => "click",
            PrimitiveAction::Hover { .. } => "hover",
            PrimitiveAction::Drag { .. } => "drag",
            PrimitiveAction::Scroll { .. } => "scroll",
            PrimitiveAction::ScrollAt { .. } => "scroll_at",
            PrimitiveAction::TypeText { .. } => "type_text",
            PrimitiveAction::KeyCombo { .. } => "key_combo",
            PrimitiveAction::RunScript { .. } => "run_script",
            PrimitiveAction::OpenUrl { .. } => "open_url",
            PrimitiveAction::OpenApp { .. } => "open_app",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveResult {
    pub success: bool,
    pub message: String,
}

impl PrimitiveResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Write side of the OS automation layer.
///
/// Implementations report every problem as a failed [`PrimitiveResult`]; they
/// must not panic. Retrying a primitive must be safe, but it is not atomic.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn perform(&self, action: &PrimitiveAction) -> PrimitiveResult;
}
