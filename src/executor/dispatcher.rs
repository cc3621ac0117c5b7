use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::action::{Action, Target};
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::executor::primitive::{
    Actuator, MouseButton, PrimitiveAction, PrimitiveResult, PrimitiveTarget,
};
use crate::executor::safety::SafetyPolicy;
use crate::executor::text_input::parse_key_combo;
use crate::perception::types::{find_element, ElementDescriptor};

const DEFAULT_DRAG_MS: u64 = 500;
const SEARCH_URL: &str = "https://www.google.com/search";

/// How a planned action is carried out.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Primitive(PrimitiveAction),
    /// Handled in-process; nothing is sent to the OS.
    Wait(Duration),
    /// Refused before reaching the actuator.
    Rejected(String),
}

/// Result of one dispatch. `primitive` is `None` when nothing was sent to the OS.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub primitive: Option<PrimitiveAction>,
    pub result: PrimitiveResult,
}

/// Routes validated actions to the actuator.
///
/// Element targets are resolved against the scan the planner saw. The
/// actuator call runs on its own task so a panic there surfaces as a
/// `JoinError` instead of unwinding through the loop.
pub struct Dispatcher {
    actuator: Arc<dyn Actuator>,
    safety: SafetyPolicy,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(actuator: Arc<dyn Actuator>, safety: SafetyPolicy, timeout: Duration) -> Self {
        Self {
            actuator,
            safety,
            timeout,
        }
    }

    pub fn route(&self, action: &Action, elements: &[ElementDescriptor]) -> Route {
        route(action, elements, &self.safety)
    }

    /// `Err` only when the actuator broke its contract (panicked).
    pub async fn dispatch(
        &self,
        action: &Action,
        elements: &[ElementDescriptor],
    ) -> DeskPilotResult<Dispatched> {
        match self.route(action, elements) {
            Route::Rejected(reason) => {
                tracing::info!(action = %action.kind(), %reason, "action rejected before dispatch");
                Ok(Dispatched {
                    primitive: None,
                    result: PrimitiveResult::failure(reason),
                })
            }
            Route::Wait(d) => {
                tokio::time::sleep(d).await;
                Ok(Dispatched {
                    primitive: None,
                    result: PrimitiveResult::ok(format!("waited {}ms", d.as_millis())),
                })
            }
            Route::Primitive(primitive) => {
                let result = self.perform(&primitive).await?;
                Ok(Dispatched {
                    primitive: Some(primitive),
                    result,
                })
            }
        }
    }

    async fn perform(&self, primitive: &PrimitiveAction) -> DeskPilotResult<PrimitiveResult> {
        let actuator = Arc::clone(&self.actuator);
        let owned = primitive.clone();
        let handle = tokio::spawn(async move { actuator.perform(&owned).await });

        // On timeout the task is detached, not aborted: a dispatched primitive runs to completion.
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(result)) => {
                tracing::debug!(op = primitive.name(), success = result.success, "primitive performed");
                Ok(result)
            }
            Ok(Err(e)) if e.is_panic() => Err(DeskPilotError::Executor(format!(
                "actuator panicked during {}: {}",
                primitive.name(),
                panic_message(e.into_panic())
            ))),
            Ok(Err(e)) => Err(DeskPilotError::Executor(format!(
                "actuator task failed during {}: {e}",
                primitive.name()
            ))),
            Err(_) => {
                tracing::warn!(op = primitive.name(), secs = self.timeout.as_secs(), "primitive timed out");
                Ok(PrimitiveResult::failure(format!(
                    "{} timed out after {}s",
                    primitive.name(),
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn resolve_target(target: &Target, elements: &[ElementDescriptor]) -> Result<PrimitiveTarget, String> {
    match target {
        Target::Point { x, y } => Ok(PrimitiveTarget::Point { x: *x, y: *y }),
        Target::Element { selector } if elements.is_empty() => Ok(PrimitiveTarget::Selector {
            selector: selector.clone(),
        }),
        Target::Element { selector } => find_element(elements, selector)
            .map(|e| PrimitiveTarget::Element {
                selector: e.selector.clone(),
                name: e.name.clone(),
                point: e.bounds.map(|b| b.center()),
            })
            .ok_or_else(|| format!("element not found: {selector}")),
    }
}

fn click(target: &Target, elements: &[ElementDescriptor], button: MouseButton, count: u8) -> Route {
    match resolve_target(target, elements) {
        Ok(target) => Route::Primitive(PrimitiveAction::Click {
            target,
            button,
            count,
        }),
        Err(reason) => Route::Rejected(reason),
    }
}

pub fn search_url(query: &str) -> Option<String> {
    reqwest::Url::parse_with_params(SEARCH_URL, &[("q", query)])
        .ok()
        .map(|u| u.to_string())
}

pub fn route(action: &Action, elements: &[ElementDescriptor], safety: &SafetyPolicy) -> Route {
    match action {
        Action::Click { target } => click(target, elements, MouseButton::Left, 1),
        Action::DoubleClick { target } => click(target, elements, MouseButton::Left, 2),
        Action::RightClick { target } => click(target, elements, MouseButton::Right, 1),
        Action::MiddleClick { target } => click(target, elements, MouseButton::Middle, 1),
        Action::Hover { target } => match resolve_target(target, elements) {
            Ok(target) => Route::Primitive(PrimitiveAction::Hover { target }),
            Err(reason) => Route::Rejected(reason),
        },
        Action::DragAndDrop {
            from,
            to,
            duration_ms,
        } => Route::Primitive(PrimitiveAction::Drag {
            from: *from,
            to: *to,
            duration_ms: duration_ms.unwrap_or(DEFAULT_DRAG_MS),
        }),
        Action::Scroll { direction, amount } => Route::Primitive(PrimitiveAction::Scroll {
            direction: *direction,
            amount: (*amount).max(1),
        }),
        Action::ScrollAt {
            x,
            y,
            delta_x,
            delta_y,
        } => Route::Primitive(PrimitiveAction::ScrollAt {
            x: *x,
            y: *y,
            delta_x: *delta_x,
            delta_y: *delta_y,
        }),
        Action::Type { text } if text.is_empty() => Route::Rejected("type: empty text".into()),
        Action::Type { text } => Route::Primitive(PrimitiveAction::TypeText { text: text.clone() }),
        Action::Key { combo } => match parse_key_combo(combo) {
            Ok(_) => Route::Primitive(PrimitiveAction::KeyCombo {
                combo: combo.clone(),
            }),
            Err(e) => Route::Rejected(e.to_string()),
        },
        Action::Wait { millis } => Route::Wait(Duration::from_millis(*millis)),
        Action::RunScript { script } => match safety.check_script(script) {
            Ok(()) => Route::Primitive(PrimitiveAction::RunScript {
                script: script.clone(),
            }),
            Err(e) => Route::Rejected(e.to_string()),
        },
        Action::NavigateToUrl { url } => match safety.check_url(url) {
            Ok(()) => Route::Primitive(PrimitiveAction::OpenUrl { url: url.clone() }),
            Err(e) => Route::Rejected(e.to_string()),
        },
        Action::OpenApp { app_name } => Route::Primitive(PrimitiveAction::OpenApp {
            app_name: app_name.clone(),
        }),
        Action::Search { query } => match search_url(query) {
            Some(url) => Route::Primitive(PrimitiveAction::OpenUrl { url }),
            None => Route::Rejected(format!("could not build search URL for {query:?}")),
        },
        Action::Done { .. } => Route::Rejected("done is not dispatchable".into()),
        Action::Invalid { raw_type, reason } => {
            Route::Rejected(format!("unknown action '{raw_type}': {reason}"))
        }
    }
}
