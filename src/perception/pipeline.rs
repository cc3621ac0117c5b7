//! Per-iteration observation: scan, screenshot decision, screen-state summary.
//!
//! Sensor problems never escape this module. A failed or timed-out scan is an
//! empty element list; a failed screenshot is no screenshot.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::agent_engine::action::ActionKind;
use crate::agent_engine::loop_control::StopToken;
use crate::errors::{DeskPilotError, DeskPilotResult};
use crate::perception::gate::{GateRequest, ScreenshotGate};
use crate::perception::stability::{wait_for_ui_settle, StabilityConfig};
use crate::perception::traits::{ScanContext, Sensor};
use crate::perception::types::{ElementDescriptor, Observation, Screenshot};

/// Screenshot decisions are cached per task under this key, so the same kind
/// of step gets the same answer for the rest of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GateKey {
    pub last_action: Option<ActionKind>,
    pub last_failed: bool,
}

/// What the observer needs to know about the loop for one observation.
#[derive(Debug, Clone)]
pub struct ObserveRequest<'a> {
    pub task: &'a str,
    pub step: u32,
    pub memory: &'a str,
    pub last_action: Option<ActionKind>,
    pub last_failed: bool,
    pub target_app: Option<String>,
}

/// Builds one [`Observation`] per loop iteration. Created per task.
pub struct StateObserver {
    sensor: Arc<dyn Sensor>,
    gate: Arc<dyn ScreenshotGate>,
    timeout: Duration,
    max_elements: usize,
    decisions: HashMap<GateKey, bool>,
}

async fn bounded<T, F>(what: &str, limit: Duration, fut: F) -> DeskPilotResult<T>
where
    F: Future<Output = DeskPilotResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r,
        Err(_) => Err(DeskPilotError::Timeout {
            what: what.to_string(),
            secs: limit.as_secs(),
        }),
    }
}

impl StateObserver {
    pub fn new(
        sensor: Arc<dyn Sensor>,
        gate: Arc<dyn ScreenshotGate>,
        timeout: Duration,
        max_elements: usize,
    ) -> Self {
        Self {
            sensor,
            gate,
            timeout,
            max_elements,
            decisions: HashMap::new(),
        }
    }

    fn scan_context(&self, target_app: Option<String>) -> ScanContext {
        ScanContext {
            target_app,
            max_elements: self.max_elements,
        }
    }

    pub async fn scan(&self, target_app: Option<String>) -> Vec<ElementDescriptor> {
        let ctx = self.scan_context(target_app);
        match bounded("scan", self.timeout, self.sensor.scan(&ctx)).await {
            Ok(elements) => elements,
            Err(e) => {
                tracing::warn!("scan failed, continuing with no elements: {e}");
                Vec::new()
            }
        }
    }

    async fn screenshot(&self) -> Option<Screenshot> {
        match bounded("screenshot", self.timeout, self.sensor.screenshot()).await {
            Ok(shot) => shot,
            Err(e) => {
                tracing::warn!("screenshot failed: {e}");
                None
            }
        }
    }

    pub async fn focused_app(&self) -> Option<String> {
        match bounded("focused_app", self.timeout, self.sensor.focused_app()).await {
            Ok(app) => app,
            Err(e) => {
                tracing::debug!("focused app unavailable: {e}");
                None
            }
        }
    }

    async fn sensor_state(&self) -> Option<String> {
        bounded("screen_state", self.timeout, self.sensor.screen_state())
            .await
            .unwrap_or_else(|e| {
                tracing::debug!("screen state unavailable: {e}");
                None
            })
    }

    /// Cached per [`GateKey`]; step 1 has no previous action.
    pub async fn decide_screenshot_need(&mut self, req: &ObserveRequest<'_>) -> bool {
        let key = GateKey {
            last_action: req.last_action,
            last_failed: req.last_failed,
        };
        if let Some(&cached) = self.decisions.get(&key) {
            return cached;
        }
        let gate_req = GateRequest {
            task: req.task,
            step: req.step,
            memory: req.memory,
            last_failed: req.last_failed,
        };
        let decision = match bounded("screenshot gate", self.timeout, self.gate.needs_screenshot(&gate_req)).await {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!("screenshot gate failed, taking screenshot: {e}");
                true
            }
        };
        self.decisions.insert(key, decision);
        decision
    }

    pub async fn observe(&mut self, req: &ObserveRequest<'_>) -> Observation {
        let elements = self.scan(req.target_app.clone()).await;
        let screenshot = if self.decide_screenshot_need(req).await {
            self.screenshot().await
        } else {
            None
        };
        let screen_state = merge_state(self.sensor_state().await, &elements);
        tracing::debug!(
            step = req.step,
            elements = elements.len(),
            screenshot = screenshot.is_some(),
            "observation built"
        );
        Observation {
            elements,
            screenshot,
            screen_state,
        }
    }

    /// Fresh observation that always carries a screenshot (used to check `done` claims).
    pub async fn full_observation(&self, target_app: Option<String>) -> Observation {
        let elements = self.scan(target_app).await;
        let screenshot = self.screenshot().await;
        let screen_state = merge_state(self.sensor_state().await, &elements);
        Observation {
            elements,
            screenshot,
            screen_state,
        }
    }

    /// Re-scan after a UI-mutating action until two scans agree or `budget` runs out.
    /// A failed re-scan keeps `before`, so no UI change is reported for it.
    pub async fn settle(
        &self,
        target_app: Option<String>,
        budget: Duration,
        stop: &StopToken,
        before: &[ElementDescriptor],
    ) -> Vec<ElementDescriptor> {
        let ctx = self.scan_context(target_app);
        let settled = wait_for_ui_settle(
            || bounded("scan", self.timeout, self.sensor.scan(&ctx)),
            StabilityConfig::with_budget(budget.as_millis() as u64),
            stop,
        )
        .await;
        match settled {
            Ok(s) => s.elements,
            Err(e) => {
                tracing::warn!("post-action scan failed: {e}");
                before.to_vec()
            }
        }
    }
}

/// Short textual reading of a scan for the planner.
pub fn analyze_elements(elements: &[ElementDescriptor]) -> Vec<String> {
    if elements.is_empty() {
        return vec![
            "No interactive elements detected (app unsupported or still loading); use keyboard actions or coordinates".into(),
        ];
    }

    let mut notes = Vec::new();
    let roles: Vec<String> = elements.iter().map(|e| e.normalized_role()).collect();

    let dialog = elements.iter().zip(&roles).any(|(e, r)| {
        r.contains("sheet") || r.contains("dialog") || e.name.to_lowercase().contains("alert")
    });
    if dialog {
        notes.push("A dialog or sheet is open".to_string());
    }

    let fields: Vec<&ElementDescriptor> = elements
        .iter()
        .zip(&roles)
        .filter(|(_, r)| {
            matches!(r.as_str(), "textfield" | "textarea" | "searchfield" | "combobox")
        })
        .map(|(e, _)| e)
        .collect();
    if let Some(f) = fields.iter().find(|f| f.focused) {
        notes.push(format!("Text field focused: \"{}\" ({})", f.name, f.selector));
    } else if !fields.is_empty() {
        notes.push(format!("{} text field(s) present, none focused", fields.len()));
    }

    if elements.len() < 5 {
        notes.push(format!("Very few elements visible ({})", elements.len()));
    }
    notes
}

fn merge_state(sensor_state: Option<String>, elements: &[ElementDescriptor]) -> Option<String> {
    let mut parts: Vec<String> = sensor_state.into_iter().collect();
    parts.extend(analyze_elements(elements));
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}
