use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Thinking,
    Action,
    Step,
    Error,
    Completion,
}

/// One caller-facing status update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    #[serde(rename = "type")]
    pub kind: StatusKind,
    pub content: String,
    pub task_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u32>,
    /// Only set on `completion` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
}

impl StatusEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, StatusKind::Completion | StatusKind::Error)
    }
}

/// Broadcast fan-out of status events. Sending with no subscribers is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StatusEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn send(&self, event: StatusEvent) {
        tracing::debug!(kind = ?event.kind, task_id = %event.task_id, "{}", event.content);
        let _ = self.tx.send(event);
    }

    /// Emitter bound to one task id.
    pub fn emitter(&self, task_id: impl Into<String>) -> StatusEmitter {
        StatusEmitter {
            bus: self.clone(),
            task_id: task_id.into(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct StatusEmitter {
    bus: EventBus,
    task_id: String,
}

impl StatusEmitter {
    fn emit(&self, kind: StatusKind, step: Option<u32>, success: Option<bool>, content: String) {
        self.bus.send(StatusEvent {
            kind,
            content,
            task_id: self.task_id.clone(),
            step,
            success,
        });
    }

    pub fn thinking(&self, step: u32, content: impl Into<String>) {
        self.emit(StatusKind::Thinking, Some(step), None, content.into());
    }

    pub fn action(&self, step: u32, content: impl Into<String>) {
        self.emit(StatusKind::Action, Some(step), None, content.into());
    }

    pub fn step(&self, step: u32, content: impl Into<String>) {
        self.emit(StatusKind::Step, Some(step), None, content.into());
    }

    pub fn error(&self, content: impl Into<String>) {
        self.emit(StatusKind::Error, None, None, content.into());
    }

    pub fn completion(&self, success: bool, content: impl Into<String>) {
        self.emit(StatusKind::Completion, None, Some(success), content.into());
    }
}
