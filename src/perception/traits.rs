use async_trait::async_trait;

use crate::errors::DeskPilotResult;
use crate::perception::types::{ElementDescriptor, Screenshot};

/// What the sensor should scan. `None` means the frontmost application.
#[derive(Debug, Clone, Default)]
pub struct ScanContext {
    pub target_app: Option<String>,
    pub max_elements: usize,
}

/// Read side of the OS automation layer.
///
/// An empty scan is a valid answer (unsupported or inaccessible app), not an error.
/// Errors returned here are folded into an empty observation by the observer.
#[async_trait]
pub trait Sensor: Send + Sync {
    async fn scan(&self, ctx: &ScanContext) -> DeskPilotResult<Vec<ElementDescriptor>>;

    async fn screenshot(&self) -> DeskPilotResult<Option<Screenshot>>;

    /// Short description of the front application and window, if the sensor can tell.
    async fn screen_state(&self) -> DeskPilotResult<Option<String>> {
        Ok(None)
    }

    /// Name of the frontmost application.
    async fn focused_app(&self) -> DeskPilotResult<Option<String>> {
        Ok(None)
    }
}
