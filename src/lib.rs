pub mod agent_engine;
pub mod config;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod perception;
pub mod planner;

use std::sync::Arc;

use crate::agent_engine::engine::{AgentEngine, Collaborators};
use crate::agent_engine::event_bus::EventBus;
use crate::agent_engine::task_history::TaskHistory;
use crate::config::{AppConfig, HistoryConfig};
use crate::errors::DeskPilotResult;
use crate::executor::osascript::MacDesktop;
use crate::llm::registry::ProviderRegistry;
use crate::perception::gate::gate_for_mode;
use crate::planner::llm_planner::LlmPlanner;
use crate::planner::verifier::LlmVerifier;

/// Installs the global `tracing` subscriber. `RUST_LOG` overrides the default `info`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}

/// In-memory history, or the persisted one when `task_history_file` is set.
pub fn open_task_history(cfg: &HistoryConfig) -> DeskPilotResult<TaskHistory> {
    match &cfg.task_history_file {
        Some(path) => TaskHistory::with_file(cfg.task_capacity, path),
        None => Ok(TaskHistory::new(cfg.task_capacity)),
    }
}

/// Engine wired to the local macOS desktop and the configured LLM providers.
pub fn build_desktop_engine(
    config: &AppConfig,
    task_history: Arc<TaskHistory>,
    events: EventBus,
) -> DeskPilotResult<AgentEngine> {
    let registry = Arc::new(ProviderRegistry::from_config(config));
    tracing::info!(
        active = %config.llm.active_provider,
        providers = ?registry.list_names(),
        "LLM registry ready"
    );
    let desktop = Arc::new(MacDesktop::new(config.actuator.clone()));
    let collaborators = Collaborators {
        sensor: desktop.clone(),
        actuator: desktop,
        planner: Arc::new(LlmPlanner::new(Arc::clone(&registry))),
        verifier: Arc::new(LlmVerifier::new(Arc::clone(&registry))),
        gate: gate_for_mode(config.agent.screenshot_gate, registry),
    };
    AgentEngine::new(collaborators, config, task_history, events)
}
