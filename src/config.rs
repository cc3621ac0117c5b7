use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{DeskPilotError, DeskPilotResult};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    #[serde(default)]
    pub active_provider: String,
    #[serde(default)]
    pub providers: HashMap<String, ProviderEntry>,
    /// Role-to-model mapping. If a role is absent, falls back to active_provider defaults.
    #[serde(default)]
    pub roles: RolesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub display_name: String,
    pub api_base: String,
    /// Default model for this provider (used as fallback when no role config exists).
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Optional API key stored in config.toml (falls back to env var DESKPILOT_<ID>_API_KEY).
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Maps agent roles to specific provider+model combinations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RolesConfig {
    /// Chooses the next action. Needs vision when screenshots are attached.
    pub planner: Option<RoleEntry>,
    /// Cheap yes/no classifier deciding whether this step needs a screenshot.
    pub screenshot_gate: Option<RoleEntry>,
    /// Vision model confirming a `done` claim against a fresh screenshot.
    pub verifier: Option<RoleEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleEntry {
    /// Must match a key under [llm.providers.*].
    pub provider: String,
    /// Model name sent to the API.
    pub model: String,
    /// Use SSE streaming. Set false for fast classifier calls.
    #[serde(default)]
    pub stream: bool,
    /// Overrides the provider-level temperature for this role.
    pub temperature: Option<f64>,
}

fn default_temperature() -> f64 {
    0.1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    #[default]
    Llm,
    Heuristic,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_identical_failures")]
    pub max_identical_failures: u32,
    #[serde(default = "default_observe_timeout")]
    pub observe_timeout_secs: u64,
    #[serde(default = "default_planner_timeout")]
    pub planner_timeout_secs: u64,
    #[serde(default = "default_actuator_timeout")]
    pub actuator_timeout_secs: u64,
    #[serde(default = "default_verify_timeout")]
    pub verify_timeout_secs: u64,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default)]
    pub screenshot_gate: GateMode,
}

fn default_max_steps() -> u32 {
    30
}

fn default_max_identical_failures() -> u32 {
    3
}

fn default_observe_timeout() -> u64 {
    10
}

fn default_planner_timeout() -> u64 {
    8
}

fn default_actuator_timeout() -> u64 {
    15
}

fn default_verify_timeout() -> u64 {
    15
}

fn default_settle_ms() -> u64 {
    150
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_identical_failures: default_max_identical_failures(),
            observe_timeout_secs: default_observe_timeout(),
            planner_timeout_secs: default_planner_timeout(),
            actuator_timeout_secs: default_actuator_timeout(),
            verify_timeout_secs: default_verify_timeout(),
            settle_ms: default_settle_ms(),
            screenshot_gate: GateMode::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_task_capacity")]
    pub task_capacity: usize,
    #[serde(default = "default_memory_max_entries")]
    pub memory_max_entries: usize,
    #[serde(default = "default_memory_max_chars")]
    pub memory_max_chars: usize,
    #[serde(default = "default_tasks_in_prompt")]
    pub tasks_in_prompt: usize,
    #[serde(default)]
    pub persist_sessions: bool,
    #[serde(default)]
    pub task_history_file: Option<PathBuf>,
}

fn default_task_capacity() -> usize {
    50
}

fn default_memory_max_entries() -> usize {
    12
}

fn default_memory_max_chars() -> usize {
    4000
}

fn default_tasks_in_prompt() -> usize {
    5
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            task_capacity: default_task_capacity(),
            memory_max_entries: default_memory_max_entries(),
            memory_max_chars: default_memory_max_chars(),
            tasks_in_prompt: default_tasks_in_prompt(),
            persist_sessions: false,
            task_history_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default)]
    pub allow_scripts: bool,
    #[serde(default = "default_blocked_script_patterns")]
    pub blocked_script_patterns: Vec<String>,
    #[serde(default = "default_blocked_url_schemes")]
    pub blocked_url_schemes: Vec<String>,
}

fn default_blocked_script_patterns() -> Vec<String> {
    vec![
        r"rm\s+-rf".into(),
        r"do shell script\s+.*sudo".into(),
        r"\bmkfs\b".into(),
        r"\bdiskutil\s+erase".into(),
    ]
}

fn default_blocked_url_schemes() -> Vec<String> {
    vec!["file".into(), "javascript".into()]
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            allow_scripts: false,
            blocked_script_patterns: default_blocked_script_patterns(),
            blocked_url_schemes: default_blocked_url_schemes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorConfig {
    #[serde(default = "default_osascript")]
    pub osascript_path: String,
    #[serde(default = "default_screencapture")]
    pub screencapture_path: String,
    #[serde(default = "default_max_elements")]
    pub max_elements: usize,
}

fn default_osascript() -> String {
    "osascript".into()
}

fn default_screencapture() -> String {
    "screencapture".into()
}

fn default_max_elements() -> usize {
    150
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            osascript_path: default_osascript(),
            screencapture_path: default_screencapture(),
            max_elements: default_max_elements(),
        }
    }
}

fn resolve_config_path() -> DeskPilotResult<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            let candidate = parent.join("config.toml");
            if candidate.exists() {
                tracing::debug!(path = %candidate.display(), "config found next to executable");
                return Ok(candidate);
            }
        }
    }

    let cwd = std::env::current_dir()?;
    let candidate = cwd.join("config.toml");
    if candidate.exists() {
        tracing::debug!(path = %candidate.display(), "config found in working directory");
        return Ok(candidate);
    }

    Err(DeskPilotError::Config(
        "config.toml not found next to executable or in working directory".into(),
    ))
}

pub fn load_config() -> DeskPilotResult<AppConfig> {
    let path = resolve_config_path()?;
    load_config_from(&path)
}

pub fn load_config_from(path: &Path) -> DeskPilotResult<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    tracing::info!(
        path = %path.display(),
        provider = %config.llm.active_provider,
        max_steps = config.agent.max_steps,
        "config loaded"
    );
    Ok(config)
}

pub fn save_config(config: &AppConfig, path: &Path) -> DeskPilotResult<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::info!(path = %path.display(), "config saved");
    Ok(())
}
