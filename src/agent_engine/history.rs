use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::agent_engine::action::PlannedAction;
use crate::errors::DeskPilotResult;

/// What happened when a planned action was carried out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub result_message: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            result_message: message.into(),
            success: true,
            verification: None,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            result_message: message.clone(),
            success: false,
            verification: None,
            error: Some(message),
        }
    }

    pub fn with_verification(mut self, verification: Option<String>) -> Self {
        self.verification = verification;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub step: u32,
    pub planned: PlannedAction,
    pub timestamp_iso: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed: Option<ExecutionRecord>,
}

impl ActionLogEntry {
    pub fn succeeded(&self) -> bool {
        self.executed.as_ref().is_some_and(|e| e.success)
    }

    /// One line of the memory view handed to the planner.
    pub fn render_line(&self) -> String {
        let mut line = format!(
            "Step {}: [{}] {}",
            self.step,
            self.planned.kind(),
            self.planned.intent
        );
        match &self.executed {
            Some(rec) => {
                let mark = if rec.success { "OK" } else { "FAILED" };
                line.push_str(&format!(" -> {mark}: {}", rec.result_message));
                if let Some(v) = &rec.verification {
                    line.push_str(&format!(" ({v})"));
                }
            }
            None => line.push_str(" -> not executed"),
        }
        line
    }
}

/// Append-only per-task action log. Truncation happens only in [`ActionLog::render`].
pub struct ActionLog {
    pub task_id: String,
    entries: Vec<ActionLogEntry>,
    file_path: Option<PathBuf>,
}

impl ActionLog {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            entries: Vec::new(),
            file_path: None,
        }
    }

    /// Also mirror every appended entry to `<dir>/session_<task_id>.jsonl`.
    pub fn with_session_file(mut self, dir: &Path) -> Self {
        self.file_path = Some(dir.join(format!("session_{}.jsonl", self.task_id)));
        self
    }

    pub fn append(&mut self, entry: ActionLogEntry) {
        self.entries.push(entry);
        if let Err(e) = self.flush() {
            tracing::warn!(task_id = %self.task_id, "failed to flush session entry: {e}");
        }
    }

    pub fn entries(&self) -> &[ActionLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<ActionLogEntry> {
        self.entries
    }

    /// Bounded memory view. Drops from the oldest end; the newest entry is always kept.
    pub fn render(&self, max_entries: usize, max_chars: usize) -> String {
        if self.entries.is_empty() {
            return "No actions taken yet.".to_string();
        }

        let mut kept: Vec<String> = Vec::new();
        let mut used = 0usize;
        for entry in self.entries.iter().rev() {
            if kept.len() >= max_entries.max(1) {
                break;
            }
            let line = entry.render_line();
            if !kept.is_empty() && used + line.len() + 1 > max_chars {
                break;
            }
            used += line.len() + 1;
            kept.push(line);
        }
        kept.reverse();

        let omitted = self.entries.len() - kept.len();
        let mut out = String::new();
        if omitted > 0 {
            out.push_str(&format!("({omitted} earlier steps omitted)\n"));
        }
        out.push_str(&kept.join("\n"));
        out
    }

    /// Append the latest entry to the JSONL file.
    fn flush(&self) -> DeskPilotResult<()> {
        let (Some(path), Some(last)) = (&self.file_path, self.entries.last()) else {
            return Ok(());
        };
        let line = serde_json::to_string(last)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(file, "{}", line)?;
        tracing::debug!(path = %path.display(), "history entry flushed");
        Ok(())
    }
}

/// `<local data dir>/DeskPilot/sessions`, falling back to the current working directory.
pub fn sessions_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_local_dir() {
        let d = data_dir.join("DeskPilot").join("sessions");
        if std::fs::create_dir_all(&d).is_ok() {
            return d;
        }
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}
