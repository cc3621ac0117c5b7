use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DeskPilotResult;

/// Terminal record of one finished task. Never mutated after it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub id: String,
    pub task: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub success: bool,
    pub summary: String,
    pub final_state: String,
    pub actions_performed: Vec<String>,
}

/// Bounded cross-task history shared by every engine in the process.
///
/// Oldest records are evicted first once `capacity` is reached. When a
/// persistence file is configured the buffer is loaded from it on creation
/// and rewritten after every record.
pub struct TaskHistory {
    capacity: usize,
    tasks: Mutex<VecDeque<CompletedTask>>,
    file_path: Option<PathBuf>,
}

impl TaskHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tasks: Mutex::new(VecDeque::with_capacity(capacity)),
            file_path: None,
        }
    }

    /// Loads `path` if it exists; a missing file starts an empty history.
    pub fn with_file(capacity: usize, path: &Path) -> DeskPilotResult<Self> {
        let mut history = Self::new(capacity);
        history.file_path = Some(path.to_path_buf());
        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            let loaded: Vec<CompletedTask> = serde_json::from_str(&raw)?;
            let mut tasks = history.lock();
            for t in loaded {
                if tasks.len() == history.capacity {
                    tasks.pop_front();
                }
                tasks.push_back(t);
            }
            tracing::info!(path = %path.display(), count = tasks.len(), "task history loaded");
        }
        Ok(history)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<CompletedTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// The file is rewritten under the same lock, so the newest record is
    /// always the one on disk.
    pub fn record(&self, task: CompletedTask) {
        let mut tasks = self.lock();
        if tasks.len() == self.capacity {
            if let Some(evicted) = tasks.pop_front() {
                tracing::debug!(id = %evicted.id, "evicted oldest task from history");
            }
        }
        tasks.push_back(task);

        if let Some(path) = &self.file_path {
            let (front, back) = tasks.as_slices();
            let snapshot = [front, back].concat();
            if let Err(e) = save(path, &snapshot) {
                tracing::warn!(path = %path.display(), "failed to persist task history: {e}");
            }
        }
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<CompletedTask> {
        self.lock().iter().cloned().collect()
    }

    /// Newest-first summary for planner prompts.
    pub fn render(&self, max_tasks: usize) -> String {
        let tasks = self.lock();
        if tasks.is_empty() || max_tasks == 0 {
            return "No previous tasks completed yet.".to_string();
        }
        let mut out = String::from(
            "Previous tasks (informational only; they do NOT mean the current task is complete):\n",
        );
        for (i, t) in tasks.iter().rev().take(max_tasks).enumerate() {
            let status = if t.success { "succeeded" } else { "did not succeed" };
            out.push_str(&format!(
                "{}. \"{}\" {} ({}) at {}: {}",
                i + 1,
                t.task,
                status,
                t.final_state,
                t.end_time.format("%H:%M:%S"),
                t.summary
            ));
            if !t.actions_performed.is_empty() {
                let last: Vec<&str> = t
                    .actions_performed
                    .iter()
                    .rev()
                    .take(5)
                    .rev()
                    .map(String::as_str)
                    .collect();
                out.push_str(&format!(" | actions: {}", last.join("; ")));
            }
            out.push('\n');
        }
        out
    }
}

fn save(path: &Path, tasks: &[CompletedTask]) -> DeskPilotResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(tasks)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn task(n: usize) -> CompletedTask {
        CompletedTask {
            id: format!("t{n}"),
            task: format!("task {n}"),
            start_time: Utc::now(),
            end_time: Utc::now(),
            success: n % 2 == 0,
            summary: format!("summary {n}"),
            final_state: "done".into(),
            actions_performed: vec![format!("Opened (App{n})")],
        }
    }

    #[test]
    fn evicts_oldest_first() {
        let h = TaskHistory::new(50);
        for n in 0..60 {
            h.record(task(n));
            assert!(h.len() <= 50);
        }
        let snap = h.snapshot();
        assert_eq!(snap.len(), 50);
        assert_eq!(snap[0].id, "t10");
        assert_eq!(snap[49].id, "t59");
    }

    #[test]
    fn render_is_newest_first_and_bounded() {
        let h = TaskHistory::new(10);
        assert_eq!(h.render(5), "No previous tasks completed yet.");
        for n in 0..4 {
            h.record(task(n));
        }
        let text = h.render(2);
        assert!(text.contains("informational only"));
        let first = text.find("task 3").unwrap();
        let second = text.find("task 2").unwrap();
        assert!(first < second);
        assert!(!text.contains("task 1"));
    }

    #[test]
    fn concurrent_records_stay_bounded() {
        let h = Arc::new(TaskHistory::new(8));
        let handles: Vec<_> = (0..4)
            .map(|w| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || {
                    for n in 0..10 {
                        h.record(task(w * 100 + n));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(h.len(), 8);
    }

    #[test]
    fn concurrent_records_leave_the_latest_state_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let h = Arc::new(TaskHistory::with_file(5, &path).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|w| {
                let h = Arc::clone(&h);
                std::thread::spawn(move || {
                    for n in 0..6 {
                        h.record(task(w * 100 + n));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let reloaded = TaskHistory::with_file(5, &path).unwrap();
        assert_eq!(reloaded.snapshot(), h.snapshot());
    }

    #[test]
    fn persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        {
            let h = TaskHistory::with_file(3, &path).unwrap();
            for n in 0..4 {
                h.record(task(n));
            }
        }
        let h = TaskHistory::with_file(3, &path).unwrap();
        let ids: Vec<_> = h.snapshot().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec!["t1", "t2", "t3"]);
    }
}
