//! `Task`: the immutable unit of work a client submits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Build a task from trimmed, non-empty text.
    ///
    /// Mirrors the `POST /api/sessions` boundary rule in spec.md §6:
    /// `text` must be non-empty after trimming.
    pub fn new(text: impl Into<String>) -> Result<Self, TaskError> {
        let text = text.into();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(TaskError::EmptyText);
        }
        Ok(Self {
            task_id: TaskId::new(),
            text: trimmed.to_string(),
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task text must be non-empty after trimming")]
    EmptyText,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_text() {
        assert!(Task::new("   \n\t").is_err());
    }

    #[test]
    fn trims_text() {
        let t = Task::new("  echo hello  ").unwrap();
        assert_eq!(t.text, "echo hello");
    }
}
