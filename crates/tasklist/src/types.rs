use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// State of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    #[default]
    NotStarted,
    InProgress,
    Complete,
    Cancelled,
}

impl TaskState {
    /// Markdown checkbox character for this state
    pub fn as_char(self) -> char {
        match self {
            TaskState::NotStarted => ' ',
            TaskState::InProgress => '/',
            TaskState::Complete => 'x',
            TaskState::Cancelled => '-',
        }
    }

    /// Parse a markdown checkbox character
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            ' ' => Some(TaskState::NotStarted),
            '/' => Some(TaskState::InProgress),
            'x' => Some(TaskState::Complete),
            '-' => Some(TaskState::Cancelled),
            _ => None,
        }
    }
}

/// A single task in the hierarchy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub state: TaskState,
    pub parent_id: Option<Uuid>,
    /// Ordered child task ids
    #[serde(default)]
    pub children: Vec<Uuid>,
    /// Tasks that must be COMPLETE before this one is ready
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    /// Position within the parent (or the root list)
    #[serde(default)]
    pub order: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Task {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: String::new(),
            state: TaskState::NotStarted,
            parent_id: None,
            children: Vec::new(),
            dependencies: Vec::new(),
            order: 0,
            created_at: now,
            updated_at: now,
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_char_roundtrip() {
        for state in [
            TaskState::NotStarted,
            TaskState::InProgress,
            TaskState::Complete,
            TaskState::Cancelled,
        ] {
            assert_eq!(TaskState::from_char(state.as_char()), Some(state));
        }
        assert_eq!(TaskState::from_char('?'), None);
    }

    #[test]
    fn test_state_serializes_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&TaskState::NotStarted).unwrap(),
            "\"NOT_STARTED\""
        );
        assert_eq!(
            serde_json::to_string(&TaskState::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }
}
