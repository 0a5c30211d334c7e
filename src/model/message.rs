use serde::{Deserialize, Serialize};

use super::task::TaskKind;

/// One finished exchange kept by a client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub prompt: String,
    pub response: String,
    pub model: String,
    pub task: TaskKind,
    pub ts: i64,
    #[serde(default)]
    pub cached: bool,
}

impl HistoryEntry {
    pub fn new(prompt: String, response: String, model: String, task: TaskKind) -> Self {
        Self {
            prompt,
            response,
            model,
            task,
            ts: chrono::Utc::now().timestamp(),
            cached: false,
        }
    }
}
