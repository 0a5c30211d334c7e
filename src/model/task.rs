use std::fmt;

use serde::{Deserialize, Serialize};

/// What the user wants done with their input. Each kind wraps the raw input in
/// a short instruction before it is sent to the model.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Explain,
    Translate,
    Code,
    Summarize,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Explain => "explain",
            TaskKind::Translate => "translate",
            TaskKind::Code => "code",
            TaskKind::Summarize => "summarize",
        }
    }

    pub fn format_prompt(self, input: &str) -> String {
        match self {
            TaskKind::Explain => format!("Explain \"{input}\" in one simple sentence."),
            TaskKind::Translate => format!("Translate \"{input}\"."),
            TaskKind::Code => {
                format!("Write a JavaScript function for: {input}, with comments.")
            }
            TaskKind::Summarize => format!("Summarize this text in one sentence: \"{input}\"."),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
