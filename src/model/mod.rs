pub mod message;
pub mod request;
pub mod task;

pub use message::HistoryEntry;
pub use request::{CompletionRequest, CompletionRequestBody};
pub use task::TaskKind;
