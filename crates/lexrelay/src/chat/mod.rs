//! Chat endpoint: payload model, validation, topics and the HTTP handler

mod error;
mod handler;
mod request;
mod session;
mod topic;

pub use error::ChatError;
pub use handler::{chat_handler, method_not_allowed};
pub use request::{ChatMessage, ChatRequest, ChatTurn, Role};
pub use session::{SessionId, SessionIdError};
pub use topic::{TopicClassifier, TopicRule};
