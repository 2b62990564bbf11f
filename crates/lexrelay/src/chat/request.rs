//! Inbound chat payload and its validation
//!
//! Every check here runs before the upstream call is opened.

use serde::Deserialize;

use super::error::ChatError;
use super::session::SessionId;
use crate::config::ChatLimits;

/// Speaker of a history message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One prior turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

/// Raw request body of `POST /api/chat`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub question: String,
}

/// A request that passed validation and may be sent upstream
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub history: Vec<ChatMessage>,
    pub question: String,
    pub context: Option<String>,
    pub session_id: SessionId,
}

impl ChatRequest {
    /// Decode a JSON body; shape errors (including unknown roles) are
    /// validation errors
    pub fn parse(body: &[u8]) -> Result<Self, ChatError> {
        serde_json::from_slice(body)
            .map_err(|e| ChatError::Validation(format!("Invalid request body: {e}")))
    }

    /// Enforce the size caps and produce a [`ChatTurn`]
    pub fn validate(self, limits: &ChatLimits) -> Result<ChatTurn, ChatError> {
        if self.messages.len() > limits.max_messages {
            return Err(ChatError::Validation(format!(
                "Too many messages: at most {} allowed",
                limits.max_messages
            )));
        }

        if let Some(index) = self
            .messages
            .iter()
            .position(|m| m.content.chars().count() > limits.max_message_chars)
        {
            return Err(ChatError::Validation(format!(
                "Message {index} exceeds {} characters",
                limits.max_message_chars
            )));
        }

        let question = self.question.trim();
        if question.is_empty() {
            return Err(ChatError::Validation("Question is required".to_string()));
        }
        if question.chars().count() > limits.max_question_chars {
            return Err(ChatError::Validation(format!(
                "Question exceeds {} characters",
                limits.max_question_chars
            )));
        }

        let context = self.context.filter(|c| !c.trim().is_empty());
        if let Some(context) = &context {
            if context.chars().count() > limits.max_context_chars {
                return Err(ChatError::Validation(format!(
                    "Context exceeds {} characters",
                    limits.max_context_chars
                )));
            }
        }

        let session_id = SessionId::from_optional(self.session_id.as_deref())
            .map_err(|e| ChatError::Validation(e.to_string()))?;

        Ok(ChatTurn {
            history: self.messages,
            question: question.to_string(),
            context,
            session_id,
        })
    }
}
