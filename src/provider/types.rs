use crate::error::{ConversionError, ProviderError};
use crate::message::{Author, Message};
use futures_core::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Text fragments of one provider response, in arrival order.
pub type TextStream = BoxStream<'static, Result<String, ProviderError>>;

/// Pending stream acquisition.
pub type StreamFuture = Pin<Box<dyn Future<Output = Result<TextStream, ProviderError>> + Send>>;

/// Chat repository interface.
///
/// Implementations convert `history` into their own request format, send `text`
/// as the final user turn and return the response as a stream of non-empty text
/// fragments. The stream ends on exhaustion or with the first error.
pub trait ChatRepository: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start streaming a response.
    fn send_message_stream(&self, text: &str, history: &[Message]) -> StreamFuture;
}

/// Provider-side turn: a role plus its text parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

impl Content {
    pub fn new(author: Author, text: impl Into<String>) -> Self {
        Self {
            role: Some(author.role().to_string()),
            parts: vec![Part {
                text: Some(text.into()),
            }],
        }
    }

    /// Concatenated text of all parts.
    pub fn text(&self) -> String {
        self.parts.iter().filter_map(|p| p.text.as_deref()).collect()
    }

    /// Rebuild a domain message; the result gets a fresh id.
    pub fn to_message(&self) -> Result<Message, ConversionError> {
        let role = self.role.as_deref().unwrap_or_default();
        let author =
            Author::from_role(role).ok_or_else(|| ConversionError::UnknownRole(role.to_string()))?;
        let text = self.text();
        if text.is_empty() {
            return Err(ConversionError::EmptyText);
        }
        Ok(Message::new(author, text))
    }
}

impl TryFrom<&Message> for Content {
    type Error = ConversionError;

    fn try_from(message: &Message) -> Result<Self, Self::Error> {
        if message.text().is_empty() {
            return Err(ConversionError::EmptyText);
        }
        Ok(Content::new(message.author(), message.text()))
    }
}

/// Convert history for a provider request, skipping entries that cannot be encoded.
pub fn to_contents(history: &[Message]) -> Vec<Content> {
    history
        .iter()
        .filter_map(|m| match Content::try_from(m) {
            Ok(c) => Some(c),
            Err(e) => {
                tracing::debug!(id = %m.id(), error = %e, "dropping message from provider history");
                None
            }
        })
        .collect()
}
