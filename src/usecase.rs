use crate::message::Message;
use crate::provider::{ChatRepository, StreamFuture};
use std::sync::Arc;

/// Send one message and stream the reply.
///
/// Delegates to the repository unchanged; it exists so the session can be driven
/// by any `ChatRepository`, scripted stubs included.
#[derive(Clone)]
pub struct SendMessageUseCase {
    repository: Arc<dyn ChatRepository>,
}

impl SendMessageUseCase {
    pub fn new(repository: Arc<dyn ChatRepository>) -> Self {
        Self { repository }
    }

    pub fn repository_name(&self) -> &'static str {
        self.repository.name()
    }

    pub fn execute(&self, text: &str, history: &[Message]) -> StreamFuture {
        self.repository.send_message_stream(text, history)
    }
}

impl std::fmt::Debug for SendMessageUseCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendMessageUseCase")
            .field("repository", &self.repository.name())
            .finish()
    }
}
