//! Streaming Gemini chat session.
//!
//! Layers, leaf first: [`message`] (conversation turns), [`provider`] (chat
//! repositories that turn a request into a text stream), [`usecase`] (the seam
//! the session talks to) and [`session`] (conversation state plus the
//! typewriter reveal).

pub mod config;
pub mod error;
pub mod message;
pub mod paths;
pub mod provider;
pub mod session;
pub mod usecase;

pub use error::{ConfigError, ConversionError, ProviderError, SubmitError};
pub use message::{Author, Message, MessageId};
pub use provider::ChatRepository;
pub use session::{ChatSession, ChatState};
pub use usecase::SendMessageUseCase;
