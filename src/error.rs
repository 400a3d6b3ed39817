use thiserror::Error;

/// Failure while starting or consuming a provider response stream.
///
/// Every variant carries a human-readable description; the session surfaces it
/// verbatim through `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("failed to reach provider: {0}")]
    Request(String),

    #[error("provider returned HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("response stream interrupted: {0}")]
    Stream(String),

    #[error("malformed provider response: {0}")]
    Decode(String),

    #[error("provider error {code}: {message}")]
    Api { code: i64, message: String },

    #[error("{0}")]
    Other(String),
}

/// A history entry that has no provider representation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("message has no text to encode")]
    EmptyText,

    #[error("unknown content role: {0}")]
    UnknownRole(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no API key found (set GEMINI_API_KEY or google.api_key in {path})")]
    MissingApiKey { path: String },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("{0} provider is not enabled in this build")]
    ProviderDisabled(&'static str),
}

/// Why a submission was refused before touching the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("message text is empty")]
    EmptyText,

    #[error("a message is already being sent; wait for it to finish")]
    Busy,
}
