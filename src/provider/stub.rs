use super::{to_contents, ChatRepository, Content, StreamFuture, TextStream};
use crate::error::ProviderError;
use crate::message::Message;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// What the stub answers with.
#[derive(Debug, Clone)]
pub enum Script {
    /// "You said: <text>", dripped in a few chunks.
    Echo,
    /// Yield these fragments verbatim, empty ones included.
    ///
    /// Real repositories never yield an empty fragment; this variant does so
    /// the session's handling of them can be tested.
    Chunks(Vec<String>),
    /// Fail before any stream is handed out.
    FailToStart(String),
    /// Yield `chunks`, then end the stream with an error.
    FailAfter { chunks: Vec<String>, error: String },
}

/// A request as the stub received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub text: String,
    pub history: Vec<Content>,
}

/// Offline repository: scripted responses, no network.
#[derive(Debug, Clone)]
pub struct StubRepository {
    script: Script,
    chunk_delay: Duration,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl StubRepository {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            chunk_delay: Duration::ZERO,
            requests: Arc::default(),
        }
    }

    pub fn echo() -> Self {
        Self::new(Script::Echo).with_chunk_delay(Duration::from_millis(120))
    }

    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Script::Chunks(chunks.into_iter().map(Into::into).collect()))
    }

    pub fn failing(error: impl Into<String>) -> Self {
        Self::new(Script::FailToStart(error.into()))
    }

    /// Pause between fragments, simulating network pacing.
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl ChatRepository for StubRepository {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn send_message_stream(&self, text: &str, history: &[Message]) -> StreamFuture {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                text: text.to_string(),
                history: to_contents(history),
            });
        }

        let (chunks, error) = match &self.script {
            Script::Echo => (
                vec!["You said: ".to_string(), text.to_string()],
                None,
            ),
            Script::Chunks(chunks) => (chunks.clone(), None),
            Script::FailToStart(msg) => {
                let err = ProviderError::Other(msg.clone());
                return Box::pin(async move { Err::<TextStream, _>(err) });
            }
            Script::FailAfter { chunks, error } => (chunks.clone(), Some(error.clone())),
        };
        let delay = self.chunk_delay;

        Box::pin(async move {
            let (tx, rx) = mpsc::channel::<Result<String, ProviderError>>(32);

            tokio::spawn(async move {
                for chunk in chunks {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(Ok(chunk)).await.is_err() {
                        return;
                    }
                }
                if let Some(msg) = error {
                    let _ = tx.send(Err(ProviderError::Stream(msg))).await;
                }
            });

            Ok::<_, ProviderError>(Box::pin(ReceiverStream::new(rx)) as TextStream)
        })
    }
}
