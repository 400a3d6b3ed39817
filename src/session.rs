//! Chat session state and the streaming reveal loop.
//!
//! A [`ChatSession`] owns the conversation. Each send appends the user turn,
//! asks the use case for a response stream and reveals the reply one character
//! at a time into an assistant message. Observers subscribe to a
//! `watch::Receiver<ChatState>` and re-render on every change.

use crate::error::{ProviderError, SubmitError};
use crate::message::{Message, MessageId};
use crate::usecase::SendMessageUseCase;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

/// Pause between revealed characters.
pub const DEFAULT_REVEAL_DELAY: Duration = Duration::from_millis(30);

/// Everything a presentation layer needs to draw the conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatState {
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub last_error: Option<String>,
}

pub struct ChatSession {
    use_case: SendMessageUseCase,
    state: watch::Sender<ChatState>,
    in_flight: AtomicBool,
    reveal_delay: Duration,
}

impl ChatSession {
    pub fn new(use_case: SendMessageUseCase) -> Self {
        let (state, _) = watch::channel(ChatState::default());
        Self {
            use_case,
            state,
            in_flight: AtomicBool::new(false),
            reveal_delay: DEFAULT_REVEAL_DELAY,
        }
    }

    pub fn with_reveal_delay(mut self, delay: Duration) -> Self {
        self.reveal_delay = delay;
        self
    }

    pub fn reveal_delay(&self) -> Duration {
        self.reveal_delay
    }

    /// Change notifications; the receiver always sees the latest state.
    ///
    /// Changes made between two reads are merged, so a slow observer can skip
    /// intermediate states (the empty reply placeholder, single characters).
    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.borrow().messages.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.borrow().last_error.clone()
    }

    /// Forget the conversation. Refused while a send is in flight.
    pub fn clear(&self) -> Result<(), SubmitError> {
        let _guard = InFlight::acquire(self)?;
        self.state.send_modify(|s| {
            s.messages.clear();
            s.last_error = None;
        });
        tracing::info!("conversation cleared");
        Ok(())
    }

    /// Send `text` and reveal the reply.
    ///
    /// Resolves once the reply is fully revealed or the send has failed. Provider
    /// failures do not come back as `Err`; they land in `last_error` and as an
    /// error message in the conversation. `Err` means nothing was sent.
    ///
    /// Dropping the returned future stops the reveal where it is and puts the
    /// session back to idle.
    pub async fn send_message(&self, text: &str) -> Result<(), SubmitError> {
        if text.trim().is_empty() {
            return Err(SubmitError::EmptyText);
        }
        let _guard = InFlight::acquire(self)?;

        self.state.send_modify(|s| {
            s.messages.push(Message::user(text));
            s.is_loading = true;
            s.last_error = None;
        });

        let history = self.state.borrow().messages.clone();
        tracing::debug!(
            repository = self.use_case.repository_name(),
            turns = history.len(),
            "sending message"
        );

        match self.stream_reply(text, &history).await {
            Ok(revealed) => {
                tracing::info!(chars = revealed, "reply complete");
                self.state.send_modify(|s| s.is_loading = false);
            }
            Err(e) => self.fail(e),
        }
        Ok(())
    }

    /// Run [`send_message`](Self::send_message) on its own task.
    ///
    /// Aborting the handle abandons the send the same way dropping the future does.
    pub fn spawn_send(self: &Arc<Self>, text: impl Into<String>) -> JoinHandle<Result<(), SubmitError>> {
        let this = Arc::clone(self);
        let text = text.into();
        tokio::spawn(async move { this.send_message(&text).await })
    }

    async fn stream_reply(&self, text: &str, history: &[Message]) -> Result<usize, ProviderError> {
        let mut stream = self.use_case.execute(text, history).await?;

        let receiver = Message::assistant("");
        let receiver_id = receiver.id();
        self.state.send_modify(|s| s.messages.push(receiver));

        let mut revealed = 0;
        while let Some(fragment) = stream.next().await {
            for c in fragment?.chars() {
                self.reveal(receiver_id, c);
                revealed += 1;
                if !self.reveal_delay.is_zero() {
                    tokio::time::sleep(self.reveal_delay).await;
                }
            }
        }
        Ok(revealed)
    }

    fn reveal(&self, id: MessageId, c: char) {
        self.state.send_modify(|s| {
            if let Some(m) = s.messages.iter_mut().rev().find(|m| m.id() == id) {
                m.push_char(c);
            }
        });
    }

    fn fail(&self, e: ProviderError) {
        tracing::warn!(error = %e, "send failed");
        let description = e.to_string();
        self.state.send_modify(|s| {
            s.messages.push(Message::assistant(format!("Error: {description}")));
            s.last_error = Some(description);
            s.is_loading = false;
        });
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("use_case", &self.use_case)
            .field("in_flight", &self.in_flight.load(Ordering::Relaxed))
            .field("reveal_delay", &self.reveal_delay)
            .finish_non_exhaustive()
    }
}

/// Marks the session busy; releasing it also clears a stale loading flag left
/// by an abandoned send.
struct InFlight<'a> {
    session: &'a ChatSession,
}

impl<'a> InFlight<'a> {
    fn acquire(session: &'a ChatSession) -> Result<Self, SubmitError> {
        session
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| SubmitError::Busy)?;
        Ok(Self { session })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.session.state.send_if_modified(|s| {
            let was_loading = s.is_loading;
            s.is_loading = false;
            was_loading
        });
        self.session.in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Author;
    use crate::provider::stub::{Script, StubRepository};
    use crate::provider::{ChatRepository, StreamFuture};
    use tokio::sync::Notify;
    use tokio::time::Instant;

    fn session_with(stub: StubRepository) -> (Arc<ChatSession>, Arc<StubRepository>) {
        let stub = Arc::new(stub);
        let session = ChatSession::new(SendMessageUseCase::new(stub.clone()));
        (Arc::new(session), stub)
    }

    #[tokio::test(start_paused = true)]
    async fn successful_stream_reveals_full_reply() {
        let (session, _) = session_with(StubRepository::chunks(["Hello", " there!"]));

        assert!(session.messages().is_empty());
        session.send_message("Hi").await.unwrap();

        let state = session.snapshot();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].text(), "Hi");
        assert_eq!(state.messages[0].author(), Author::User);
        assert_eq!(state.messages[1].text(), "Hello there!");
        assert_eq!(state.messages[1].author(), Author::Assistant);
        assert!(!state.is_loading);
        assert_eq!(state.last_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_acquisition_appends_error_message() {
        let (session, _) = session_with(StubRepository::failing("quota exceeded"));

        session.send_message("Hi").await.unwrap();

        let state = session.snapshot();
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages[0].text(), "Hi");
        assert!(state.messages[1].text().contains("Error"));
        assert!(state.messages[1].text().contains("quota exceeded"));
        assert!(!state.is_loading);
        assert_eq!(state.last_error.as_deref(), Some("quota exceeded"));
    }

    #[tokio::test(start_paused = true)]
    async fn mid_stream_failure_keeps_partial_reply() {
        let (session, _) = session_with(StubRepository::new(Script::FailAfter {
            chunks: vec!["Hel".to_string(), "lo".to_string()],
            error: "connection reset".to_string(),
        }));

        session.send_message("Hi").await.unwrap();

        let state = session.snapshot();
        assert_eq!(state.messages.len(), 3);
        assert_eq!(state.messages[1].text(), "Hello");
        assert_eq!(
            state.messages[2].text(),
            "Error: response stream interrupted: connection reset"
        );
        assert!(state.last_error.is_some());
        assert!(!state.is_loading);
    }

    #[tokio::test(start_paused = true)]
    async fn reveal_takes_one_delay_per_character() {
        let (session, _) = session_with(StubRepository::chunks(["ab", "", "c", ""]));

        let start = Instant::now();
        session.send_message("go").await.unwrap();

        assert_eq!(start.elapsed(), DEFAULT_REVEAL_DELAY * 3);
        assert_eq!(session.messages()[1].text(), "abc");
    }

    #[tokio::test(start_paused = true)]
    async fn final_text_does_not_depend_on_delay() {
        let fragments = ["Über", " ", "naïve 🚀", "", " done"];
        let mut finals = Vec::new();
        for delay in [Duration::ZERO, Duration::from_millis(1), DEFAULT_REVEAL_DELAY] {
            let stub = Arc::new(StubRepository::chunks(fragments));
            let session =
                ChatSession::new(SendMessageUseCase::new(stub)).with_reveal_delay(delay);
            session.send_message("go").await.unwrap();
            finals.push(session.messages()[1].text().to_string());
        }
        assert!(finals.iter().all(|t| t == &fragments.concat()));
    }

    #[tokio::test(start_paused = true)]
    async fn observers_see_characters_in_order() {
        let (session, _) = session_with(StubRepository::chunks(["ab", "c"]));
        let mut rx = session.subscribe();

        let handle = session.spawn_send("go");
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            if let Some(reply) = state.messages.get(1) {
                if seen.last() != Some(&reply.text().to_string()) {
                    seen.push(reply.text().to_string());
                }
            }
            if !state.is_loading && state.messages.len() == 2 {
                break;
            }
        }
        handle.await.unwrap().unwrap();

        // `watch` keeps only the latest value, so intermediate states may be
        // skipped, but what is seen only ever grows.
        assert_eq!(seen.last().map(String::as_str), Some("abc"));
        for pair in seen.windows(2) {
            assert!(pair[1].starts_with(&pair[0]), "{:?} does not extend {:?}", pair[1], pair[0]);
            assert!(pair[1].len() > pair[0].len());
        }
        assert!(seen.iter().all(|s| "abc".starts_with(s.as_str())));
    }

    /// Holds stream acquisition until released.
    struct GatedRepository {
        gate: Arc<Notify>,
        inner: StubRepository,
    }

    impl ChatRepository for GatedRepository {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn send_message_stream(&self, text: &str, history: &[Message]) -> StreamFuture {
            let gate = self.gate.clone();
            let inner = self.inner.send_message_stream(text, history);
            Box::pin(async move {
                gate.notified().await;
                inner.await
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn user_message_is_appended_before_provider_answers() {
        let gate = Arc::new(Notify::new());
        let repo = GatedRepository {
            gate: gate.clone(),
            inner: StubRepository::chunks(["ok"]),
        };
        let session = Arc::new(ChatSession::new(SendMessageUseCase::new(Arc::new(repo))));

        let handle = session.spawn_send("Hi");
        tokio::task::yield_now().await;

        let state = session.snapshot();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.messages[0].text(), "Hi");
        assert!(state.messages[0].is_user());
        assert!(state.is_loading);

        gate.notify_one();
        handle.await.unwrap().unwrap();
        assert_eq!(session.messages()[1].text(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_send_is_rejected() {
        let gate = Arc::new(Notify::new());
        let repo = GatedRepository {
            gate: gate.clone(),
            inner: StubRepository::chunks(["ok"]),
        };
        let session = Arc::new(ChatSession::new(SendMessageUseCase::new(Arc::new(repo))));

        let first = session.spawn_send("one");
        tokio::task::yield_now().await;

        assert_eq!(session.send_message("two").await, Err(SubmitError::Busy));
        assert_eq!(session.clear(), Err(SubmitError::Busy));
        assert_eq!(session.messages().len(), 1);

        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(session.messages().len(), 2);

        gate.notify_one();
        session.send_message("three").await.unwrap();
        assert_eq!(session.messages().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_text_is_rejected_without_mutation() {
        let (session, stub) = session_with(StubRepository::chunks(["x"]));
        assert_eq!(session.send_message("").await, Err(SubmitError::EmptyText));
        assert_eq!(session.send_message("  \n").await, Err(SubmitError::EmptyText));
        assert!(session.messages().is_empty());
        assert!(stub.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn history_sent_to_provider_includes_new_turn() {
        let (session, stub) = session_with(StubRepository::chunks(["Hello"]));
        session.send_message("Hi").await.unwrap();
        session.send_message("Again").await.unwrap();

        let requests = stub.requests();
        assert_eq!(requests.len(), 2);
        let roles: Vec<_> = requests[1]
            .history
            .iter()
            .map(|c| c.role.clone().unwrap_or_default())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(requests[1].history[2].text(), "Again");
        assert_eq!(requests[1].text, "Again");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_receiver_after_failure_is_left_out_of_next_request() {
        let (session, stub) = session_with(StubRepository::new(Script::FailAfter {
            chunks: vec![],
            error: "boom".to_string(),
        }));
        session.send_message("Hi").await.unwrap();
        assert_eq!(session.messages().len(), 3);
        assert_eq!(session.messages()[1].text(), "");

        session.send_message("Retry").await.unwrap();
        let sent = &stub.requests()[1].history;
        assert!(sent.iter().all(|c| !c.text().is_empty()));
        assert_eq!(sent.len(), 3);
        // The conversation itself is untouched.
        assert_eq!(session.messages()[1].text(), "");
    }

    #[tokio::test(start_paused = true)]
    async fn new_send_clears_previous_error() {
        let gate = Arc::new(Notify::new());
        let repo = GatedRepository {
            gate: gate.clone(),
            inner: StubRepository::failing("down"),
        };
        let session = Arc::new(ChatSession::new(SendMessageUseCase::new(Arc::new(repo))));

        let first = session.spawn_send("Hi");
        gate.notify_one();
        first.await.unwrap().unwrap();
        assert_eq!(session.last_error().as_deref(), Some("down"));

        let second = session.spawn_send("again");
        tokio::task::yield_now().await;
        assert_eq!(session.last_error(), None);
        assert!(session.is_loading());

        gate.notify_one();
        second.await.unwrap().unwrap();
        assert_eq!(session.last_error().as_deref(), Some("down"));
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn aborting_a_send_returns_to_idle() {
        let (session, _) = session_with(StubRepository::chunks(["abcdef"]));

        let handle = session.spawn_send("go");
        tokio::time::sleep(DEFAULT_REVEAL_DELAY * 2 + Duration::from_millis(5)).await;
        handle.abort();
        let _ = handle.await;

        let partial = session.messages()[1].text().to_string();
        assert!(!partial.is_empty() && partial.len() < 6, "partial = {partial:?}");
        assert!(!session.is_loading());

        tokio::time::sleep(DEFAULT_REVEAL_DELAY * 10).await;
        assert_eq!(session.messages()[1].text(), partial);
        session.clear().unwrap();
        assert!(session.messages().is_empty());
    }
}
