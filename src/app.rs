use anyhow::Context;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use xmgpt::config::Settings;
use xmgpt::provider::{self, ChatRepository};
use xmgpt::{ChatSession, ChatState, ConfigError, MessageId, SendMessageUseCase, SubmitError};

pub fn build_repository(
    http: &reqwest::Client,
    settings: &Settings,
) -> anyhow::Result<Arc<dyn ChatRepository>> {
    match settings.provider.as_str() {
        "google" => {
            #[cfg(feature = "google")]
            {
                let Some(api_key) = settings.api_key.clone() else {
                    let path = xmgpt::paths::config_file()?;
                    return Err(ConfigError::MissingApiKey {
                        path: path.display().to_string(),
                    }
                    .into());
                };
                let mut repo =
                    provider::google::GeminiRepository::new(http.clone(), api_key, &settings.model)?;
                if let Some(base) = &settings.api_base {
                    repo = repo
                        .with_api_base(base)
                        .with_context(|| format!("invalid google.api_base: {base}"))?;
                }
                Ok(Arc::new(repo))
            }
            #[cfg(not(feature = "google"))]
            {
                let _ = http;
                Err(ConfigError::ProviderDisabled("google").into())
            }
        }
        "stub" => Ok(Arc::new(provider::stub::StubRepository::echo())),
        other => Err(ConfigError::UnknownProvider(other.to_string()).into()),
    }
}

pub fn build_session(repository: Arc<dyn ChatRepository>, settings: &Settings) -> Arc<ChatSession> {
    let session = ChatSession::new(SendMessageUseCase::new(repository))
        .with_reveal_delay(settings.reveal_delay);
    Arc::new(session)
}

/// Prints the newest assistant message as it is revealed.
///
/// Text only ever grows, so each render writes the suffix not printed yet. A new
/// assistant message (the reply, or an error after a partial reply) starts on a
/// fresh line.
#[derive(Debug, Default)]
pub struct RevealPrinter {
    current: Option<MessageId>,
    printed: usize,
}

impl RevealPrinter {
    pub fn render(&mut self, state: &ChatState, out: &mut dyn Write) -> std::io::Result<()> {
        let Some(last) = state.messages.last() else {
            return Ok(());
        };
        if last.is_user() {
            return Ok(());
        }

        if self.current != Some(last.id()) {
            if self.current.is_some() && self.printed > 0 {
                writeln!(out)?;
            }
            self.current = Some(last.id());
            self.printed = 0;
        }

        let text = last.text();
        if let Some(rest) = text.get(self.printed..) {
            if !rest.is_empty() {
                out.write_all(rest.as_bytes())?;
                out.flush()?;
            }
        }
        self.printed = text.len();
        Ok(())
    }

    /// End the current reply's line.
    pub fn finish(&mut self, out: &mut dyn Write) -> std::io::Result<()> {
        if self.current.take().is_some() {
            writeln!(out)?;
        }
        self.printed = 0;
        Ok(())
    }
}

/// Send one message and print the reply while it is revealed.
pub async fn send_and_print(
    session: &ChatSession,
    text: &str,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let mut rx: watch::Receiver<ChatState> = session.subscribe();
    let mut printer = RevealPrinter::default();

    let send = session.send_message(text);
    tokio::pin!(send);

    let res = loop {
        tokio::select! {
            res = &mut send => break res,
            changed = rx.changed() => {
                if changed.is_err() {
                    break send.await;
                }
                printer.render(&rx.borrow_and_update(), out)?;
            }
        }
    };

    // Whatever changed after the last notification we handled.
    printer.render(&session.snapshot(), out)?;
    printer.finish(out)?;

    match res {
        Ok(()) => Ok(()),
        Err(SubmitError::EmptyText) => anyhow::bail!("No prompt provided"),
        Err(e) => Err(e.into()),
    }
}

/// One-shot prompt; fails when the provider reported an error.
pub async fn run_once(session: &ChatSession, prompt: &str, out: &mut dyn Write) -> anyhow::Result<()> {
    send_and_print(session, prompt, out).await?;
    if let Some(err) = session.last_error() {
        anyhow::bail!("provider error: {err}");
    }
    Ok(())
}

/// Line-based chat loop on stdin.
pub async fn run_chat(session: &ChatSession) -> anyhow::Result<()> {
    let mut out = std::io::stdout();
    writeln!(out, "Type a message and press Enter. Commands: /quit, /clear")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let msg = line.trim();
        match msg {
            "" => continue,
            "/quit" => break,
            "/clear" => {
                session.clear()?;
                writeln!(out, "(conversation cleared)")?;
            }
            _ => send_and_print(session, msg, &mut out).await?,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use xmgpt::config::{Config, Overrides};
    use xmgpt::provider::stub::{Script, StubRepository};

    fn stub_session(stub: StubRepository) -> Arc<ChatSession> {
        let settings = Settings::resolve(
            None,
            Overrides {
                provider: Some("stub".to_string()),
                ..Overrides::default()
            },
            None,
        );
        build_session(Arc::new(stub), &settings)
    }

    #[tokio::test(start_paused = true)]
    async fn prints_reply_as_one_line() {
        let session = stub_session(StubRepository::chunks(["Hello", "", " there"]));
        let mut out = Vec::new();

        send_and_print(&session, "Hi", &mut out).await.unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), "Hello there\n");
    }

    #[tokio::test(start_paused = true)]
    async fn error_after_partial_reply_starts_a_new_line() {
        let session = stub_session(StubRepository::new(Script::FailAfter {
            chunks: vec!["Hel".to_string()],
            error: "boom".to_string(),
        }));
        let mut out = Vec::new();

        send_and_print(&session, "Hi", &mut out).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Hel\nError: response stream interrupted: boom\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_reports_provider_failure() {
        let session = stub_session(StubRepository::failing("quota exceeded"));
        let mut out = Vec::new();

        let err = run_once(&session, "Hi", &mut out).await.unwrap_err();

        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(String::from_utf8(out).unwrap(), "Error: quota exceeded\n");
        assert_eq!(session.messages().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_prompt_is_refused() {
        let session = stub_session(StubRepository::chunks(["x"]));
        let err = run_once(&session, "   ", &mut Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("No prompt provided"));
        assert!(session.messages().is_empty());
    }

    #[test]
    fn reveal_delay_flows_into_session() {
        let settings = Settings::resolve(
            None,
            Overrides {
                reveal_delay_ms: Some(7),
                ..Overrides::default()
            },
            None,
        );
        let session = build_session(Arc::new(StubRepository::chunks(["x"])), &settings);
        assert_eq!(session.reveal_delay(), Duration::from_millis(7));
    }

    #[test]
    fn stub_provider_needs_no_key() {
        let settings = Settings::resolve(
            None,
            Overrides {
                provider: Some("stub".to_string()),
                ..Overrides::default()
            },
            None,
        );
        let repo = build_repository(&reqwest::Client::new(), &settings).unwrap();
        assert_eq!(repo.name(), "stub");
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let cfg = Config {
            provider: Some("openai".to_string()),
            ..Config::default()
        };
        let settings = Settings::resolve(Some(&cfg), Overrides::default(), None);
        let err = build_repository(&reqwest::Client::new(), &settings)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::UnknownProvider(p)) if p == "openai"
        ));
    }
}
