mod app;
mod cli;

#[cfg(feature = "tui")]
mod tui;

use anyhow::Context;
use clap::Parser;
use xmgpt::config::{self, Overrides, Settings};
use xmgpt::paths;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    // Log lines would tear the full-screen UI.
    #[cfg(feature = "tui")]
    let default_filter = if matches!(args.cmd, Some(cli::Command::Tui)) {
        "warn"
    } else {
        "info"
    };
    #[cfg(not(feature = "tui"))]
    let default_filter = "info";

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_path = paths::config_file()?;
    let cfg = config::Config::load_optional(&config_path)?;
    tracing::debug!(?config_path, loaded = cfg.is_some(), "resolved config");

    let settings = Settings::resolve(
        cfg.as_ref(),
        Overrides {
            model: args.model.clone(),
            provider: args.provider.clone(),
            reveal_delay_ms: args.reveal_delay_ms,
        },
        std::env::var("GEMINI_API_KEY").ok(),
    );

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let repository = app::build_repository(&http, &settings)?;
    tracing::debug!(provider = repository.name(), model = %settings.model, "repository ready");
    let session = app::build_session(repository, &settings);

    match args.cmd {
        Some(cli::Command::Chat) => return app::run_chat(&session).await,
        #[cfg(feature = "tui")]
        Some(cli::Command::Tui) => return tui::run_tui(session, &settings).await,
        None => {}
    }

    let prompt = args.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Try: xmgpt \"Hello\" or `xmgpt chat`");
    }

    app::run_once(&session, &prompt, &mut std::io::stdout()).await
}
