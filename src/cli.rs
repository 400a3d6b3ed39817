use clap::{Parser, Subcommand};

/// XMGpt chat (Rust)
#[derive(Debug, Parser)]
#[command(name = "xmgpt")]
#[command(version)]
#[command(about = "Chat with Gemini from the terminal", long_about = None)]
pub struct Args {
    /// Model name
    #[arg(short = 'm', long = "model")]
    pub model: Option<String>,

    /// Provider (default: config/provider or "google")
    #[arg(long = "provider")]
    pub provider: Option<String>,

    /// Milliseconds between revealed characters (0 disables the typing effect)
    #[arg(long = "reveal-delay-ms", value_name = "MS")]
    pub reveal_delay_ms: Option<u64>,

    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Prompt text (positional) (used when no subcommand is given)
    #[arg(value_name = "PROMPT")]
    pub prompt: Vec<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Line-based interactive chat on stdin/stdout
    Chat,

    /// Run an interactive terminal chat UI
    #[cfg(feature = "tui")]
    Tui,
}
