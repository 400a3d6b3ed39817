#![cfg(feature = "tui")]

use anyhow::Context;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};
use ratatui::Terminal;
use std::io;
use std::sync::Arc;
use tokio::sync::mpsc;
use xmgpt::config::Settings;
use xmgpt::{ChatSession, ChatState, SubmitError};

pub async fn run_tui(session: Arc<ChatSession>, settings: &Settings) -> anyhow::Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("enter alt screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        while let Ok(ev) = crossterm::event::read() {
            if ev_tx.send(ev).is_err() {
                break;
            }
        }
    });

    let mut state_rx = session.subscribe();
    let (err_tx, mut err_rx) = mpsc::unbounded_channel::<SubmitError>();
    let mut input = String::new();
    let mut notice = Some("Type a message and press Enter. Commands: /quit, /clear".to_string());
    let mut dirty = true;

    let mut ticker = tokio::time::interval(std::time::Duration::from_millis(33));

    let res = loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !dirty {
                    continue;
                }
                dirty = false;
                let state = state_rx.borrow_and_update().clone();
                if let Err(e) = draw(&mut terminal, &settings.model, &state, notice.as_deref(), &input) {
                    break Err(e);
                }
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                dirty = true;
            }
            Some(ev) = ev_rx.recv() => {
                dirty = true;
                if let Event::Key(key) = ev {
                    if handle_key(key, &mut input, &mut notice, &session, &err_tx) {
                        break Ok(());
                    }
                }
            }
            Some(e) = err_rx.recv() => {
                notice = Some(format!("({e})"));
                dirty = true;
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    res
}

/// Returns true when the UI should exit.
///
/// A send that the session refuses reports back through `errors`.
fn handle_key(
    key: KeyEvent,
    input: &mut String,
    notice: &mut Option<String>,
    session: &Arc<ChatSession>,
    errors: &mpsc::UnboundedSender<SubmitError>,
) -> bool {
    if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
        return true;
    }

    match key.code {
        KeyCode::Esc => return true,
        KeyCode::Char(c) => input.push(c),
        KeyCode::Backspace => {
            input.pop();
        }
        KeyCode::Enter => {
            let msg = input.trim().to_string();
            input.clear();
            if msg.is_empty() {
                return false;
            }

            if msg == "/quit" {
                return true;
            }
            if msg == "/clear" {
                *notice = match session.clear() {
                    Ok(()) => None,
                    Err(e) => Some(format!("({e})")),
                };
                return false;
            }

            *notice = None;

            let session = Arc::clone(session);
            let errors = errors.clone();
            tokio::spawn(async move {
                if let Err(e) = session.send_message(&msg).await {
                    let _ = errors.send(e);
                }
            });
        }
        _ => {}
    }

    false
}

fn draw(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    model: &str,
    state: &ChatState,
    notice: Option<&str>,
    input: &str,
) -> anyhow::Result<()> {
    terminal.draw(|f| {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(f.area());

        let mut text = Text::default();
        if let Some(n) = notice {
            text.lines.push(Line::styled(n.to_string(), Style::default().add_modifier(Modifier::DIM)));
            text.lines.push(Line::from(""));
        }
        for m in &state.messages {
            let (role, style) = if m.is_user() {
                ("you: ", Style::default().add_modifier(Modifier::BOLD))
            } else {
                ("gemini: ", Style::default())
            };
            text.lines.push(Line::styled(role, style));
            text.lines.extend(Text::from(m.text().to_string()).lines);
            text.lines.push(Line::from(""));
        }
        if state.is_loading {
            text.lines.push(Line::styled("thinking...", Style::default().add_modifier(Modifier::ITALIC)));
        }

        let title = match &state.last_error {
            Some(_) => format!("xmgpt: model {model} (last send failed)"),
            None => format!("xmgpt: model {model}"),
        };
        let chat = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });

        let input_w = Paragraph::new(input.to_string())
            .block(Block::default().borders(Borders::ALL).title("input"));

        f.render_widget(chat, chunks[0]);
        f.render_widget(input_w, chunks[1]);

        let x = chunks[1].x + 1 + input.chars().count() as u16;
        let y = chunks[1].y + 1;
        f.set_cursor_position((x.min(chunks[1].x + chunks[1].width.saturating_sub(2)), y));
    })?;
    Ok(())
}
