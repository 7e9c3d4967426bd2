pub mod app;
pub mod log_layer;
pub mod ui;

use std::time::Duration;

use crossterm::event::{self, Event, KeyEventKind};
use ratatui::DefaultTerminal;
use tokio::sync::{mpsc, watch};
use voxlive_core::{AssistantState, UiCommand};

pub use app::{App, AppAction};
pub use log_layer::{new_log_buffer, LogBuffer, TuiLogLayer};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Run the TUI event loop until the user quits.
pub async fn run(
    mut state_rx: watch::Receiver<AssistantState>,
    cmd_tx: mpsc::UnboundedSender<UiCommand>,
    log_buffer: LogBuffer,
) -> std::io::Result<()> {
    let mut terminal = ratatui::init();
    let result = run_loop(&mut terminal, &mut state_rx, &cmd_tx, log_buffer).await;
    ratatui::restore();
    result
}

async fn run_loop(
    terminal: &mut DefaultTerminal,
    state_rx: &mut watch::Receiver<AssistantState>,
    cmd_tx: &mpsc::UnboundedSender<UiCommand>,
    log_buffer: LogBuffer,
) -> std::io::Result<()> {
    let mut app = App::new(log_buffer);

    loop {
        if state_rx.has_changed().unwrap_or(false) {
            app.update_state(state_rx.borrow_and_update().clone());
        }

        terminal.draw(|frame| ui::draw(frame, &app))?;

        // Short poll so state updates re-render promptly.
        if event::poll(FRAME_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match app.handle_key(key) {
                    AppAction::Quit => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break;
                    }
                    AppAction::Command(cmd) => {
                        tracing::debug!(?cmd, "ui command");
                        let _ = cmd_tx.send(cmd);
                    }
                    AppAction::None => {}
                }
            }
        }
    }

    Ok(())
}
