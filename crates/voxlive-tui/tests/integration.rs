use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::backend::TestBackend;
use ratatui::Terminal;
use tokio::sync::{mpsc, watch};
use voxlive_core::{AssistantState, SessionState, Turn, UiCommand};
use voxlive_tui::{new_log_buffer, ui, App, AppAction};

fn buffer_text(buf: &ratatui::buffer::Buffer) -> String {
    let area = buf.area();
    let mut text = String::new();
    for y in area.y..area.y + area.height {
        for x in area.x..area.x + area.width {
            text.push_str(buf.cell((x, y)).map(|c| c.symbol()).unwrap_or(" "));
        }
        text.push('\n');
    }
    text
}

#[test]
fn test_full_draw_cycle_through_lifecycle() {
    let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
    let logs = new_log_buffer();
    logs.lock().unwrap().push_back("[INFO] voxlive: startup".to_string());
    let mut app = App::new(logs);

    for (state, label) in [
        (SessionState::Idle, "Idle"),
        (SessionState::Connecting, "Connecting"),
        (SessionState::Active, "Listening"),
        (SessionState::Closing, "Closing"),
        (SessionState::Closed, "Closed"),
        (SessionState::Failed("timeout".into()), "Failed: timeout"),
    ] {
        app.update_state(AssistantState {
            session: state,
            ..Default::default()
        });
        terminal.draw(|frame| ui::draw(frame, &app)).unwrap();
        let text = buffer_text(terminal.backend().buffer());
        assert!(text.contains(label), "missing {label}:\n{text}");
        assert!(text.contains("startup"), "missing log line:\n{text}");
    }
}

#[test]
fn test_state_watch_updates_render() {
    let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
    let (state_tx, mut state_rx) = watch::channel(AssistantState::default());
    let mut app = App::new(new_log_buffer());

    terminal.draw(|frame| ui::draw(frame, &app)).unwrap();
    let text = buffer_text(terminal.backend().buffer());
    assert!(!text.contains("Gemini:"), "no model turn expected yet");

    state_tx
        .send(AssistantState {
            session: SessionState::Active,
            turns: vec![Turn {
                user: "tell me a joke".into(),
                model: "Why did the sample cross the buffer?".into(),
            }],
            ..Default::default()
        })
        .unwrap();
    assert!(state_rx.has_changed().unwrap());
    app.update_state(state_rx.borrow_and_update().clone());

    terminal.draw(|frame| ui::draw(frame, &app)).unwrap();
    let text = buffer_text(terminal.backend().buffer());
    assert!(text.contains("You: tell me a joke"), "missing user line:\n{text}");
    assert!(text.contains("Gemini: Why did the sample"), "missing model line:\n{text}");
}

#[test]
fn test_key_actions_become_commands() {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();
    let mut app = App::new(new_log_buffer());

    for code in [KeyCode::Char('s'), KeyCode::Char('e'), KeyCode::Char('q')] {
        if let AppAction::Command(cmd) = app.handle_key(KeyEvent::new(code, KeyModifiers::NONE)) {
            cmd_tx.send(cmd).unwrap();
        }
        if code == KeyCode::Char('s') {
            app.update_state(AssistantState {
                session: SessionState::Active,
                ..Default::default()
            });
        }
    }

    assert_eq!(cmd_rx.try_recv().unwrap(), UiCommand::StartSession);
    assert_eq!(cmd_rx.try_recv().unwrap(), UiCommand::EndSession);
    assert!(cmd_rx.try_recv().is_err());
    assert!(app.should_quit);
}
