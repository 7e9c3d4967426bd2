use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crossterm::event::{KeyCode, KeyEvent};
use voxlive_core::{AssistantState, UiCommand};

#[derive(Debug, Clone, PartialEq)]
pub enum AppAction {
    None,
    Quit,
    Command(UiCommand),
}

pub struct App {
    pub state: AssistantState,
    pub should_quit: bool,
    pub logs: Arc<Mutex<VecDeque<String>>>,
    pub log_scroll: usize,
    pub log_auto_scroll: bool,
}

impl App {
    pub fn new(logs: Arc<Mutex<VecDeque<String>>>) -> Self {
        Self {
            state: AssistantState::default(),
            should_quit: false,
            logs,
            log_scroll: 0,
            log_auto_scroll: true,
        }
    }

    pub fn update_state(&mut self, new_state: AssistantState) {
        self.state = new_state;
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> AppAction {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                AppAction::Quit
            }
            KeyCode::Char('s') if self.state.session.accepts_open() => {
                AppAction::Command(UiCommand::StartSession)
            }
            KeyCode::Char('e') if self.state.session.is_active() => {
                AppAction::Command(UiCommand::EndSession)
            }
            KeyCode::Up => {
                self.log_scroll = self.log_scroll.saturating_add(1);
                self.log_auto_scroll = false;
                AppAction::None
            }
            KeyCode::Down => {
                self.log_scroll = self.log_scroll.saturating_sub(1);
                if self.log_scroll == 0 {
                    self.log_auto_scroll = true;
                }
                AppAction::None
            }
            KeyCode::Char('G') => {
                self.log_scroll = 0;
                self.log_auto_scroll = true;
                AppAction::None
            }
            _ => AppAction::None,
        }
    }
}
