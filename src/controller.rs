use std::time::Duration;
use tracing::trace;

use ratatui::crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};

use crate::domain::{KeyMode, Message, RegConfig, RegError};
use crate::model::Model;

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(cfg: &RegConfig) -> Self {
        Self {
            event_poll_time: cfg.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, RegError> {
        if event::poll(Duration::from_millis(self.event_poll_time))? {
            match event::read()? {
                Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                    return Ok(self.handle_key(model.key_mode(), key));
                }
                Event::Resize(width, height) => return Ok(Some(Message::Resize(width, height))),
                _ => {}
            }
        }
        Ok(None)
    }

    pub fn handle_key(&self, mode: KeyMode, key: KeyEvent) -> Option<Message> {
        let message = match mode {
            KeyMode::Table => table_key(key),
            KeyMode::Edit => edit_key(key),
            KeyMode::Raw => Some(Message::RawKey(key)),
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}

fn table_key(key: KeyEvent) -> Option<Message> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('c') => Some(Message::Quit),
            KeyCode::Char('r') => Some(Message::Refresh),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Char('q') => Some(Message::Quit),
        KeyCode::Esc => Some(Message::Exit),
        KeyCode::Up | KeyCode::Char('k') => Some(Message::MoveUp),
        KeyCode::Down | KeyCode::Char('j') => Some(Message::MoveDown),
        KeyCode::Left | KeyCode::Char('h') => Some(Message::MoveLeft),
        KeyCode::Right | KeyCode::Char('l') => Some(Message::MoveRight),
        KeyCode::PageUp => Some(Message::MovePageUp),
        KeyCode::PageDown => Some(Message::MovePageDown),
        KeyCode::Home | KeyCode::Char('g') => Some(Message::MoveBeginning),
        KeyCode::End | KeyCode::Char('G') => Some(Message::MoveEnd),
        KeyCode::Char('/') => Some(Message::Search),
        KeyCode::Char('s') => Some(Message::Sort),
        KeyCode::Char('e') => Some(Message::Edit),
        KeyCode::Char('d') => Some(Message::Delete),
        KeyCode::Char('b') => Some(Message::Ban),
        KeyCode::Char('u') => Some(Message::Unban),
        KeyCode::Char('x') => Some(Message::Purge),
        KeyCode::Char('n') => Some(Message::NewRow),
        KeyCode::Tab => Some(Message::NextView),
        KeyCode::Char('r') => Some(Message::Refresh),
        KeyCode::Char('E') => Some(Message::Export),
        KeyCode::Char('I') => Some(Message::Import),
        KeyCode::Char('y') => Some(Message::CopyCell),
        KeyCode::Char('Y') => Some(Message::CopyRow),
        KeyCode::Enter => Some(Message::Enter),
        KeyCode::Char('[') => Some(Message::PrevPage),
        KeyCode::Char(']') => Some(Message::NextPage),
        KeyCode::Char('?') => Some(Message::Help),
        KeyCode::Char('L') => Some(Message::Logout),
        KeyCode::Char('F') => Some(Message::Refreeze),
        _ => None,
    }
}

/// While a row is edited most keys type into the focused editor.
fn edit_key(key: KeyEvent) -> Option<Message> {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        return match key.code {
            KeyCode::Char('s') => Some(Message::Save),
            KeyCode::Char('o') => Some(Message::Attach),
            KeyCode::Char('f') => Some(Message::Search),
            KeyCode::Char('t') => Some(Message::Sort),
            KeyCode::Char('c') => Some(Message::Quit),
            _ => None,
        };
    }
    match key.code {
        KeyCode::Esc => Some(Message::Exit),
        KeyCode::Tab => Some(Message::FocusNext),
        KeyCode::BackTab => Some(Message::FocusPrev),
        KeyCode::Up => Some(Message::StepUp),
        KeyCode::Down => Some(Message::StepDown),
        _ => Some(Message::RawKey(key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> Controller {
        Controller::new(&RegConfig::default())
    }

    #[test]
    fn table_keys_map_to_actions() {
        let c = controller();
        let key = |code| KeyEvent::new(code, KeyModifiers::NONE);
        assert!(matches!(
            c.handle_key(KeyMode::Table, key(KeyCode::Char('s'))),
            Some(Message::Sort)
        ));
        assert!(matches!(
            c.handle_key(KeyMode::Table, key(KeyCode::Char('/'))),
            Some(Message::Search)
        ));
        assert!(c.handle_key(KeyMode::Table, key(KeyCode::Char('z'))).is_none());
    }

    #[test]
    fn edit_keys_type_or_save() {
        let c = controller();
        assert!(matches!(
            c.handle_key(KeyMode::Edit, KeyEvent::new(KeyCode::Char('s'), KeyModifiers::CONTROL)),
            Some(Message::Save)
        ));
        assert!(matches!(
            c.handle_key(KeyMode::Edit, KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)),
            Some(Message::RawKey(_))
        ));
        assert!(matches!(
            c.handle_key(KeyMode::Edit, KeyEvent::new(KeyCode::BackTab, KeyModifiers::SHIFT)),
            Some(Message::FocusPrev)
        ));
        assert!(matches!(
            c.handle_key(KeyMode::Edit, KeyEvent::new(KeyCode::Char('f'), KeyModifiers::CONTROL)),
            Some(Message::Search)
        ));
    }

    #[test]
    fn raw_mode_forwards_everything() {
        let c = controller();
        let key = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        assert!(matches!(c.handle_key(KeyMode::Raw, key), Some(Message::RawKey(k)) if k == key));
    }
}
