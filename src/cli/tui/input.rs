//! Input handling for the TUI.

use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use super::app::Action;

/// Convert a key event to an Action. While a text prompt is open, printable
/// keys are text.
pub fn handle_key_event(key: KeyEvent, text_input: bool) -> Option<Action> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Some(Action::Quit);
    }

    match key.code {
        KeyCode::Esc => return Some(Action::Back),
        KeyCode::Enter => return Some(Action::Select),
        KeyCode::Up => return Some(Action::Up),
        KeyCode::Down => return Some(Action::Down),
        KeyCode::Backspace if text_input => return Some(Action::Backspace),
        KeyCode::Char(c) if text_input => return Some(Action::Char(c)),
        _ => {}
    }

    match key.code {
        KeyCode::Char('q') => Some(Action::Quit),
        KeyCode::Char('k') => Some(Action::Up),
        KeyCode::Char('j') => Some(Action::Down),
        KeyCode::Char(' ') => Some(Action::Select),
        KeyCode::Char('r') | KeyCode::F(5) => Some(Action::Refresh),
        KeyCode::Char('s') => Some(Action::Start),
        KeyCode::Char('a') => Some(Action::Abort),
        KeyCode::Char('p') => Some(Action::Pause),
        KeyCode::Char('t') => Some(Action::Toggle),
        KeyCode::Char('R') => Some(Action::Reset),
        KeyCode::Char('v') => Some(Action::LoadVolume),
        KeyCode::Char('u') => Some(Action::UnloadVolume),
        KeyCode::Char('c') => Some(Action::Schedules),
        KeyCode::Char('o') => Some(Action::CycleSort),
        KeyCode::Char('y') => Some(Action::Yes),
        _ => None,
    }
}

/// Convert a crossterm Event to an Action.
pub fn handle_event(event: Event, text_input: bool) -> Option<Action> {
    match event {
        Event::Key(key) => handle_key_event(key, text_input),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn letters_are_text_in_prompts() {
        assert_eq!(
            handle_key_event(key(KeyCode::Char('q')), true),
            Some(Action::Char('q'))
        );
        assert_eq!(
            handle_key_event(key(KeyCode::Char('q')), false),
            Some(Action::Quit)
        );
    }

    #[test]
    fn ctrl_c_always_quits() {
        let event = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(handle_key_event(event, true), Some(Action::Quit));
    }
}
