use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};

use crate::app::editor::EditorBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    SelectShortcut(u8),
    NextTab,
    PreviousTab,
    MoveTab(isize),
    CloseTab,
    OpenNextChapter,
    ManualSave,
    RestoreBackup,
    DiscardBackup,
    DismissRecovery,
    Edit(EditOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Insert(char),
    Newline,
    Backspace,
    Delete,
    Left,
    Right,
    Home,
    End,
    Up,
    Down,
}

impl EditOp {
    pub fn apply(self, editor: &mut EditorBuffer) -> bool {
        match self {
            EditOp::Insert(ch) => editor.insert_char(ch),
            EditOp::Newline => editor.insert_newline(),
            EditOp::Backspace => editor.backspace(),
            EditOp::Delete => editor.delete(),
            EditOp::Left => editor.move_left(),
            EditOp::Right => editor.move_right(),
            EditOp::Home => editor.move_home(),
            EditOp::End => editor.move_end(),
            EditOp::Up => editor.move_up(),
            EditOp::Down => editor.move_down(),
        }
    }
}

/// Maps a key press to an action. While a recovery offer is shown only the
/// overlay keys are live, so a stray keystroke cannot edit the buffer the
/// user is being asked about.
pub fn action_for(key: KeyEvent, recovery_open: bool) -> Option<Action> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let alt = key.modifiers.contains(KeyModifiers::ALT);

    if ctrl {
        match key.code {
            KeyCode::Char('q') => return Some(Action::Quit),
            KeyCode::Char('s') => return Some(Action::ManualSave),
            _ => {}
        }
    }

    if recovery_open {
        return match key.code {
            KeyCode::Char('r') => Some(Action::RestoreBackup),
            KeyCode::Char('d') => Some(Action::DiscardBackup),
            KeyCode::Esc => Some(Action::DismissRecovery),
            _ => None,
        };
    }

    if ctrl {
        return match key.code {
            KeyCode::Char('w') => Some(Action::CloseTab),
            KeyCode::Char('o') => Some(Action::OpenNextChapter),
            KeyCode::PageDown => Some(Action::NextTab),
            KeyCode::PageUp => Some(Action::PreviousTab),
            _ => None,
        };
    }

    if alt {
        return match key.code {
            KeyCode::Char(digit @ '1'..='9') => {
                digit.to_digit(10).map(|n| Action::SelectShortcut(n as u8))
            }
            KeyCode::Left => Some(Action::MoveTab(-1)),
            KeyCode::Right => Some(Action::MoveTab(1)),
            _ => None,
        };
    }

    let op = match key.code {
        KeyCode::Char(ch) => EditOp::Insert(ch),
        KeyCode::Enter => EditOp::Newline,
        KeyCode::Tab => EditOp::Insert('\t'),
        KeyCode::Backspace => EditOp::Backspace,
        KeyCode::Delete => EditOp::Delete,
        KeyCode::Left => EditOp::Left,
        KeyCode::Right => EditOp::Right,
        KeyCode::Home => EditOp::Home,
        KeyCode::End => EditOp::End,
        KeyCode::Up => EditOp::Up,
        KeyCode::Down => EditOp::Down,
        _ => return None,
    };
    Some(Action::Edit(op))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn alt_digits_select_tabs() {
        assert_eq!(
            action_for(key(KeyCode::Char('3'), KeyModifiers::ALT), false),
            Some(Action::SelectShortcut(3))
        );
        assert_eq!(action_for(key(KeyCode::Char('0'), KeyModifiers::ALT), false), None);
    }

    #[test]
    fn plain_keys_edit() {
        assert_eq!(
            action_for(key(KeyCode::Char('x'), KeyModifiers::NONE), false),
            Some(Action::Edit(EditOp::Insert('x')))
        );
        assert_eq!(
            action_for(key(KeyCode::Char('X'), KeyModifiers::SHIFT), false),
            Some(Action::Edit(EditOp::Insert('X')))
        );
    }

    #[test]
    fn recovery_overlay_captures_input() {
        assert_eq!(
            action_for(key(KeyCode::Char('r'), KeyModifiers::NONE), true),
            Some(Action::RestoreBackup)
        );
        assert_eq!(action_for(key(KeyCode::Char('x'), KeyModifiers::NONE), true), None);
        assert_eq!(
            action_for(key(KeyCode::Char('q'), KeyModifiers::CONTROL), true),
            Some(Action::Quit)
        );
    }

    #[test]
    fn control_chords_manage_tabs() {
        assert_eq!(
            action_for(key(KeyCode::Char('w'), KeyModifiers::CONTROL), false),
            Some(Action::CloseTab)
        );
        assert_eq!(
            action_for(key(KeyCode::PageUp, KeyModifiers::CONTROL), false),
            Some(Action::PreviousTab)
        );
        assert_eq!(
            action_for(key(KeyCode::Right, KeyModifiers::ALT), false),
            Some(Action::MoveTab(1))
        );
    }
}
