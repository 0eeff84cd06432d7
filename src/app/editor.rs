use unicode_segmentation::UnicodeSegmentation;

use crate::session::document::DocumentId;

/// Edit buffer of the active chapter. Every method returns whether the
/// buffer or cursor actually changed.
#[derive(Debug, Clone)]
pub struct EditorBuffer {
    document_id: DocumentId,
    text: String,
    cursor: usize,
    preferred_column: Option<usize>,
}

impl EditorBuffer {
    pub fn new(document_id: DocumentId, text: String) -> Self {
        let cursor = text.len();
        Self {
            document_id,
            text,
            cursor,
            preferred_column: None,
        }
    }

    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Replaces the whole buffer, e.g. with restored backup content.
    pub fn replace(&mut self, text: String) {
        self.text = text;
        self.cursor = self.text.len();
        self.preferred_column = None;
    }

    /// (line, column) of the cursor, both zero-based, column in graphemes.
    pub fn cursor_position(&self) -> (usize, usize) {
        let start = line_start(&self.text, self.cursor);
        let line = self.text[..start].matches('\n').count();
        (line, column_at(&self.text, start, self.cursor))
    }

    pub fn insert_char(&mut self, ch: char) -> bool {
        self.text.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
        self.preferred_column = None;
        true
    }

    pub fn insert_newline(&mut self) -> bool {
        self.text.insert(self.cursor, '\n');
        self.cursor += 1;
        self.preferred_column = Some(0);
        true
    }

    pub fn backspace(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        let prev = prev_grapheme_boundary(&self.text, self.cursor);
        self.text.drain(prev..self.cursor);
        self.cursor = prev;
        self.preferred_column = None;
        true
    }

    pub fn delete(&mut self) -> bool {
        let next = next_grapheme_boundary(&self.text, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.text.drain(self.cursor..next);
        self.preferred_column = None;
        true
    }

    pub fn move_left(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor = prev_grapheme_boundary(&self.text, self.cursor);
        self.preferred_column = None;
        true
    }

    pub fn move_right(&mut self) -> bool {
        let next = next_grapheme_boundary(&self.text, self.cursor);
        if next == self.cursor {
            return false;
        }
        self.cursor = next;
        self.preferred_column = None;
        true
    }

    pub fn move_home(&mut self) -> bool {
        let start = line_start(&self.text, self.cursor);
        if self.cursor == start {
            return false;
        }
        self.cursor = start;
        self.preferred_column = Some(0);
        true
    }

    pub fn move_end(&mut self) -> bool {
        let end = line_end(&self.text, self.cursor);
        if self.cursor == end {
            return false;
        }
        self.cursor = end;
        self.preferred_column = None;
        true
    }

    pub fn move_up(&mut self) -> bool {
        let start = line_start(&self.text, self.cursor);
        let column = self
            .preferred_column
            .unwrap_or_else(|| column_at(&self.text, start, self.cursor));
        if start == 0 {
            return false;
        }
        let prev_start = line_start(&self.text, start - 1);
        self.cursor = position_for_column(&self.text, prev_start, column);
        self.preferred_column = Some(column);
        true
    }

    pub fn move_down(&mut self) -> bool {
        let start = line_start(&self.text, self.cursor);
        let column = self
            .preferred_column
            .unwrap_or_else(|| column_at(&self.text, start, self.cursor));
        let end = line_end(&self.text, self.cursor);
        if end == self.text.len() {
            return false;
        }
        self.cursor = position_for_column(&self.text, end + 1, column);
        self.preferred_column = Some(column);
        true
    }
}

fn prev_grapheme_boundary(text: &str, cursor: usize) -> usize {
    text[..cursor]
        .grapheme_indices(true)
        .next_back()
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn next_grapheme_boundary(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .graphemes(true)
        .next()
        .map(|grapheme| cursor + grapheme.len())
        .unwrap_or(text.len())
}

fn line_start(text: &str, cursor: usize) -> usize {
    text[..cursor].rfind('\n').map(|idx| idx + 1).unwrap_or(0)
}

fn line_end(text: &str, cursor: usize) -> usize {
    text[cursor..]
        .find('\n')
        .map(|idx| cursor + idx)
        .unwrap_or(text.len())
}

fn column_at(text: &str, line_start: usize, cursor: usize) -> usize {
    text[line_start..cursor].graphemes(true).count()
}

fn position_for_column(text: &str, line_start: usize, column: usize) -> usize {
    let end = line_end(text, line_start);
    text[line_start..end]
        .grapheme_indices(true)
        .nth(column)
        .map(|(idx, _)| line_start + idx)
        .unwrap_or(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor(text: &str) -> EditorBuffer {
        EditorBuffer::new(DocumentId::from("ch"), text.to_string())
    }

    #[test]
    fn typing_and_deleting_respects_graphemes() {
        let mut buf = editor("cafe\u{301}");
        assert!(buf.backspace());
        assert_eq!(buf.text(), "caf");
        assert!(buf.insert_char('é'));
        assert!(buf.move_left());
        assert!(buf.delete());
        assert_eq!(buf.text(), "caf");
        assert!(!buf.delete());
    }

    #[test]
    fn vertical_moves_keep_column() {
        let mut buf = editor("long line\nab\nanother");
        buf.move_up();
        buf.move_up();
        buf.move_end();
        assert_eq!(buf.cursor_position(), (0, 9));
        assert!(buf.move_down());
        assert_eq!(buf.cursor_position(), (1, 2));
        assert!(buf.move_down());
        assert_eq!(buf.cursor_position(), (2, 7));
        assert!(!buf.move_down());
    }

    #[test]
    fn replace_moves_cursor_to_end() {
        let mut buf = editor("old");
        buf.move_home();
        buf.replace("restored text".into());
        assert_eq!(buf.cursor(), "restored text".len());
    }
}
