/// Line editor
///
/// The transports hand over raw bytes; line discipline lives here. The
/// editor keeps a UTF-8 buffer and cursor, decodes CSI sequences and
/// reports everything needing session context (history, completion, mode
/// exits) as events.

use crate::style::CLEAR_LINE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    /// Enter: the finished line, buffer already cleared.
    Line(String),
    /// Tab: session decides the completion candidates.
    Tab,
    /// Ctrl+C: buffer cleared, session prints a fresh prompt.
    Interrupt,
    /// Ctrl+D on an empty buffer.
    Eof,
    /// Bare Escape (not a CSI prefix).
    Escape,
    /// Ctrl+Q.
    Quit,
    /// Ctrl+L.
    ClearScreen,
    /// Arrow up / down.
    HistoryPrev,
    HistoryNext,
}

#[derive(Debug, Default)]
enum EscState {
    #[default]
    Idle,
    /// Seen ESC, deciding between a bare escape and a CSI run.
    Esc,
    /// Inside ESC [ ... collecting until the final byte.
    Csi(Vec<u8>),
}

#[derive(Debug, Default)]
pub struct LineEditor {
    buf: Vec<char>,
    cursor: usize,
    esc: EscState,
    utf8: Vec<u8>,
    last_was_cr: bool,
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&self) -> String {
        self.buf.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Replace the whole buffer (history recall).
    pub fn set_line(&mut self, text: &str) {
        self.buf = text.chars().collect();
        self.cursor = self.buf.len();
    }

    /// Insert at the cursor (completion).
    pub fn insert_text(&mut self, text: &str) {
        for c in text.chars() {
            self.buf.insert(self.cursor, c);
            self.cursor += 1;
        }
    }

    /// Redraw: clear the line, print prompt and buffer, walk the cursor
    /// back into place.
    pub fn render(&self, prompt: &str) -> String {
        let mut out = String::from(CLEAR_LINE);
        out.push_str(prompt);
        out.push_str(&self.line());
        let behind = self.buf.len() - self.cursor;
        if behind > 0 {
            out.push_str(&format!("\x1b[{}D", behind));
        }
        out
    }

    /// Consume a chunk of transport bytes and return the events it
    /// produced. A chunk ending right after a lone ESC is treated as a bare
    /// escape; real CSI sequences arrive in one chunk.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<EditorEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            self.feed_byte(byte, &mut events);
        }
        if matches!(self.esc, EscState::Esc) {
            self.esc = EscState::Idle;
            events.push(EditorEvent::Escape);
        }
        events
    }

    fn feed_byte(&mut self, byte: u8, events: &mut Vec<EditorEvent>) {
        match std::mem::take(&mut self.esc) {
            EscState::Esc => {
                if byte == b'[' {
                    self.esc = EscState::Csi(Vec::new());
                    return;
                }
                events.push(EditorEvent::Escape);
                // fall through to handle this byte normally
            }
            EscState::Csi(mut seq) => {
                if (0x40..=0x7e).contains(&byte) {
                    self.handle_csi(byte, &seq, events);
                } else {
                    seq.push(byte);
                    self.esc = EscState::Csi(seq);
                }
                return;
            }
            EscState::Idle => {}
        }

        let was_cr = std::mem::take(&mut self.last_was_cr);
        match byte {
            0x1b => self.esc = EscState::Esc,
            b'\r' => {
                self.last_was_cr = true;
                events.push(EditorEvent::Line(self.take_line()));
            }
            b'\n' => {
                if !was_cr {
                    events.push(EditorEvent::Line(self.take_line()));
                }
            }
            0x7f | 0x08 => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    self.buf.remove(self.cursor);
                }
            }
            0x03 => {
                self.buf.clear();
                self.cursor = 0;
                events.push(EditorEvent::Interrupt);
            }
            0x04 => {
                if self.buf.is_empty() {
                    events.push(EditorEvent::Eof);
                } else if self.cursor < self.buf.len() {
                    self.buf.remove(self.cursor);
                }
            }
            0x09 => events.push(EditorEvent::Tab),
            0x01 => self.cursor = 0,
            0x05 => self.cursor = self.buf.len(),
            0x0b => self.buf.truncate(self.cursor),
            0x15 => {
                self.buf.drain(..self.cursor);
                self.cursor = 0;
            }
            0x17 => self.delete_word(),
            0x11 => events.push(EditorEvent::Quit),
            0x0c => events.push(EditorEvent::ClearScreen),
            printable if printable >= 0x20 => {
                self.feed_utf8(printable);
            }
            _ => {}
        }
    }

    fn handle_csi(&mut self, final_byte: u8, params: &[u8], events: &mut Vec<EditorEvent>) {
        match final_byte {
            b'A' => events.push(EditorEvent::HistoryPrev),
            b'B' => events.push(EditorEvent::HistoryNext),
            b'C' => {
                if self.cursor < self.buf.len() {
                    self.cursor += 1;
                }
            }
            b'D' => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                }
            }
            b'H' => self.cursor = 0,
            b'F' => self.cursor = self.buf.len(),
            b'~' => {
                // delete key: ESC [ 3 ~
                if params == b"3" && self.cursor < self.buf.len() {
                    self.buf.remove(self.cursor);
                }
            }
            _ => {}
        }
    }

    fn feed_utf8(&mut self, byte: u8) {
        self.utf8.push(byte);
        match std::str::from_utf8(&self.utf8) {
            Ok(text) => {
                if let Some(c) = text.chars().next() {
                    self.buf.insert(self.cursor, c);
                    self.cursor += 1;
                }
                self.utf8.clear();
            }
            Err(_) => {
                // keep accumulating a multi-byte sequence; drop garbage
                if self.utf8.len() >= 4 {
                    self.utf8.clear();
                }
            }
        }
    }

    fn delete_word(&mut self) {
        let mut start = self.cursor;
        while start > 0 && self.buf[start - 1].is_whitespace() {
            start -= 1;
        }
        while start > 0 && !self.buf[start - 1].is_whitespace() {
            start -= 1;
        }
        self.buf.drain(start..self.cursor);
        self.cursor = start;
    }

    fn take_line(&mut self) -> String {
        let line = self.line();
        self.buf.clear();
        self.cursor = 0;
        line
    }
}

/// Per-mode command history with an arrow-key cursor.
#[derive(Debug, Default)]
pub struct History {
    entries: Vec<String>,
    pos: Option<usize>,
    stash: String,
}

const HISTORY_LIMIT: usize = 200;

impl History {
    pub fn push(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if self.entries.last().map(String::as_str) != Some(line) {
            self.entries.push(line.to_string());
            if self.entries.len() > HISTORY_LIMIT {
                self.entries.remove(0);
            }
        }
        self.pos = None;
    }

    /// Up arrow: step back, stashing the in-progress line the first time.
    pub fn prev(&mut self, current: &str) -> Option<String> {
        if self.entries.is_empty() {
            return None;
        }
        let next_pos = match self.pos {
            None => {
                self.stash = current.to_string();
                self.entries.len() - 1
            }
            Some(0) => 0,
            Some(p) => p - 1,
        };
        self.pos = Some(next_pos);
        Some(self.entries[next_pos].clone())
    }

    /// Down arrow: step forward; walking past the end restores the stash.
    pub fn next(&mut self) -> Option<String> {
        match self.pos {
            None => None,
            Some(p) if p + 1 < self.entries.len() => {
                self.pos = Some(p + 1);
                Some(self.entries[p + 1].clone())
            }
            Some(_) => {
                self.pos = None;
                Some(std::mem::take(&mut self.stash))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_str(editor: &mut LineEditor, text: &str) -> Vec<EditorEvent> {
        editor.feed(text.as_bytes())
    }

    #[test]
    fn test_plain_line() {
        let mut ed = LineEditor::new();
        let events = feed_str(&mut ed, "scan 1.1.1.1\r");
        assert_eq!(events, vec![EditorEvent::Line("scan 1.1.1.1".to_string())]);
        assert!(ed.is_empty());
    }

    #[test]
    fn test_crlf_is_one_line() {
        let mut ed = LineEditor::new();
        let events = feed_str(&mut ed, "ls\r\n");
        assert_eq!(events, vec![EditorEvent::Line("ls".to_string())]);
    }

    #[test]
    fn test_backspace_and_cursor_moves() {
        let mut ed = LineEditor::new();
        feed_str(&mut ed, "catx");
        ed.feed(&[0x7f]);
        assert_eq!(ed.line(), "cat");
        // left, left, delete-at-cursor (ctrl-d)
        ed.feed(b"\x1b[D\x1b[D");
        ed.feed(&[0x04]);
        assert_eq!(ed.line(), "ct");
    }

    #[test]
    fn test_insert_in_middle() {
        let mut ed = LineEditor::new();
        feed_str(&mut ed, "cd hme");
        ed.feed(b"\x1b[D\x1b[D");
        feed_str(&mut ed, "o");
        assert_eq!(ed.line(), "cd home");
    }

    #[test]
    fn test_utf8_input() {
        let mut ed = LineEditor::new();
        feed_str(&mut ed, "touch café.txt");
        assert_eq!(ed.line(), "touch café.txt");
    }

    #[test]
    fn test_control_events() {
        let mut ed = LineEditor::new();
        feed_str(&mut ed, "stuck");
        assert_eq!(ed.feed(&[0x03]), vec![EditorEvent::Interrupt]);
        assert!(ed.is_empty());
        assert_eq!(ed.feed(&[0x04]), vec![EditorEvent::Eof]);
        assert_eq!(ed.feed(&[0x09]), vec![EditorEvent::Tab]);
        assert_eq!(ed.feed(&[0x11]), vec![EditorEvent::Quit]);
        assert_eq!(ed.feed(&[0x1b]), vec![EditorEvent::Escape]);
    }

    #[test]
    fn test_arrow_keys_map_to_history_events() {
        let mut ed = LineEditor::new();
        assert_eq!(ed.feed(b"\x1b[A"), vec![EditorEvent::HistoryPrev]);
        assert_eq!(ed.feed(b"\x1b[B"), vec![EditorEvent::HistoryNext]);
    }

    #[test]
    fn test_ctrl_w_deletes_word() {
        let mut ed = LineEditor::new();
        feed_str(&mut ed, "get repo cracker");
        ed.feed(&[0x17]);
        assert_eq!(ed.line(), "get repo ");
    }

    #[test]
    fn test_render_repositions_cursor() {
        let mut ed = LineEditor::new();
        feed_str(&mut ed, "help");
        ed.feed(b"\x1b[D");
        let rendered = ed.render("$ ");
        assert!(rendered.contains("$ help"));
        assert!(rendered.ends_with("\x1b[1D"));
    }

    #[test]
    fn test_history_walk() {
        let mut h = History::default();
        h.push("ls");
        h.push("scan");
        h.push("scan"); // dedup
        assert_eq!(h.prev("wip"), Some("scan".to_string()));
        assert_eq!(h.prev(""), Some("ls".to_string()));
        assert_eq!(h.prev(""), Some("ls".to_string())); // clamped at oldest
        assert_eq!(h.next(), Some("scan".to_string()));
        assert_eq!(h.next(), Some("wip".to_string())); // stash restored
        assert_eq!(h.next(), None);
    }
}
