//! Parser Cursor
//!
//! Character cursor with line/column tracking shared by the document and
//! expression parsers.

use crate::ast::{Position, Span};
use crate::error::MlldError;

pub struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Cursor {
    pub fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.chars.len()
    }

    pub fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    pub fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    pub fn at_line_start(&self) -> bool {
        self.col == 1
    }

    pub fn advance(&mut self) -> Option<char> {
        let c = self.chars.get(self.pos).copied()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    pub fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    pub fn eat_str(&mut self, s: &str) -> bool {
        if self.starts_with(s) {
            for _ in s.chars() {
                self.advance();
            }
            true
        } else {
            false
        }
    }

    /// A keyword must not run into identifier characters.
    pub fn eat_keyword(&mut self, word: &str) -> bool {
        if !self.starts_with(word) {
            return false;
        }
        match self.peek_at(word.chars().count()) {
            Some(c) if is_ident_char(c) => false,
            _ => self.eat_str(word),
        }
    }

    /// Skip spaces and tabs, not newlines.
    pub fn skip_spaces(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t')) {
            self.advance();
        }
    }

    /// Skip all whitespace including newlines.
    pub fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ') | Some('\t') | Some('\n') | Some('\r')) {
            self.advance();
        }
    }

    pub fn take_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if pred(c) {
                out.push(c);
                self.advance();
            } else {
                break;
            }
        }
        out
    }

    /// `[A-Za-z_][A-Za-z0-9_]*`
    pub fn ident(&mut self) -> Option<String> {
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return None,
        }
        Some(self.take_while(is_ident_char))
    }

    pub fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.col,
            offset: self.pos,
        }
    }

    pub fn span_from(&self, start: Position) -> Span {
        Span {
            start,
            end: self.position(),
        }
    }

    pub fn error(&self, message: impl Into<String>) -> MlldError {
        MlldError::Parse {
            message: message.into(),
            line: self.line,
        }
    }

    /// Consume `expected` or fail with a located message.
    pub fn expect(&mut self, expected: char) -> Result<(), MlldError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!(
                "expected '{}', found {}",
                expected,
                self.peek()
                    .map(|c| format!("'{}'", c))
                    .unwrap_or_else(|| "end of input".to_string())
            )))
        }
    }
}

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_tracking() {
        let mut c = Cursor::new("ab\ncd");
        c.advance();
        c.advance();
        assert_eq!(c.position().line, 1);
        c.advance();
        assert_eq!(c.position().line, 2);
        assert!(c.at_line_start());
    }

    #[test]
    fn test_keyword_boundary() {
        let mut c = Cursor::new("format");
        assert!(!c.eat_keyword("for"));
        assert!(c.eat_keyword("format"));
    }

    #[test]
    fn test_ident() {
        let mut c = Cursor::new("abc_1 rest");
        assert_eq!(c.ident().unwrap(), "abc_1");
        assert_eq!(c.peek(), Some(' '));
        let mut c = Cursor::new("1abc");
        assert!(c.ident().is_none());
    }
}
