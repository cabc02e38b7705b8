//! Expression lexer: turns a directive body into identifiers, literals,
//! operators and punctuation for the parser.
//!
//! String tokens carry their raw text; escapes are decoded separately by
//! [`decode_escapes`] when the parser builds a literal.  Characters the
//! lexer does not recognise are skipped.

use super::token::{Token, TokenChain, TokenKind};

const TWO_CHAR_OPS: [&str; 7] = ["==", "!=", "<=", ">=", "&&", "||", "+="];

struct Lexer<'a> {
    text: &'a str,
    src: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Lexer { text, src: text.as_bytes(), pos: 0, line: 1, column: 1 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek2(&self) -> Option<u8> {
        self.src.get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if ch & 0xC0 != 0x80 {
            self.column += 1;
        }
        Some(ch)
    }

    fn advance_to(&mut self, target: usize) {
        while self.pos < target && self.advance().is_some() {}
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\r' | b'\n')) {
            self.advance();
        }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn next_token(&mut self) -> Option<Token> {
        loop {
            self.skip_ws();
            let start = self.pos;
            let (line, column) = (self.line, self.column);
            let ch = self.peek()?;
            let make = |kind, text: &str, end: usize| Token::new(kind, text, line, column, start..end);

            if self.rest().starts_with("<!--") {
                let end = self.rest()[4..].find("-->").map_or(self.src.len(), |i| start + 4 + i + 3);
                self.advance_to(end);
                return Some(make(TokenKind::Directive, &self.text[start..end], end));
            }
            if let Some(op) = TWO_CHAR_OPS.iter().find(|op| self.rest().starts_with(**op)) {
                self.advance_to(start + 2);
                return Some(make(TokenKind::Operator, *op, start + 2));
            }

            let tok = match ch {
                b'+' | b'-' | b'*' | b'/' | b'%' | b'<' | b'>' | b'=' | b'!' => {
                    self.advance();
                    make(TokenKind::Operator, &self.text[start..start + 1], start + 1)
                }
                b'"' | b'\'' => {
                    let (end, closed) = scan_quoted(self.src, start);
                    self.advance_to(end);
                    let inner_end = if closed { end - 1 } else { end };
                    make(TokenKind::String, &self.text[start + 1..inner_end], end)
                }
                b'0'..=b'9' => {
                    while let Some(c) = self.peek() {
                        let fraction = c == b'.' && matches!(self.peek2(), Some(b'0'..=b'9'));
                        if !(c.is_ascii_digit() || fraction) {
                            break;
                        }
                        self.advance();
                    }
                    make(TokenKind::Number, &self.text[start..self.pos], self.pos)
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    while matches!(self.peek(), Some(b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'_')) {
                        self.advance();
                    }
                    let word = &self.text[start..self.pos];
                    let kind = if word == "true" || word == "false" {
                        TokenKind::Boolean
                    } else {
                        TokenKind::Identifier
                    };
                    make(kind, word, self.pos)
                }
                b'(' | b')' | b'[' | b']' | b'{' | b'}' | b',' | b';' | b':' | b'.' => {
                    self.advance();
                    make(TokenKind::Punct, &self.text[start..start + 1], start + 1)
                }
                _ => {
                    // Skip the whole character, continuation bytes included.
                    self.advance();
                    while matches!(self.peek(), Some(b) if b & 0xC0 == 0x80) {
                        self.advance();
                    }
                    continue;
                }
            };
            return Some(tok);
        }
    }
}

/// Tokenize an expression or directive body, ending with one EOF token.
pub fn tokenize(text: &str) -> TokenChain {
    let mut lexer = Lexer::new(text);
    let mut chain = TokenChain::new();
    while let Some(tok) = lexer.next_token() {
        chain.append(tok);
    }
    let end = text.len();
    chain.append(Token::new(TokenKind::Eof, "", lexer.line, lexer.column, end..end));
    chain
}

/// Index just past the quoted literal opening at `start` (which must be a
/// quote byte).  A backslash-escaped quote does not close the literal; an
/// unterminated literal runs to the end.
pub fn quoted_end(src: &[u8], start: usize) -> usize {
    scan_quoted(src, start).0
}

/// Like [`quoted_end`], also reporting whether a closing quote was found.
pub fn scan_quoted(src: &[u8], start: usize) -> (usize, bool) {
    let quote = src[start];
    let mut i = start + 1;
    while i < src.len() {
        match src[i] {
            b'\\' => i += 2,
            b if b == quote => return (i + 1, true),
            _ => i += 1,
        }
    }
    (src.len(), false)
}

/// Resolve `\n`, `\t`, `\r`, `\\`, `\"` and `\'`.  Other escapes are kept
/// verbatim.
pub fn decode_escapes(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Split on whitespace, keeping quoted runs (quotes included) together.
pub fn split_words(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut words = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }
        let start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            if matches!(bytes[i], b'"' | b'\'') {
                i = quoted_end(bytes, i);
            } else {
                i += 1;
            }
        }
        words.push(&s[start..i]);
    }
    words
}
