//! Structural lexer: splits a Markdown document into headings, list items,
//! fenced code, comments, XMD directives, `{{var}}` references and text runs.
//!
//! Unterminated comments, fences and references run to the end of input.
//! Newlines are consumed between tokens; callers that need the exact source
//! between tokens use [`Token::span`].

use std::sync::OnceLock;

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

use super::token::{Token, TokenChain, TokenKind};

/// Sequences that end a plain text run.
const MARKERS: [&str; 4] = ["<!--", "```", "{{", "xmd:"];

fn markers() -> &'static AhoCorasick {
    static AC: OnceLock<AhoCorasick> = OnceLock::new();
    AC.get_or_init(|| {
        AhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostFirst)
            .build(MARKERS)
    })
}

/// True if `s` contains anything the lexer would split out of a text run.
pub fn has_marker(s: &str) -> bool {
    markers().is_match(s)
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    end: usize,
    line: usize,
    column: usize,
    peeked: Option<Token>,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self::with_range(src, 0, src.len(), 1, 1)
    }

    /// Lex only `src[start..end]`, reporting positions as if scanning began
    /// at `line`/`column`.  Spans stay relative to the whole of `src`.
    pub fn with_range(src: &'a str, start: usize, end: usize, line: usize, column: usize) -> Self {
        let end = end.min(src.len());
        Lexer { src, pos: start.min(end), end, line, column, peeked: None }
    }

    /// Lex the whole input, ending with one EOF token.
    pub fn tokenize(src: &str) -> TokenChain {
        let mut lexer = Lexer::new(src);
        let mut chain = TokenChain::new();
        loop {
            let tok = lexer.next_token();
            let done = tok.is_eof();
            chain.append(tok);
            if done {
                return chain;
            }
        }
    }

    /// Look at the next token without consuming it.
    pub fn peek_token(&mut self) -> &Token {
        let tok = match self.peeked.take() {
            Some(tok) => tok,
            None => self.scan(),
        };
        self.peeked.insert(tok)
    }

    pub fn next_token(&mut self) -> Token {
        match self.peeked.take() {
            Some(tok) => tok,
            None => self.scan(),
        }
    }

    // ── Scanning ──────────────────────────────────────────────────────────────

    fn bytes(&self) -> &'a [u8] {
        &self.src.as_bytes()[..self.end]
    }

    /// Move to `target`, keeping line/column in step.
    fn advance_to(&mut self, target: usize) {
        let bytes = self.bytes();
        for &b in &bytes[self.pos..target] {
            if b == b'\n' {
                self.line += 1;
                self.column = 1;
            } else if b & 0xC0 != 0x80 {
                self.column += 1;
            }
        }
        self.pos = target;
    }

    /// Index of the `\n` ending the line containing `from`, or end of input.
    fn line_end(&self, from: usize) -> usize {
        self.bytes()[from..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.end, |i| from + i)
    }

    fn scan(&mut self) -> Token {
        loop {
            while self.pos < self.end && matches!(self.bytes()[self.pos], b' ' | b'\t' | b'\r') {
                self.advance_to(self.pos + 1);
            }
            if self.pos >= self.end {
                return Token::new(TokenKind::Eof, "", self.line, self.column, self.end..self.end);
            }

            let start = self.pos;
            let rest = &self.src[start..self.end];
            let first = self.bytes()[start];

            let (kind, stop) = if self.column == 1 && first == b'#' {
                (TokenKind::Heading, self.line_end(start))
            } else if self.column == 1 && matches!(first, b'-' | b'*' | b'+') {
                (TokenKind::ListItem, self.line_end(start))
            } else if rest.starts_with("<!--") {
                let stop = rest[4..].find("-->").map_or(self.end, |i| start + 4 + i + 3);
                let kind = if self.src[start..stop].contains("xmd:") {
                    TokenKind::XmdDirective
                } else {
                    TokenKind::HtmlComment
                };
                (kind, stop)
            } else if rest.starts_with("```") {
                (TokenKind::CodeBlock, self.code_block_end(start))
            } else if rest.starts_with("{{") {
                let stop = rest[2..].find("}}").map_or(self.end, |i| start + 2 + i + 2);
                (TokenKind::VariableRef, stop)
            } else if rest.starts_with("xmd:") {
                (TokenKind::Directive, self.inline_directive_end(start))
            } else if first == b'\n' {
                self.advance_to(start + 1);
                continue;
            } else {
                let line_end = self.line_end(start);
                let stop = markers()
                    .find(&self.src[start..line_end])
                    .map_or(line_end, |m| start + m.start());
                (TokenKind::Text, stop)
            };

            let (line, column) = (self.line, self.column);
            self.advance_to(stop);
            return Token::new(kind, &self.src[start..stop], line, column, start..stop);
        }
    }

    /// End of a fenced block opened at `start`: the end of the first later
    /// line that begins with a fence, or end of input.
    fn code_block_end(&self, start: usize) -> usize {
        let mut cursor = self.line_end(start);
        while cursor < self.end {
            let line_start = cursor + 1;
            if self.src[line_start.min(self.end)..self.end].starts_with("```") {
                return self.line_end(line_start);
            }
            cursor = self.line_end(line_start.min(self.end));
        }
        self.end
    }

    /// `xmd:name` with an optional balanced `( … )` argument list.
    fn inline_directive_end(&self, start: usize) -> usize {
        let bytes = self.bytes();
        let mut i = start + 4;
        while i < self.end && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'.')) {
            i += 1;
        }
        if i >= self.end || bytes[i] != b'(' {
            return i;
        }
        let mut depth = 0usize;
        let mut quote: Option<u8> = None;
        while i < self.end {
            let b = bytes[i];
            match quote {
                Some(q) => {
                    if b == b'\\' {
                        i += 1;
                    } else if b == q {
                        quote = None;
                    }
                }
                None => match b {
                    b'"' | b'\'' => quote = Some(b),
                    b'(' => depth += 1,
                    b')' => {
                        depth -= 1;
                        if depth == 0 {
                            return i + 1;
                        }
                    }
                    _ => {}
                },
            }
            i += 1;
        }
        self.end
    }
}

/// The statement text inside an XMD directive token: everything after
/// `xmd:`, without the comment delimiters.  A blank first line is dropped so
/// the indentation of multi-line bodies survives.
pub fn directive_body(text: &str) -> &str {
    let inner = text.strip_prefix("<!--").unwrap_or(text);
    let inner = inner.strip_suffix("-->").unwrap_or(inner);
    let body = match inner.find("xmd:") {
        Some(i) => &inner[i + 4..],
        None => inner,
    };
    let body = body.trim_end();
    match body.find('\n') {
        Some(nl) if body[..nl].trim().is_empty() => {
            let rest = &body[nl + 1..];
            // Further blank lines are skipped by the statement parser.
            rest.trim_start_matches(|c| c == '\n' || c == '\r')
        }
        _ => body.trim_start(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src).iter().map(|t| t.kind).collect()
    }

    fn texts(src: &str) -> Vec<String> {
        Lexer::tokenize(src).iter().map(|t| t.text.clone()).collect()
    }

    #[test]
    fn directive_token_keeps_delimiters() {
        let src = "<!-- xmd:set x 1 -->";
        let chain = Lexer::tokenize(src);
        assert_eq!(chain.len(), 2);
        let tok = &chain.as_slice()[0];
        assert_eq!(tok.kind, TokenKind::XmdDirective);
        assert_eq!(tok.text, src);
        assert_eq!(tok.span, 0..src.len());
    }

    #[test]
    fn plain_comment_is_html() {
        assert_eq!(kinds("<!-- note -->"), vec![TokenKind::HtmlComment, TokenKind::Eof]);
    }

    #[test]
    fn heading_and_list_at_column_one() {
        assert_eq!(
            kinds("# Title\n- item\n  - nested"),
            vec![TokenKind::Heading, TokenKind::ListItem, TokenKind::Text, TokenKind::Eof]
        );
    }

    #[test]
    fn text_stops_at_markers() {
        assert_eq!(texts("Hello {{name}}!"), vec!["Hello ", "{{name}}", "!", ""]);
        assert_eq!(
            kinds("a <!-- xmd:set x 1 --> b"),
            vec![TokenKind::Text, TokenKind::XmdDirective, TokenKind::Text, TokenKind::Eof]
        );
    }

    #[test]
    fn code_fence_swallows_directives() {
        let src = "```\n<!-- xmd:set x 1 -->\n```\nafter";
        let chain = Lexer::tokenize(src);
        let toks = chain.as_slice();
        assert_eq!(toks[0].kind, TokenKind::CodeBlock);
        assert_eq!(toks[0].text, "```\n<!-- xmd:set x 1 -->\n```");
        assert_eq!(toks[1].text, "after");
    }

    #[test]
    fn unterminated_constructs_run_to_end() {
        assert_eq!(texts("<!-- xmd:set x"), vec!["<!-- xmd:set x", ""]);
        assert_eq!(texts("{{name"), vec!["{{name", ""]);
        assert_eq!(kinds("```\ncode"), vec![TokenKind::CodeBlock, TokenKind::Eof]);
    }

    #[test]
    fn inline_directive_with_balanced_args() {
        let chain = Lexer::tokenize("see xmd:upper(\"a (b)\") now");
        let toks = chain.as_slice();
        assert_eq!(toks[1].kind, TokenKind::Directive);
        assert_eq!(toks[1].text, "xmd:upper(\"a (b)\")");
        assert_eq!(toks[2].text, "now");
    }

    #[test]
    fn line_and_column_tracking() {
        let chain = Lexer::tokenize("ab\n  {{x}}");
        let var = &chain.as_slice()[1];
        assert_eq!((var.line, var.column), (2, 3));
    }

    #[test]
    fn peek_then_next_yield_same_token() {
        let mut lx = Lexer::new("# h\ntext");
        let peeked = lx.peek_token().clone();
        assert_eq!(lx.next_token(), peeked);
        assert_eq!(lx.next_token().text, "text");
        assert!(lx.next_token().is_eof());
    }

    #[test]
    fn multiline_directive() {
        let src = "<!-- xmd:\nset x 1\nprint x\n-->";
        let chain = Lexer::tokenize(src);
        assert_eq!(chain.as_slice()[0].kind, TokenKind::XmdDirective);
        assert_eq!(directive_body(&chain.as_slice()[0].text), "set x 1\nprint x");
    }

    #[test]
    fn body_extraction() {
        assert_eq!(directive_body("<!-- xmd:set x 1 -->"), "set x 1");
        assert_eq!(directive_body("<!--xmd:endif-->"), "endif");
        assert_eq!(directive_body("xmd:upper(\"a\")"), "upper(\"a\")");
    }

    #[test]
    fn ranged_lexing_keeps_absolute_spans() {
        let src = "# Title <!-- xmd:set x 1 -->";
        let mut lx = Lexer::with_range(src, 1, src.len(), 1, 2);
        let t = lx.next_token();
        assert_eq!(t.kind, TokenKind::Text);
        let d = lx.next_token();
        assert_eq!(d.kind, TokenKind::XmdDirective);
        assert_eq!(&src[d.span.clone()], "<!-- xmd:set x 1 -->");
    }
}
