//! Document parser: splits a Markdown document into literal text and
//! directive programs, and assembles document-level blocks.
//!
//! A directive comment whose body is a single `if`, `for` or `while` header
//! (no `then`, no indented body) opens a block that runs until the matching
//! `endif` / `endfor` / `endwhile` directive; the Markdown in between is the
//! block body.  Every other directive body is handed to the program parser.

use tracing::warn;

use super::ast::{Literal, Node};
use super::lexer::{directive_body, has_marker, Lexer};
use super::parser::{parse_expression_at, parse_for_header, parse_program_at};
use super::token::{Token, TokenKind};
use crate::error::ParseError;

/// A parsed document: a block of text and directive nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub body: Node,
    pub diagnostics: Vec<ParseError>,
}

pub fn parse_document(src: &str, trim_lines: bool) -> Document {
    let mut seg = Segmenter { src, cursor: 0, trim_lines, pieces: Vec::new() };
    seg.run(Lexer::new(src));
    seg.push_text(src.len());

    let mut parser = DocParser { pieces: seg.pieces, pos: 0, diagnostics: Vec::new() };
    let nodes = parser.parse_block_until(&[]);
    Document { body: Node::Block(nodes), diagnostics: parser.diagnostics }
}

// ── Segmentation ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Directive { body: &'a str, line: usize, standalone: bool },
}

struct Segmenter<'a> {
    src: &'a str,
    /// Start of the text not yet assigned to a piece.
    cursor: usize,
    trim_lines: bool,
    pieces: Vec<Piece<'a>>,
}

impl<'a> Segmenter<'a> {
    fn run(&mut self, mut lexer: Lexer<'a>) {
        loop {
            let tok = lexer.next_token();
            match tok.kind {
                TokenKind::Eof => return,
                TokenKind::XmdDirective => self.comment_directive(&tok),
                TokenKind::Directive => self.inline_directive(&tok),
                // Headings and list items are lexed whole; look inside them
                // for inline directives and comments.
                TokenKind::Heading | TokenKind::ListItem if has_marker(&tok.text) => {
                    let inner = Lexer::with_range(
                        self.src,
                        tok.span.start + 1,
                        tok.span.end,
                        tok.line,
                        tok.column + 1,
                    );
                    self.run(inner);
                }
                _ => {}
            }
        }
    }

    fn push_text(&mut self, end: usize) {
        if end > self.cursor {
            self.pieces.push(Piece::Text(&self.src[self.cursor..end]));
        }
        self.cursor = self.cursor.max(end);
    }

    fn comment_directive(&mut self, tok: &Token) {
        let src = self.src;
        let (mut start, mut end) = (tok.span.start, tok.span.end);
        let line_start = src[..start].rfind('\n').map_or(0, |i| i + 1);
        let line_end = src[end..].find('\n').map_or(src.len(), |i| end + i);
        // An earlier directive on the same line already claimed part of it.
        let standalone = self.trim_lines
            && line_start >= self.cursor
            && src[line_start..start].trim().is_empty()
            && src[end..line_end].trim().is_empty();
        if standalone {
            start = line_start;
            end = (line_end + 1).min(src.len());
        }
        self.push_text(start);
        self.pieces.push(Piece::Directive {
            body: directive_body(&src[tok.span.clone()]),
            line: tok.line,
            standalone,
        });
        self.cursor = end;
    }

    fn inline_directive(&mut self, tok: &Token) {
        // A bare `xmd:` is prose.
        if tok.text.len() <= "xmd:".len() {
            return;
        }
        let src = self.src;
        self.push_text(tok.span.start);
        self.pieces.push(Piece::Directive {
            body: &src[tok.span.start + 4..tok.span.end],
            line: tok.line,
            standalone: false,
        });
        self.cursor = tok.span.end;
    }
}

// ── Block assembly ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum Marker<'a> {
    If(&'a str),
    Elif(&'a str),
    Else,
    EndIf,
    For(&'a str),
    EndFor,
    While(&'a str),
    EndWhile,
}

impl Marker<'_> {
    fn keyword(self) -> &'static str {
        match self {
            Marker::If(_) => "if",
            Marker::Elif(_) => "elif",
            Marker::Else => "else",
            Marker::EndIf => "endif",
            Marker::For(_) => "for",
            Marker::EndFor => "endfor",
            Marker::While(_) => "while",
            Marker::EndWhile => "endwhile",
        }
    }
}

/// Recognise a single-line block header or terminator.
fn classify(body: &str) -> Option<Marker<'_>> {
    let body = body.trim();
    if body.contains('\n') {
        return None;
    }
    let word_end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(body.len());
    let (word, rest) = (&body[..word_end], body[word_end..].trim_start());
    let marker = match word {
        "if" if !rest.is_empty() && !rest.contains(" then ") => Marker::If(rest),
        "elif" if !rest.is_empty() => Marker::Elif(rest),
        "else" if rest.is_empty() => Marker::Else,
        "else" => Marker::Elif(rest.strip_prefix("if ")?.trim_start()),
        "endif" if rest.is_empty() => Marker::EndIf,
        "for" if !rest.is_empty() => Marker::For(rest),
        "endfor" if rest.is_empty() => Marker::EndFor,
        "while" if !rest.is_empty() => Marker::While(rest),
        "endwhile" if rest.is_empty() => Marker::EndWhile,
        _ => return None,
    };
    Some(marker)
}

struct DocParser<'a> {
    pieces: Vec<Piece<'a>>,
    pos: usize,
    diagnostics: Vec<ParseError>,
}

impl<'a> DocParser<'a> {
    fn diagnostic(&mut self, line: usize, message: impl Into<String>) {
        let err = ParseError::new(line, 1, message);
        warn!(line, "{err}");
        self.diagnostics.push(err);
    }

    /// Nodes up to (not including) a marker named in `stop_at`, or the end.
    fn parse_block_until(&mut self, stop_at: &[&str]) -> Vec<Node> {
        let mut nodes = Vec::new();
        while let Some(&piece) = self.pieces.get(self.pos) {
            let (body, line, standalone) = match piece {
                Piece::Text(text) => {
                    self.pos += 1;
                    nodes.push(Node::Text(text.to_owned()));
                    continue;
                }
                Piece::Directive { body, line, standalone } => (body, line, standalone),
            };
            let marker = classify(body);
            if marker.is_some_and(|m| stop_at.contains(&m.keyword())) {
                break;
            }
            self.pos += 1;
            let node = match marker {
                Some(Marker::If(cond)) => self.parse_if(cond, line),
                Some(Marker::For(header)) => self.parse_for(header, line),
                Some(Marker::While(cond)) => self.parse_while(cond, line),
                Some(stray) => {
                    self.diagnostic(line, format!("'{}' without an open block", stray.keyword()));
                    continue;
                }
                None => {
                    let program = parse_program_at(body, line);
                    self.diagnostics.extend(program.diagnostics);
                    Node::Directive { body: Box::new(program.body), line, standalone }
                }
            };
            nodes.push(node);
        }
        nodes
    }

    /// Consume the marker at the cursor, if any.
    fn take_marker(&mut self) -> Option<(Marker<'a>, usize)> {
        match self.pieces.get(self.pos) {
            Some(&Piece::Directive { body, line, .. }) => {
                let marker = classify(body)?;
                self.pos += 1;
                Some((marker, line))
            }
            _ => None,
        }
    }

    fn condition(&mut self, text: &str, line: usize) -> Node {
        parse_expression_at(text, line).unwrap_or_else(|e| {
            warn!(line, "bad condition: {e}");
            self.diagnostics.push(e);
            Node::Literal(Literal::Boolean(false))
        })
    }

    fn block(stmt: Node, line: usize) -> Node {
        Node::Directive { body: Box::new(stmt), line, standalone: false }
    }

    fn parse_if(&mut self, cond: &str, line: usize) -> Node {
        let mut branches = Vec::new();
        let mut otherwise = None;
        let (mut cond_text, mut cond_line) = (cond, line);
        loop {
            let cond = self.condition(cond_text, cond_line);
            let body = self.parse_block_until(&["elif", "else", "endif"]);
            branches.push((cond, Node::Block(body)));
            match self.take_marker() {
                Some((Marker::Elif(next), next_line)) => {
                    cond_text = next;
                    cond_line = next_line;
                }
                Some((Marker::Else, _)) => {
                    otherwise = Some(Box::new(Node::Block(self.parse_block_until(&["endif"]))));
                    if self.take_marker().is_none() {
                        self.diagnostic(line, "'if' block is missing 'endif'");
                    }
                    break;
                }
                Some(_) => break,
                None => {
                    self.diagnostic(line, "'if' block is missing 'endif'");
                    break;
                }
            }
        }
        Self::block(Node::Conditional { branches, otherwise }, line)
    }

    fn parse_for(&mut self, header: &str, line: usize) -> Node {
        let parsed = parse_for_header(header, line);
        let body = self.parse_block_until(&["endfor"]);
        if self.take_marker().is_none() {
            self.diagnostic(line, "'for' block is missing 'endfor'");
        }
        match parsed {
            Ok((var, iterable)) => Self::block(
                Node::ForIn { var, iterable: Box::new(iterable), body: Box::new(Node::Block(body)) },
                line,
            ),
            Err(e) => {
                warn!(line, "{e}");
                self.diagnostics.push(e);
                Node::Block(Vec::new())
            }
        }
    }

    fn parse_while(&mut self, cond: &str, line: usize) -> Node {
        let cond = self.condition(cond, line);
        let body = self.parse_block_until(&["endwhile"]);
        if self.take_marker().is_none() {
            self.diagnostic(line, "'while' block is missing 'endwhile'");
        }
        Self::block(Node::While { cond: Box::new(cond), body: Box::new(Node::Block(body)) }, line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pieces(src: &str, trim: bool) -> Vec<Piece<'_>> {
        let mut seg = Segmenter { src, cursor: 0, trim_lines: trim, pieces: Vec::new() };
        seg.run(Lexer::new(src));
        seg.push_text(src.len());
        seg.pieces
    }

    fn texts(doc: &Document) -> Vec<String> {
        doc.body
            .statements()
            .iter()
            .filter_map(|n| match n {
                Node::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn inline_comment_splits_text() {
        assert_eq!(
            pieces("Hello <!-- xmd:set x 1 --> world", true),
            vec![
                Piece::Text("Hello "),
                Piece::Directive { body: "set x 1", line: 1, standalone: false },
                Piece::Text(" world"),
            ]
        );
    }

    #[test]
    fn standalone_directive_consumes_its_line() {
        assert_eq!(
            pieces("a\n  <!-- xmd:set x 1 -->  \nb", true),
            vec![
                Piece::Text("a\n"),
                Piece::Directive { body: "set x 1", line: 2, standalone: true },
                Piece::Text("b"),
            ]
        );
    }

    #[test]
    fn shared_line_is_not_standalone() {
        assert_eq!(
            pieces("<!-- xmd:set n 1 --><!-- xmd:n() -->\nb", true),
            vec![
                Piece::Directive { body: "set n 1", line: 1, standalone: false },
                Piece::Directive { body: "n()", line: 1, standalone: false },
                Piece::Text("\nb"),
            ]
        );
    }

    #[test]
    fn trimming_can_be_disabled() {
        assert_eq!(
            pieces("a\n<!-- xmd:set x 1 -->\nb", false),
            vec![
                Piece::Text("a\n"),
                Piece::Directive { body: "set x 1", line: 2, standalone: false },
                Piece::Text("\nb"),
            ]
        );
    }

    #[test]
    fn code_blocks_are_left_alone() {
        let src = "```\n<!-- xmd:set x 1 -->\n```\n";
        assert_eq!(pieces(src, true), vec![Piece::Text(src)]);
    }

    #[test]
    fn plain_comments_are_text() {
        let src = "<!-- note -->\n";
        assert_eq!(pieces(src, true), vec![Piece::Text(src)]);
    }

    #[test]
    fn inline_directive_in_heading() {
        assert_eq!(
            pieces("# Hi xmd:upper(name)\nbody", true),
            vec![
                Piece::Text("# Hi "),
                Piece::Directive { body: "upper(name)", line: 1, standalone: false },
                Piece::Text("\nbody"),
            ]
        );
    }

    #[test]
    fn bare_xmd_prefix_is_prose() {
        let src = "write xmd: then text";
        assert_eq!(pieces(src, true), vec![Piece::Text(src)]);
    }

    #[test]
    fn classify_markers() {
        assert_eq!(classify("if x > 1"), Some(Marker::If("x > 1")));
        assert_eq!(classify("if x then y"), None);
        assert_eq!(classify("else if y"), Some(Marker::Elif("y")));
        assert_eq!(classify(" endfor "), Some(Marker::EndFor));
        assert_eq!(classify("for i in 1 2\n  print i"), None);
        assert_eq!(classify("set x 1"), None);
    }

    #[test]
    fn document_if_block() {
        let doc = parse_document(
            "<!-- xmd:if x -->\nyes\n<!-- xmd:elif y -->\nmaybe\n<!-- xmd:else -->\nno\n<!-- xmd:endif -->\nend",
            true,
        );
        assert!(doc.diagnostics.is_empty(), "{:?}", doc.diagnostics);
        let stmts = doc.body.statements();
        assert_eq!(stmts.len(), 2);
        let Node::Directive { body, .. } = &stmts[0] else { panic!("{stmts:?}") };
        let Node::Conditional { branches, otherwise } = body.as_ref() else { panic!() };
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].1, Node::Block(vec![Node::Text("yes\n".into())]));
        assert_eq!(otherwise.as_deref(), Some(&Node::Block(vec![Node::Text("no\n".into())])));
        assert_eq!(stmts[1], Node::Text("end".into()));
    }

    #[test]
    fn unclosed_for_is_reported() {
        let doc = parse_document("<!-- xmd:for i in 1 2 -->\nrow\n", true);
        assert_eq!(doc.diagnostics.len(), 1);
        assert!(doc.diagnostics[0].message.contains("endfor"));
        assert_eq!(doc.body.statements().len(), 1);
    }

    #[test]
    fn stray_terminator_is_reported() {
        let doc = parse_document("a\n<!-- xmd:endwhile -->\nb", true);
        assert_eq!(doc.diagnostics.len(), 1);
        assert_eq!(texts(&doc), vec!["a\n", "b"]);
    }

    #[test]
    fn directive_bodies_are_parsed() {
        let doc = parse_document("<!-- xmd:\nset x 1\nprint x\n-->", true);
        let Node::Directive { body, line, standalone } = &doc.body.statements()[0] else { panic!() };
        assert_eq!(*line, 1);
        assert!(*standalone);
        assert_eq!(body.statements().len(), 2);
    }
}
