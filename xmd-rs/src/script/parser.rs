//! Recursive-descent parser for directive programs.
//!
//! A directive body is a sequence of lines.  Block statements (`if`, `while`,
//! `for`, `function`, `class`) take the following, more deeply indented lines
//! as their body; everything else is one statement per line (or per `;`).
//! Within a line, expressions are parsed from the token stream produced by
//! [`tokenize`].
//!
//! Expression precedence (lowest → highest):
//!   or  →  and  →  equality  →  comparison  →  additive  →
//!   multiplicative  →  unary  →  postfix  →  primary
//!
//! A line that fails to parse is recorded as a diagnostic and skipped
//! (together with its indented body); parsing carries on with the next line.

use tracing::warn;

use super::ast::{
    AssignOp, BinOp, ClassDef, FileOpKind, FunctionDef, Literal, MethodDef, Node, Target, UnaryOp,
};
use super::expr::{decode_escapes, quoted_end, split_words, tokenize};
use super::lexer::directive_body;
use super::token::{Token, TokenKind};
use crate::error::ParseError;

type PResult<T> = Result<T, ParseError>;

/// Deepest bracket / unary / embedded-directive nesting an expression may use.
pub const MAX_NESTING: usize = 64;

/// A parsed directive body plus the lines that had to be skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Node,
    pub diagnostics: Vec<ParseError>,
}

// ── Expression parser ─────────────────────────────────────────────────────────

struct ExprParser<'t> {
    tokens: &'t [Token],
    pos: usize,
    /// Line number of the first line of the parsed text.
    base_line: usize,
    depth: usize,
}

impl<'t> ExprParser<'t> {
    /// `tokens` must end with an EOF token, as [`tokenize`] guarantees.
    fn new(tokens: &'t [Token], base_line: usize) -> Self {
        ExprParser { tokens, pos: 0, base_line, depth: 0 }
    }

    fn peek(&self) -> &'t Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &'t Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> &'t Token {
        let tok = self.peek();
        if !tok.is_eof() {
            self.pos += 1;
        }
        tok
    }

    fn eat_op(&mut self, op: &str) -> bool {
        if self.peek().is_op(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().is_punct(p) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> PResult<()> {
        if self.eat_punct(p) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{p}'")))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let tok = self.peek();
        let message = message.into();
        let message = if tok.is_eof() {
            format!("{message} at end of input")
        } else {
            format!("{message}, found '{}'", tok.text)
        };
        ParseError::new(self.base_line + tok.line - 1, tok.column, message)
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> PResult<Node> {
        self.nested(Self::parse_or)
    }

    fn nested(&mut self, inner: fn(&mut Self) -> PResult<Node>) -> PResult<Node> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let node = inner(self);
        self.depth -= 1;
        node
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinOp)],
        next: fn(&mut Self) -> PResult<Node>,
    ) -> PResult<Node> {
        let mut lhs = next(self)?;
        'outer: loop {
            for &(sym, op) in ops {
                if self.eat_op(sym) {
                    let rhs = next(self)?;
                    lhs = Node::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
                    continue 'outer;
                }
            }
            return Ok(lhs);
        }
    }

    fn parse_or(&mut self) -> PResult<Node> {
        self.binary_level(&[("||", BinOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> PResult<Node> {
        self.binary_level(&[("&&", BinOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> PResult<Node> {
        // A lone `=` inside an expression compares.
        self.binary_level(
            &[("==", BinOp::Eq), ("!=", BinOp::Ne), ("=", BinOp::Eq)],
            Self::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> PResult<Node> {
        self.binary_level(
            &[("<=", BinOp::Le), (">=", BinOp::Ge), ("<", BinOp::Lt), (">", BinOp::Gt)],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> PResult<Node> {
        self.binary_level(&[("+", BinOp::Add), ("-", BinOp::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> PResult<Node> {
        self.binary_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Rem)],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> PResult<Node> {
        let op = if self.eat_op("!") {
            UnaryOp::Not
        } else if self.eat_op("-") {
            UnaryOp::Neg
        } else {
            return self.parse_postfix();
        };
        let operand = self.nested(Self::parse_unary)?;
        Ok(Node::Unary { op, operand: Box::new(operand) })
    }

    fn parse_postfix(&mut self) -> PResult<Node> {
        let mut node = self.parse_primary()?;
        loop {
            if self.eat_punct(".") {
                let key = self.peek();
                if !matches!(
                    key.kind,
                    TokenKind::Identifier | TokenKind::Number | TokenKind::Boolean
                ) {
                    return Err(self.error("expected a property name after '.'"));
                }
                self.advance();
                if self.eat_punct("(") {
                    let args = self.parse_list(")")?;
                    node = Node::MethodCall { object: Box::new(node), method: key.text.clone(), args };
                } else {
                    node = Node::Property { object: Box::new(node), key: key.text.clone() };
                }
            } else if self.eat_punct("[") {
                let index = self.parse_expr()?;
                self.expect_punct("]")?;
                node = Node::Index { object: Box::new(node), index: Box::new(index) };
            } else {
                return Ok(node);
            }
        }
    }

    fn parse_primary(&mut self) -> PResult<Node> {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Number => {
                let n: f64 = tok.text.parse().map_err(|_| self.error("bad number"))?;
                self.advance();
                Ok(Node::number(n))
            }
            TokenKind::String => {
                self.advance();
                Ok(Node::string(decode_escapes(&tok.text)))
            }
            TokenKind::Boolean => {
                self.advance();
                Ok(Node::Literal(Literal::Boolean(tok.text == "true")))
            }
            TokenKind::Identifier => {
                self.advance();
                if tok.text == "null" {
                    return Ok(Node::null());
                }
                if tok.text == "File" && self.peek().is_punct(".") && self.peek_at(2).is_punct("(") {
                    return self.parse_file_call();
                }
                if self.eat_punct("(") {
                    let args = self.parse_list(")")?;
                    return Ok(Node::Call { name: tok.text.clone(), args });
                }
                Ok(Node::Identifier(tok.text.clone()))
            }
            TokenKind::Punct if tok.text == "(" => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            TokenKind::Punct if tok.text == "[" => {
                self.advance();
                Ok(Node::Array(self.parse_list("]")?))
            }
            TokenKind::Punct if tok.text == "{" => {
                self.advance();
                self.parse_object()
            }
            TokenKind::Directive => {
                // Each embedded directive parses its body afresh.
                if tok.text.matches("<!--").count() > MAX_NESTING {
                    return Err(self.error("expression nested too deeply"));
                }
                self.advance();
                let line = self.base_line + tok.line - 1;
                Ok(parse_program_at(directive_body(&tok.text), line).body)
            }
            _ => Err(self.error("expected expression")),
        }
    }

    /// Comma-separated expressions up to `close`; the opener is consumed.
    fn parse_list(&mut self, close: &str) -> PResult<Vec<Node>> {
        let mut items = Vec::new();
        if self.eat_punct(close) {
            return Ok(items);
        }
        loop {
            items.push(self.parse_expr()?);
            if self.eat_punct(",") {
                if self.eat_punct(close) {
                    return Ok(items);
                }
                continue;
            }
            self.expect_punct(close)?;
            return Ok(items);
        }
    }

    /// `{key: expr, …}`; the `{` is consumed.
    fn parse_object(&mut self) -> PResult<Node> {
        let mut pairs = Vec::new();
        if self.eat_punct("}") {
            return Ok(Node::Object(pairs));
        }
        loop {
            let key_tok = self.peek();
            let key = match key_tok.kind {
                TokenKind::Identifier | TokenKind::Number | TokenKind::Boolean => key_tok.text.clone(),
                TokenKind::String => decode_escapes(&key_tok.text),
                _ => return Err(self.error("expected object key")),
            };
            self.advance();
            self.expect_punct(":")?;
            let value = self.parse_expr()?;
            pairs.push((key, value));
            if self.eat_punct(",") {
                if self.eat_punct("}") {
                    break;
                }
                continue;
            }
            self.expect_punct("}")?;
            break;
        }
        Ok(Node::Object(pairs))
    }

    /// `File.op(args)`; `File` is consumed.
    fn parse_file_call(&mut self) -> PResult<Node> {
        self.expect_punct(".")?;
        let op = FileOpKind::from_name(&self.peek().text)
            .ok_or_else(|| self.error("unknown file operation"))?;
        self.advance();
        self.expect_punct("(")?;
        let args = self.parse_list(")")?;
        file_node(op, args).map_err(|msg| self.error(msg))
    }
}

fn file_node(op: FileOpKind, args: Vec<Node>) -> Result<Node, String> {
    let wanted = if op == FileOpKind::Write { 2 } else { 1 };
    if args.len() != wanted {
        return Err(format!("File.{} takes {wanted} argument(s), got {}", op.name(), args.len()));
    }
    let mut args = args.into_iter();
    let path = args.next().map(Box::new).unwrap_or_else(|| Box::new(Node::null()));
    let content = args.next().map(Box::new);
    Ok(Node::File { op, path, content })
}

/// Parse a complete expression.
pub fn parse_expression(src: &str) -> PResult<Node> {
    parse_expression_at(src, 1)
}

/// Parse a complete expression whose text starts on `line`.
pub fn parse_expression_at(src: &str, line: usize) -> PResult<Node> {
    let chain = tokenize(src);
    let mut parser = ExprParser::new(chain.as_slice(), line);
    let node = parser.parse_expr()?;
    if !parser.peek().is_eof() {
        return Err(parser.error("unexpected token"));
    }
    Ok(node)
}

// ── Shell-style calls ─────────────────────────────────────────────────────────

/// Rewrite `name arg1 "arg 2" arg3` as `name(arg1, "arg 2", arg3)`.
///
/// Returns `None` when the text does not start with an identifier, is
/// empty, or already continues as an expression (`name(`, `name.x`,
/// `name + 1`, …).
pub fn shell_call_transform(src: &str) -> Option<String> {
    let s = src.trim();
    let first = s.chars().next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    let name_end = s
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(s.len());
    let (name, rest) = s.split_at(name_end);
    if matches!(name, "true" | "false" | "null") {
        return None;
    }
    let args = rest.trim_start();
    if args.is_empty() {
        return Some(format!("{name}()"));
    }
    if args.len() == rest.len() {
        return None;
    }
    if matches!(
        args.as_bytes()[0],
        b'=' | b'+' | b'-' | b'*' | b'/' | b'%' | b'<' | b'>' | b'!' | b'&' | b'|' | b'(' | b'.' | b'['
    ) {
        return None;
    }
    Some(format!("{name}({})", split_words(args).join(", ")))
}

// ── Multi-assignment ──────────────────────────────────────────────────────────

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Index of the next `,` or newline outside quotes and brackets, or the end.
fn top_level_comma(b: &[u8], mut i: usize) -> usize {
    let mut depth = 0usize;
    while i < b.len() {
        match b[i] {
            b'"' | b'\'' => {
                i = quoted_end(b, i);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' | b'\n' if depth == 0 => return i,
            _ => {}
        }
        i += 1;
    }
    b.len()
}

/// Split the body of `set` into `(name, op, raw value)` triples:
/// `x 10, y "a, b", z = 30`.
///
/// The value is delimited by its first character: a number runs over digits
/// and `.`, a quoted string to its closing quote, an identifier over
/// identifier characters, anything else up to the next top-level comma.  If
/// more than whitespace follows before the next comma, the value extends to
/// that comma.
pub fn split_assignments(src: &str) -> Vec<(String, AssignOp, String)> {
    let b = src.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    loop {
        while i < b.len() && (b[i].is_ascii_whitespace() || b[i] == b',') {
            i += 1;
        }
        if i >= b.len() {
            break;
        }
        let name_start = i;
        while i < b.len() && (is_ident_byte(b[i]) || b[i] == b'.') {
            i += 1;
        }
        if i == name_start {
            break;
        }
        let name = src[name_start..i].to_owned();
        while i < b.len() && matches!(b[i], b' ' | b'\t') {
            i += 1;
        }
        let op = if src[i..].starts_with("+=") {
            i += 2;
            AssignOp::Add
        } else {
            if b.get(i) == Some(&b'=') && b.get(i + 1) != Some(&b'=') {
                i += 1;
            }
            AssignOp::Set
        };
        while i < b.len() && matches!(b[i], b' ' | b'\t') {
            i += 1;
        }

        let value_start = i;
        if i < b.len() {
            let c = b[i];
            let negative_number = c == b'-' && b.get(i + 1).is_some_and(u8::is_ascii_digit);
            if c.is_ascii_digit() || negative_number {
                i += 1;
                while i < b.len() && (b[i].is_ascii_digit() || b[i] == b'.') {
                    i += 1;
                }
            } else if c == b'"' || c == b'\'' {
                i = quoted_end(b, i);
            } else if c.is_ascii_alphabetic() || c == b'_' {
                while i < b.len() && is_ident_byte(b[i]) {
                    i += 1;
                }
            } else {
                i = top_level_comma(b, i);
            }
            let next = top_level_comma(b, i);
            if !src[i..next].trim().is_empty() {
                i = next;
            }
        }
        out.push((name, op, src[value_start..i].trim().to_owned()));
    }
    out
}

/// `a`, `a.b.c` → assignment target.
fn target_from_path(path: &str) -> Option<Target> {
    let mut parts = path.split('.');
    let root = parts.next().filter(|p| !p.is_empty())?;
    let mut node = Node::ident(root);
    for part in parts {
        if part.is_empty() {
            return None;
        }
        node = Node::Property { object: Box::new(node), key: part.to_owned() };
    }
    node.into_target()
}

/// Parse the arguments of `set`.  Several comma-separated assignments give
/// a block of assignment statements.
pub fn parse_set(src: &str, line: usize) -> PResult<Node> {
    let assignments = split_assignments(src);
    if assignments.is_empty() {
        return Err(ParseError::new(line, 1, "'set' needs a variable name"));
    }
    let mut stmts = Vec::with_capacity(assignments.len());
    for (name, op, raw) in assignments {
        let target = target_from_path(&name)
            .ok_or_else(|| ParseError::new(line, 1, format!("invalid assignment target '{name}'")))?;
        let value = if raw.is_empty() {
            Node::null()
        } else {
            parse_expression_at(&raw, line).unwrap_or_else(|_| Node::string(raw))
        };
        stmts.push(Node::Assign { target, op, value: Box::new(value) });
    }
    Ok(if stmts.len() == 1 { stmts.remove(0) } else { Node::Block(stmts) })
}

/// Find a statement-level `=` or `+=`: returns (lhs, op, rhs).
fn split_assignment(text: &str) -> Option<(&str, AssignOp, &str)> {
    let b = text.as_bytes();
    if !b.first().is_some_and(|&c| c.is_ascii_alphabetic() || c == b'_') {
        return None;
    }
    let mut depth = 0usize;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'"' | b'\'' => {
                i = quoted_end(b, i);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b'=' if depth == 0 => {
                if b.get(i + 1) == Some(&b'=') {
                    return None;
                }
                let prev = if i > 0 { b[i - 1] } else { b' ' };
                return match prev {
                    b'+' => Some((text[..i - 1].trim(), AssignOp::Add, text[i + 1..].trim())),
                    b'=' | b'!' | b'<' | b'>' => None,
                    _ => Some((text[..i].trim(), AssignOp::Set, text[i + 1..].trim())),
                };
            }
            _ => {}
        }
        i += 1;
    }
    None
}

// ── Loop headers ──────────────────────────────────────────────────────────────

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_path(s: &str) -> bool {
    !s.is_empty() && s.split('.').all(is_identifier)
}

/// A `for` list element: numbers for digit/`-` led words, strings otherwise.
fn list_item(word: &str) -> Node {
    let word = word.trim_end_matches(',');
    if word.starts_with(|c: char| c.is_ascii_digit() || c == '-') {
        if let Ok(n) = word.parse::<f64>() {
            return Node::number(n);
        }
    }
    let b = word.as_bytes();
    if b.len() >= 2 && matches!(b[0], b'"' | b'\'') && b[b.len() - 1] == b[0] {
        return Node::string(decode_escapes(&word[1..word.len() - 1]));
    }
    Node::string(word)
}

/// `start .. end` outside quotes.
fn split_range(text: &str) -> Option<(&str, &str)> {
    let b = text.as_bytes();
    let mut i = 0;
    while i + 1 < b.len() {
        match b[i] {
            b'"' | b'\'' => {
                i = quoted_end(b, i);
                continue;
            }
            b'.' if b[i + 1] == b'.' => {
                let (lhs, rhs) = (text[..i].trim(), text[i + 2..].trim());
                return (!lhs.is_empty() && !rhs.is_empty()).then_some((lhs, rhs));
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// The iterable of a `for` loop.
///
/// A flat whitespace-separated list becomes an array literal.  Also accepted:
/// `a .. b` (inclusive range), a bracketed array expression, or a single
/// variable/property path.
pub fn parse_iterable(text: &str, line: usize) -> PResult<Node> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Node::Array(Vec::new()));
    }
    if let Some((start, end)) = split_range(text) {
        return Ok(Node::Range {
            start: Box::new(parse_expression_at(start, line)?),
            end: Box::new(parse_expression_at(end, line)?),
        });
    }
    if text.starts_with('[') {
        return parse_expression_at(text, line);
    }
    let words = split_words(text);
    if let [word] = words.as_slice() {
        if is_path(word) && !matches!(*word, "true" | "false" | "null") {
            return parse_expression_at(word, line);
        }
    }
    Ok(Node::Array(words.into_iter().map(list_item).collect()))
}

/// `var in iterable` → (var, iterable node).
pub fn parse_for_header(text: &str, line: usize) -> PResult<(String, Node)> {
    let text = text.trim();
    let (var, iterable) = match text.find(" in ") {
        Some(i) => (text[..i].trim(), &text[i + 4..]),
        None => match text.strip_suffix(" in") {
            Some(var) => (var.trim(), ""),
            None => return Err(ParseError::new(line, 1, "expected 'for <var> in <items>'")),
        },
    };
    if !is_identifier(var) {
        return Err(ParseError::new(line, 1, format!("invalid loop variable '{var}'")));
    }
    Ok((var.to_owned(), parse_iterable(iterable, line)?))
}

// ── Statement parser ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    indent: usize,
    text: &'a str,
    number: usize,
}

struct StmtParser<'a> {
    lines: Vec<Line<'a>>,
    pos: usize,
    diagnostics: Vec<ParseError>,
}

/// Leading identifier run and the rest of the line.
fn split_first_word(text: &str) -> (&str, &str) {
    let end = text
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(text.len());
    (&text[..end], text[end..].trim_start())
}

/// Split on `;` outside quotes and brackets.
fn split_statements(text: &str) -> Vec<&str> {
    let b = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < b.len() {
        match b[i] {
            b'"' | b'\'' => {
                i = quoted_end(b, i);
                continue;
            }
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

fn parse_params(text: &str, line: usize) -> PResult<Vec<String>> {
    let inner = match text.trim().strip_prefix('(') {
        Some(rest) => rest.strip_suffix(')').ok_or_else(|| ParseError::new(line, 1, "unclosed parameter list"))?,
        None => text,
    };
    inner
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|p| !p.is_empty())
        .map(|p| {
            if is_identifier(p) {
                Ok(p.to_owned())
            } else {
                Err(ParseError::new(line, 1, format!("invalid parameter name '{p}'")))
            }
        })
        .collect()
}

/// A bare word used as a `File.*` argument: quoted → string, identifier →
/// variable, anything else → the literal text (so `notes.txt` is a path).
fn word_node(word: &str, line: usize) -> Node {
    if word.starts_with(['"', '\'']) {
        return parse_expression_at(word, line).unwrap_or_else(|_| Node::string(word));
    }
    if is_identifier(word) {
        return Node::ident(word);
    }
    Node::string(word)
}

/// Argument of `import`/`exec`: a quoted or parenthesised expression, or the
/// raw rest of the line.
fn raw_argument(text: &str, line: usize) -> Node {
    if text.starts_with(['"', '\'', '(']) {
        if let Ok(node) = parse_expression_at(text, line) {
            return node;
        }
    }
    Node::string(text)
}

impl<'a> StmtParser<'a> {
    fn new(src: &'a str, first_line: usize) -> Self {
        let lines = src
            .lines()
            .enumerate()
            .filter_map(|(i, raw)| {
                let text = raw.trim_end();
                let trimmed = text.trim_start();
                if trimmed.is_empty() || trimmed.starts_with("//") {
                    return None;
                }
                Some(Line { indent: text.len() - trimmed.len(), text: trimmed, number: first_line + i })
            })
            .collect();
        StmtParser { lines, pos: 0, diagnostics: Vec::new() }
    }

    fn peek_line(&self) -> Option<Line<'a>> {
        self.lines.get(self.pos).copied()
    }

    /// Statements on lines indented at least `min_indent`.
    fn parse_lines(&mut self, min_indent: usize) -> Vec<Node> {
        let mut stmts = Vec::new();
        while let Some(line) = self.peek_line() {
            if line.indent < min_indent {
                break;
            }
            self.pos += 1;
            match self.parse_line(line) {
                Ok(node) => stmts.push(node),
                Err(e) => {
                    warn!(line = e.line, "skipping statement: {e}");
                    self.diagnostics.push(e);
                    self.skip_body(line.indent);
                }
            }
        }
        stmts
    }

    /// The indented body following `header`, possibly empty.
    fn body(&mut self, header: Line<'a>) -> Vec<Node> {
        match self.peek_line() {
            Some(next) if next.indent > header.indent => self.parse_lines(next.indent),
            _ => Vec::new(),
        }
    }

    fn skip_body(&mut self, indent: usize) {
        while self.peek_line().is_some_and(|l| l.indent > indent) {
            self.pos += 1;
        }
    }

    fn parse_line(&mut self, line: Line<'a>) -> PResult<Node> {
        let (word, rest) = split_first_word(line.text);
        match word {
            "if" => self.parse_if(line, rest),
            "elif" => Err(ParseError::new(line.number, 1, "'elif' without 'if'")),
            "else" => Err(ParseError::new(line.number, 1, "'else' without 'if'")),
            "while" => {
                let cond = parse_expression_at(rest, line.number)?;
                let body = self.body(line);
                Ok(Node::While { cond: Box::new(cond), body: Box::new(Node::Block(body)) })
            }
            "for" => {
                let (var, iterable) = parse_for_header(rest, line.number)?;
                let body = self.body(line);
                Ok(Node::ForIn { var, iterable: Box::new(iterable), body: Box::new(Node::Block(body)) })
            }
            "function" => self.parse_function(line, rest),
            "class" => self.parse_class(line, rest),
            _ => {
                let parts = split_statements(line.text);
                if parts.len() > 1 {
                    let stmts = parts
                        .into_iter()
                        .map(|part| parse_simple(part, line.number))
                        .collect::<PResult<Vec<_>>>()?;
                    Ok(Node::Block(stmts))
                } else {
                    parse_simple(line.text, line.number)
                }
            }
        }
    }

    fn parse_if(&mut self, line: Line<'a>, rest: &str) -> PResult<Node> {
        if rest.contains(" then ") {
            return parse_if_then(rest, line.number);
        }
        let cond_text = rest.strip_suffix(" then").unwrap_or(rest);
        let cond = parse_expression_at(cond_text, line.number)?;
        let body = self.body(line);
        if body.is_empty() {
            return Err(ParseError::new(line.number, 1, "expected 'then' or an indented body"));
        }
        let mut branches = vec![(cond, Node::Block(body))];
        let mut otherwise = None;
        while let Some(next) = self.peek_line() {
            if next.indent != line.indent {
                break;
            }
            let (word, rest) = split_first_word(next.text);
            let elif_cond = match word {
                "elif" => Some(rest),
                "else" => rest.strip_prefix("if ").map(str::trim_start),
                _ => break,
            };
            self.pos += 1;
            match elif_cond {
                Some(text) => {
                    let text = text.strip_suffix(" then").unwrap_or(text);
                    let cond = parse_expression_at(text, next.number)?;
                    let body = self.body(next);
                    branches.push((cond, Node::Block(body)));
                }
                None => {
                    otherwise = Some(Box::new(Node::Block(self.body(next))));
                    break;
                }
            }
        }
        Ok(Node::Conditional { branches, otherwise })
    }

    fn parse_function(&mut self, line: Line<'a>, rest: &str) -> PResult<Node> {
        let (name, params) = split_first_word(rest);
        if !is_identifier(name) {
            return Err(ParseError::new(line.number, 1, "expected a function name"));
        }
        let params = parse_params(params, line.number)?;
        let body = self.body(line);
        Ok(Node::Function(Box::new(FunctionDef {
            name: name.to_owned(),
            params,
            body: Node::Block(body),
        })))
    }

    fn parse_class(&mut self, line: Line<'a>, rest: &str) -> PResult<Node> {
        let (name, rest) = split_first_word(rest);
        if !is_identifier(name) {
            return Err(ParseError::new(line.number, 1, "expected a class name"));
        }
        let parent = match split_first_word(rest) {
            ("extends", parent) if is_identifier(parent) => Some(parent.to_owned()),
            ("", "") => None,
            _ => return Err(ParseError::new(line.number, 1, "expected 'extends <Parent>'")),
        };

        let mut methods = Vec::new();
        let method_indent = match self.peek_line() {
            Some(next) if next.indent > line.indent => next.indent,
            _ => return Ok(Node::Class(Box::new(ClassDef { name: name.to_owned(), parent, methods }))),
        };
        while let Some(header) = self.peek_line() {
            if header.indent < method_indent {
                break;
            }
            self.pos += 1;
            match self.parse_method(header) {
                Ok(method) => methods.push(method),
                Err(e) => {
                    warn!(line = e.line, "skipping method: {e}");
                    self.diagnostics.push(e);
                    self.skip_body(header.indent);
                }
            }
        }
        Ok(Node::Class(Box::new(ClassDef { name: name.to_owned(), parent, methods })))
    }

    fn parse_method(&mut self, header: Line<'a>) -> PResult<MethodDef> {
        let (mut word, mut rest) = split_first_word(header.text);
        let private = word == "private";
        if private {
            (word, rest) = split_first_word(rest);
        }
        if word == "method" || word == "function" {
            (word, rest) = split_first_word(rest);
        }
        if !is_identifier(word) {
            return Err(ParseError::new(header.number, 1, "expected a method name"));
        }
        let params = parse_params(rest, header.number)?;
        let body = self.body(header);
        Ok(MethodDef { name: word.to_owned(), params, body: Node::Block(body), private })
    }
}

/// `cond then stmt [else stmt]` (the `if` is already consumed).
fn parse_if_then(rest: &str, line: usize) -> PResult<Node> {
    let idx = rest
        .find(" then ")
        .ok_or_else(|| ParseError::new(line, 1, "expected 'then'"))?;
    let cond = parse_expression_at(&rest[..idx], line)?;
    let tail = rest[idx + 6..].trim();
    let (then_text, else_text) = match tail.find(" else ") {
        Some(i) => (&tail[..i], Some(tail[i + 6..].trim())),
        None => (tail, None),
    };
    let then_stmt = parse_simple(then_text, line)?;
    let otherwise = match else_text {
        Some(text) => Some(Box::new(Node::Block(vec![parse_simple(text, line)?]))),
        None => None,
    };
    Ok(Node::Conditional { branches: vec![(cond, Node::Block(vec![then_stmt]))], otherwise })
}

/// A single statement with no indented body.
pub fn parse_simple(text: &str, line: usize) -> PResult<Node> {
    let text = text.trim();
    let (word, rest) = split_first_word(text);
    match word {
        "set" if !rest.starts_with(['(', '=', '.']) => parse_set(rest, line),
        "print" => {
            let arg = if rest.is_empty() { Node::string("") } else { parse_expression_at(rest, line)? };
            Ok(Node::Call { name: "print".to_owned(), args: vec![arg] })
        }
        "return" => {
            let value = if rest.is_empty() { None } else { Some(Box::new(parse_expression_at(rest, line)?)) };
            Ok(Node::Return(value))
        }
        "break" if rest.is_empty() => Ok(Node::Break),
        "continue" if rest.is_empty() => Ok(Node::Continue),
        "if" => parse_if_then(rest, line),
        "import" | "exec" if !rest.is_empty() => Ok(Node::Call {
            name: word.to_owned(),
            args: vec![raw_argument(rest, line)],
        }),
        "File" if rest.starts_with('.') => parse_file_statement(&rest[1..], line),
        _ => parse_expression_statement(text, line),
    }
}

/// `File.op path [content]` or `File.op(args)`; `File.` is consumed.
fn parse_file_statement(text: &str, line: usize) -> PResult<Node> {
    let (name, rest) = split_first_word(text);
    if rest.starts_with('(') {
        return parse_expression_at(&format!("File.{text}"), line);
    }
    let op = FileOpKind::from_name(name)
        .ok_or_else(|| ParseError::new(line, 1, format!("unknown file operation '{name}'")))?;
    let (path, content) = match split_words(rest).first() {
        Some(first) => (*first, rest[first.len()..].trim()),
        None => return Err(ParseError::new(line, 1, format!("File.{name} needs a path"))),
    };
    let mut args = vec![word_node(path, line)];
    if !content.is_empty() {
        args.push(parse_expression_at(content, line).unwrap_or_else(|_| Node::string(content)));
    }
    file_node(op, args).map_err(|msg| ParseError::new(line, 1, msg))
}

fn parse_expression_statement(text: &str, line: usize) -> PResult<Node> {
    if let Some((lhs, op, rhs)) = split_assignment(text) {
        let target = parse_expression_at(lhs, line)?
            .into_target()
            .ok_or_else(|| ParseError::new(line, 1, format!("cannot assign to '{lhs}'")))?;
        let value = parse_expression_at(rhs, line)?;
        return Ok(Node::Assign { target, op, value: Box::new(value) });
    }
    if let Some(call) = shell_call_transform(text) {
        if let Ok(node) = parse_expression_at(&call, line) {
            return Ok(node);
        }
    }
    parse_expression_at(text, line)
}

/// Parse a directive body into a block, recovering line by line.
pub fn parse_program(src: &str) -> Program {
    parse_program_at(src, 1)
}

/// Like [`parse_program`], numbering lines from `first_line`.
pub fn parse_program_at(src: &str, first_line: usize) -> Program {
    let mut parser = StmtParser::new(src, first_line);
    let stmts = parser.parse_lines(0);
    Program { body: Node::Block(stmts), diagnostics: parser.diagnostics }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(src: &str) -> Node {
        parse_expression(src).unwrap_or_else(|e| panic!("{src}: {e}"))
    }

    fn program(src: &str) -> Vec<Node> {
        let p = parse_program(src);
        assert!(p.diagnostics.is_empty(), "diagnostics: {:?}", p.diagnostics);
        match p.body {
            Node::Block(stmts) => stmts,
            other => vec![other],
        }
    }

    fn assign(name: &str, value: Node) -> Node {
        Node::Assign { target: Target::Name(name.to_owned()), op: AssignOp::Set, value: Box::new(value) }
    }

    #[test]
    fn shell_transform_examples() {
        assert_eq!(shell_call_transform("add 5 3").as_deref(), Some("add(5, 3)"));
        assert_eq!(shell_call_transform("getValue").as_deref(), Some("getValue()"));
        assert_eq!(
            shell_call_transform("greet \"John Doe\" world").as_deref(),
            Some("greet(\"John Doe\", world)")
        );
        assert_eq!(shell_call_transform("123 invalid"), None);
        assert_eq!(shell_call_transform(""), None);
    }

    #[test]
    fn shell_transform_leaves_expressions_alone() {
        assert_eq!(shell_call_transform("x + 1"), None);
        assert_eq!(shell_call_transform("f(1)"), None);
        assert_eq!(shell_call_transform("a.b"), None);
        assert_eq!(shell_call_transform("true"), None);
    }

    #[test]
    fn multi_assignment() {
        let stmts = program("set x 10, y 20, z 30");
        assert_eq!(
            stmts,
            vec![Node::Block(vec![
                assign("x", Node::number(10.0)),
                assign("y", Node::number(20.0)),
                assign("z", Node::number(30.0)),
            ])]
        );
    }

    #[test]
    fn assignment_value_heuristics() {
        let parts = split_assignments(r#"a "x, \"y\"", b = -2.5, c name, d [1, 2], e John Smith"#);
        let values: Vec<&str> = parts.iter().map(|(_, _, v)| v.as_str()).collect();
        assert_eq!(values, vec![r#""x, \"y\"""#, "-2.5", "name", "[1, 2]", "John Smith"]);
    }

    #[test]
    fn unparseable_value_falls_back_to_string() {
        assert_eq!(parse_set("who John Smith", 1), Ok(assign("who", Node::string("John Smith"))));
    }

    #[test]
    fn set_with_equals_and_plus_equals() {
        assert_eq!(parse_set("x = 5", 1), Ok(assign("x", Node::number(5.0))));
        assert_eq!(
            parse_set("n += 1", 1),
            Ok(Node::Assign {
                target: Target::Name("n".into()),
                op: AssignOp::Add,
                value: Box::new(Node::number(1.0)),
            })
        );
    }

    #[test]
    fn precedence() {
        assert_eq!(
            expr("1 + 2 * 3"),
            Node::Binary {
                op: BinOp::Add,
                lhs: Box::new(Node::number(1.0)),
                rhs: Box::new(Node::Binary {
                    op: BinOp::Mul,
                    lhs: Box::new(Node::number(2.0)),
                    rhs: Box::new(Node::number(3.0)),
                }),
            }
        );
        assert!(matches!(expr("a || b && c"), Node::Binary { op: BinOp::Or, .. }));
        assert!(matches!(expr("a < b == c"), Node::Binary { op: BinOp::Eq, .. }));
        assert!(matches!(expr("-x * 2"), Node::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn object_literal_keeps_order() {
        assert_eq!(
            expr(r#"{name: "John", age: 30}"#),
            Node::Object(vec![
                ("name".to_owned(), Node::string("John")),
                ("age".to_owned(), Node::number(30.0)),
            ])
        );
    }

    #[test]
    fn nested_literals_and_access() {
        let n = expr(r#"{user: {tags: ["a", [1, 2]]}}.user.tags[1]"#);
        assert!(matches!(n, Node::Index { .. }));
        assert!(matches!(expr("a.b.c"), Node::Property { ref key, .. } if key == "c"));
        assert!(matches!(expr("s.upper()"), Node::MethodCall { ref method, .. } if method == "upper"));
    }

    #[test]
    fn string_escapes_resolved_in_literals() {
        assert_eq!(expr(r#""a\nb""#), Node::string("a\nb"));
    }

    #[test]
    fn trailing_tokens_rejected() {
        assert!(parse_expression("1 2").is_err());
        assert!(parse_expression("").is_err());
        assert!(parse_expression("(1").is_err());
    }

    #[test]
    fn if_then() {
        let stmts = program("if x > 1 then print \"big\"");
        let Node::Conditional { branches, otherwise } = &stmts[0] else { panic!("{stmts:?}") };
        assert_eq!(branches.len(), 1);
        assert!(otherwise.is_none());
        assert!(matches!(branches[0].1.statements()[0], Node::Call { ref name, .. } if name == "print"));
    }

    #[test]
    fn if_without_then_is_skipped() {
        let p = parse_program("if x > 1 print 1\nset y 2");
        assert_eq!(p.diagnostics.len(), 1);
        assert_eq!(p.body.statements().len(), 1);
        assert!(matches!(p.body.statements()[0], Node::Assign { .. }));
    }

    #[test]
    fn block_if_elif_else() {
        let stmts = program("if x == 1\n    print \"one\"\nelif x == 2\n    print \"two\"\nelse\n    print \"many\"\nprint \"done\"");
        assert_eq!(stmts.len(), 2);
        let Node::Conditional { branches, otherwise } = &stmts[0] else { panic!() };
        assert_eq!(branches.len(), 2);
        assert!(otherwise.is_some());
    }

    #[test]
    fn for_over_flat_list() {
        let stmts = program("for i in 1 2 3\n  print i");
        let Node::ForIn { var, iterable, body } = &stmts[0] else { panic!() };
        assert_eq!(var, "i");
        assert_eq!(
            **iterable,
            Node::Array(vec![Node::number(1.0), Node::number(2.0), Node::number(3.0)])
        );
        assert_eq!(body.statements().len(), 1);
    }

    #[test]
    fn for_iterable_forms() {
        assert_eq!(parse_iterable("apple banana", 1).ok(), Some(Node::Array(vec![Node::string("apple"), Node::string("banana")])));
        assert!(matches!(parse_iterable("1 .. 5", 1), Ok(Node::Range { .. })));
        assert_eq!(parse_iterable("items", 1).ok(), Some(Node::ident("items")));
        assert!(matches!(parse_iterable("[1, 2]", 1), Ok(Node::Array(_))));
        assert!(parse_for_header("1 in x", 1).is_err());
    }

    #[test]
    fn print_wraps_expression() {
        assert_eq!(
            parse_simple("print \"a\" + b", 1),
            Ok(Node::Call {
                name: "print".into(),
                args: vec![Node::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(Node::string("a")),
                    rhs: Box::new(Node::ident("b")),
                }],
            })
        );
    }

    #[test]
    fn shell_style_statement() {
        assert_eq!(
            parse_simple("add 5 3", 1),
            Ok(Node::Call { name: "add".into(), args: vec![Node::number(5.0), Node::number(3.0)] })
        );
    }

    #[test]
    fn assignment_statements() {
        assert_eq!(parse_simple("x = 1 + 1", 1).ok().map(|n| matches!(n, Node::Assign { .. })), Some(true));
        assert!(matches!(
            parse_simple("p.name = \"x\"", 1),
            Ok(Node::Assign { target: Target::Property { .. }, .. })
        ));
        assert!(matches!(parse_simple("x == 1", 1), Ok(Node::Binary { op: BinOp::Eq, .. })));
    }

    #[test]
    fn function_and_class_definitions() {
        let stmts = program(
            "function add a b\n    return a + b\nclass Dog extends Animal\n    constructor name\n        self.name = name\n    private secret\n        return 1\n    speak\n        return self.name",
        );
        let Node::Function(f) = &stmts[0] else { panic!() };
        assert_eq!(f.params, vec!["a", "b"]);
        let Node::Class(c) = &stmts[1] else { panic!() };
        assert_eq!(c.parent.as_deref(), Some("Animal"));
        let names: Vec<(&str, bool)> = c.methods.iter().map(|m| (m.name.as_str(), m.private)).collect();
        assert_eq!(names, vec![("constructor", false), ("secret", true), ("speak", false)]);
    }

    #[test]
    fn file_operations() {
        assert!(matches!(
            parse_simple("File.read notes.txt", 1),
            Ok(Node::File { op: FileOpKind::Read, ref path, content: None }) if **path == Node::string("notes.txt")
        ));
        assert!(matches!(
            parse_simple("File.write \"out.txt\" \"hello\"", 1),
            Ok(Node::File { op: FileOpKind::Write, content: Some(_), .. })
        ));
        assert!(matches!(expr("File.exists(p)"), Node::File { op: FileOpKind::Exists, .. }));
        assert!(parse_simple("File.write out.txt", 1).is_err());
    }

    #[test]
    fn semicolons_separate_statements() {
        let stmts = program("set a 1; set b 2");
        assert_eq!(stmts[0].statements().len(), 2);
    }

    #[test]
    fn bad_line_recovers() {
        let p = parse_program("set x 1\n(((\nset y 2");
        assert_eq!(p.diagnostics.len(), 1);
        assert_eq!(p.diagnostics[0].line, 2);
        assert_eq!(p.body.statements().len(), 2);
    }

    #[test]
    fn import_and_exec_take_raw_text() {
        assert_eq!(
            parse_simple("exec ls -la", 1),
            Ok(Node::Call { name: "exec".into(), args: vec![Node::string("ls -la")] })
        );
        assert_eq!(
            parse_simple("import \"lib.md\"", 1),
            Ok(Node::Call { name: "import".into(), args: vec![Node::string("lib.md")] })
        );
    }

    fn wrapped(depth: usize, open: &str, close: &str) -> String {
        format!("{}1{}", open.repeat(depth), close.repeat(depth))
    }

    #[test]
    fn moderate_nesting_parses() {
        assert_eq!(expr(&wrapped(MAX_NESTING / 2, "(", ")")), Node::number(1.0));
        assert!(matches!(expr(&wrapped(MAX_NESTING / 2, "[", "]")), Node::Array(_)));
        assert!(matches!(expr(&format!("{}1", "-".repeat(MAX_NESTING / 2))), Node::Unary { .. }));
    }

    #[test]
    fn deep_nesting_is_a_parse_error() {
        for (open, close) in [("(", ")"), ("[", "]"), ("{a: ", "}")] {
            let err = parse_expression(&wrapped(5000, open, close)).unwrap_err();
            assert!(err.message.contains("nested too deeply"), "{open}: {err}");
        }
        assert!(parse_expression(&format!("{}1", "!".repeat(5000))).is_err());
    }

    #[test]
    fn deep_nesting_recovers_to_next_line() {
        let p = parse_program(&format!("while {}\nset y 2", wrapped(5000, "(", ")")));
        assert_eq!(p.diagnostics.len(), 1);
        assert!(p.diagnostics[0].message.contains("nested too deeply"));
        assert_eq!(p.body.statements().len(), 1);
    }
}
