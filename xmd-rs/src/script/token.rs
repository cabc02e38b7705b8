//! Tokens shared by the structural and expression lexers.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // ── Structural (document) tokens ──
    Heading,
    ListItem,
    CodeBlock,
    HtmlComment,
    /// `<!-- xmd:… -->`; text is the whole comment including delimiters.
    XmdDirective,
    /// Inline `xmd:name(args)`, or an XMD comment embedded in an expression.
    Directive,
    VariableRef,
    Text,

    // ── Expression tokens ──
    Identifier,
    Number,
    /// Quoted literal; text is the raw content between the quotes.
    String,
    Boolean,
    Operator,
    Punct,

    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based.
    pub line: usize,
    /// 1-based, in characters.
    pub column: usize,
    /// Byte range in the scanned source.
    pub span: Range<usize>,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        text: impl Into<String>,
        line: usize,
        column: usize,
        span: Range<usize>,
    ) -> Self {
        Token { kind, text: text.into(), line, column, span }
    }

    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.is(TokenKind::Operator, op)
    }

    pub fn is_punct(&self, p: &str) -> bool {
        self.is(TokenKind::Punct, p)
    }

    pub fn is_eof(&self) -> bool {
        self.kind == TokenKind::Eof
    }
}

// ── TokenChain ────────────────────────────────────────────────────────────────

/// Forward-only token sequence, owned and released as a unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenChain {
    tokens: Vec<Token>,
}

impl TokenChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, token: Token) {
        self.tokens.push(token);
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn first(&self) -> Option<&Token> {
        self.tokens.first()
    }

    pub fn last(&self) -> Option<&Token> {
        self.tokens.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Token> {
        self.tokens.iter()
    }

    pub fn as_slice(&self) -> &[Token] {
        &self.tokens
    }
}

impl FromIterator<Token> for TokenChain {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        TokenChain { tokens: iter.into_iter().collect() }
    }
}

impl IntoIterator for TokenChain {
    type Item = Token;
    type IntoIter = std::vec::IntoIter<Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.into_iter()
    }
}

impl<'a> IntoIterator for &'a TokenChain {
    type Item = &'a Token;
    type IntoIter = std::slice::Iter<'a, Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.tokens.iter()
    }
}
