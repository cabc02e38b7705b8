use std::collections::HashMap;

use proptest::prelude::*;
use xmd::platform::DeniedFs;
use xmd::process::NoRunner;
use xmd::script::lexer::Lexer;
use xmd::script::parser::{parse_expression, parse_program};
use xmd::script::token::{Token, TokenChain, TokenKind};
use xmd::script::{parse_document, Interpreter, Value};
use xmd::template::substitute;

fn sealed() -> Interpreter {
    Interpreter::new().with_filesystem(DeniedFs).with_runner(NoRunner)
}

proptest! {
    /// The structural lexer terminates on any input and always ends with EOF.
    #[test]
    fn lexer_does_not_panic(s in "\\PC*") {
        let chain = Lexer::tokenize(&s);
        prop_assert!(chain.iter().last().is_some_and(|t| t.is_eof()));
    }

    /// A well-formed directive comment lexes as one token carrying the
    /// comment verbatim, delimiters included.
    #[test]
    fn directive_comment_is_one_token(body in "[a-zA-Z0-9 _=+*/(),.:;\"'{}\\[\\]\n]{0,80}") {
        let src = format!("<!-- xmd:{body} -->");
        let chain = Lexer::tokenize(&src);
        prop_assert_eq!(chain.len(), 2);
        let tok = &chain.as_slice()[0];
        prop_assert_eq!(tok.kind, TokenKind::XmdDirective);
        prop_assert_eq!(&tok.text, &src);
    }

    /// Appending to a chain adds exactly one token.
    #[test]
    fn append_adds_one(texts in proptest::collection::vec("[a-z]{1,8}", 0..20), extra in "[a-z]{1,8}") {
        let mut chain = TokenChain::new();
        for t in &texts {
            chain.append(Token::new(TokenKind::Text, t.as_str(), 1, 1, 0..t.len()));
        }
        let before = chain.len();
        chain.append(Token::new(TokenKind::Text, extra.as_str(), 1, 1, 0..extra.len()));
        prop_assert_eq!(chain.len(), before + 1);
        prop_assert_eq!(before, texts.len());
        prop_assert_eq!(chain.last().map(|t| t.text.as_str()), Some(extra.as_str()));
    }

    /// Parsers return diagnostics, never panic.
    #[test]
    fn parsers_do_not_panic(s in "\\PC*") {
        let _ = parse_expression(&s);
        let _ = parse_program(&s);
        let _ = parse_document(&s, true);
    }

    /// Rendering arbitrary input completes with output or an error.
    #[test]
    fn render_does_not_panic(s in "\\PC*") {
        let _ = sealed().render(&s);
    }

    /// Prose without any directive syntax renders unchanged.
    #[test]
    fn plain_text_is_unchanged(s in "[a-zA-Z0-9 .,!?#*+\\-\n]{0,200}") {
        let r = sealed().render(&s).unwrap();
        prop_assert_eq!(r.output, s);
        prop_assert!(r.diagnostics.is_empty());
    }

    /// Undefined references survive substitution untouched.
    #[test]
    fn undefined_references_survive(name in "[a-z_][a-z0-9_]{0,10}") {
        let text = format!("before {{{{{name}}}}} after");
        let vars: HashMap<String, String> = HashMap::new();
        prop_assert_eq!(substitute(&text, &vars).into_owned(), text);
    }

    /// Integer arithmetic agrees with Rust's.
    #[test]
    fn arithmetic_matches(a in -1000i32..1000, b in -1000i32..1000) {
        let mut interp = sealed();
        let v = interp.exec_script(&format!("return ({a}) + ({b}) * 2")).unwrap();
        prop_assert_eq!(v, Value::Number(f64::from(a + b * 2)));
    }

    /// A range loop visits every integer between its bounds exactly once.
    #[test]
    fn range_loop_counts(a in -50i32..50, b in -50i32..50) {
        let mut interp = sealed();
        let v = interp
            .exec_script(&format!("set n 0\nfor i in {a} .. {b}\n  n += 1\nreturn n"))
            .unwrap();
        prop_assert_eq!(v, Value::Number(f64::from((a - b).abs() + 1)));
    }

    /// `set` multi-assignment binds every pair.
    #[test]
    fn multi_assignment_binds_all(values in proptest::collection::vec(0u16..1000, 1..6)) {
        let src = values
            .iter()
            .enumerate()
            .map(|(i, v)| format!("v{i} {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut interp = sealed();
        interp.exec_script(&format!("set {src}")).unwrap();
        for (i, v) in values.iter().enumerate() {
            prop_assert_eq!(interp.get_global_var(&format!("v{i}")), Some(Value::Number(f64::from(*v))));
        }
    }
}
