//! `{{…}}` substitution in literal document text.
//!
//! A reference is `{{` + a body without braces + `}}`.  A body that is a name
//! or dotted path is looked up; any other body is handed to the caller's
//! resolver (the interpreter evaluates it as an expression).  References
//! that do not resolve, and anything that is not a well-formed reference,
//! are left exactly as written.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Where substitution looks names up.  `path` may be dotted
/// (`user.name`, `items.0`).
pub trait VariableSource {
    fn lookup(&self, path: &str) -> Option<String>;
}

impl VariableSource for HashMap<String, String> {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

fn reference_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{([^{}]*)\}\}").ok()).as_ref()
}

/// True for `name` and dotted paths like `user.name` or `items.0`.
pub fn is_path(body: &str) -> bool {
    let mut segments = body.split('.');
    let head = segments.next().unwrap_or_default();
    let word = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_');
    word(head)
        && !head.as_bytes()[0].is_ascii_digit()
        && segments.all(word)
}

/// Replace every reference whose trimmed body `resolve` renders.
/// Borrows when nothing changes.
pub fn substitute_with<'t>(
    text: &'t str,
    mut resolve: impl FnMut(&str) -> Option<String>,
) -> Cow<'t, str> {
    match reference_re() {
        Some(re) if text.contains("{{") => re.replace_all(text, |caps: &Captures<'_>| {
            resolve(caps[1].trim()).unwrap_or_else(|| caps[0].to_owned())
        }),
        _ => Cow::Borrowed(text),
    }
}

/// Replace every defined path reference in `text`.
pub fn substitute<'t>(text: &'t str, vars: &impl VariableSource) -> Cow<'t, str> {
    substitute_with(text, |body| if is_path(body) { vars.lookup(body) } else { None })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn replaces_defined_names() {
        let v = vars(&[("name", "World"), ("user.name", "Ann")]);
        assert_eq!(substitute("Hello {{name}}!", &v), "Hello World!");
        assert_eq!(substitute("{{ user.name }}", &v), "Ann");
    }

    #[test]
    fn leaves_undefined_and_malformed() {
        let v = vars(&[("a", "1")]);
        assert_eq!(substitute("{{missing}} {{a}}", &v), "{{missing}} 1");
        assert_eq!(substitute("{{a", &v), "{{a");
        assert_eq!(substitute("{{1bad}}", &v), "{{1bad}}");
    }

    #[test]
    fn expressions_go_to_the_resolver() {
        let out = substitute_with("{{ a + 1 }} {{b}} {{}}", |body| match body {
            "a + 1" => Some("3".to_owned()),
            _ => None,
        });
        assert_eq!(out, "3 {{b}} {{}}");
        // Plain substitution never evaluates.
        assert_eq!(substitute("{{a + 1}}", &vars(&[("a", "2")])), "{{a + 1}}");
    }

    #[test]
    fn path_shapes() {
        assert!(is_path("name"));
        assert!(is_path("user.name"));
        assert!(is_path("items.0"));
        assert!(!is_path("0items"));
        assert!(!is_path("a + 1"));
        assert!(!is_path("upper(name)"));
        assert!(!is_path("a."));
        assert!(!is_path(""));
    }

    #[test]
    fn borrows_plain_text() {
        let v = vars(&[]);
        assert!(matches!(substitute("no refs here", &v), Cow::Borrowed(_)));
    }
}
