//! Error types shared across the crate.

use thiserror::Error;

use crate::config::ConfigError;
use crate::module::ImportError;
use crate::process::ExecError;

/// A statement or expression that could not be parsed.  Parse errors are
/// recoverable: the program parser records them and moves to the next line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}, column {column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        ParseError { line, column, message: message.into() }
    }
}

/// Failure while evaluating a node.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("undefined function '{0}'")]
    UndefinedFunction(String),

    #[error("'{name}' expects {expected} argument(s), got {found}")]
    Arity { name: String, expected: usize, found: usize },

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch { op: String, left: &'static str, right: &'static str },

    #[error("{0}")]
    Type(String),

    #[error("cannot assign into {0}")]
    NotAssignable(&'static str),

    #[error("loop exceeded {0} iterations")]
    IterationLimit(usize),

    #[error("call depth exceeded {0}")]
    RecursionLimit(usize),

    #[error("'break' outside of a loop")]
    BreakOutsideLoop,

    #[error("'continue' outside of a loop")]
    ContinueOutsideLoop,

    #[error("{class} has no method '{method}'")]
    UnknownMethod { class: String, method: String },

    #[error("method '{method}' of {class} is private")]
    PrivateMethod { class: String, method: String },

    #[error("{op} {path}: {source}")]
    File {
        op: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("output exceeds {0} bytes")]
    OutputLimit(usize),
}

impl EvalError {
    /// Resource exhaustion: stops the whole render instead of one directive.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvalError::OutputLimit(_))
    }
}

/// Top-level error returned by the library entry points and the binary.
#[derive(Debug, Error)]
pub enum XmdError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Usage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages() {
        let e = EvalError::Arity { name: "add".into(), expected: 2, found: 1 };
        assert_eq!(e.to_string(), "'add' expects 2 argument(s), got 1");
        assert_eq!(ParseError::new(3, 5, "expected 'then'").to_string(), "line 3, column 5: expected 'then'");
    }

    #[test]
    fn only_output_limit_is_fatal() {
        assert!(EvalError::OutputLimit(10).is_fatal());
        assert!(!EvalError::IterationLimit(10).is_fatal());
        assert!(!EvalError::UndefinedFunction("f".into()).is_fatal());
    }
}
