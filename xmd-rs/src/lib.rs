//! XMD: Markdown with embedded directives.
//!
//! [`script`] holds the language (lexer, parser, evaluator); the modules
//! beside it are the collaborators the evaluator is wired to.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod module;
pub mod platform;
pub mod process;
pub mod script;
pub mod template;

pub use config::Config;
pub use error::{EvalError, ParseError, XmdError};
pub use script::{Diagnostic, Interpreter, Rendered, Value};

/// Render `src` with the default configuration.
pub fn render(src: &str) -> Result<Rendered, XmdError> {
    Interpreter::new().render(src)
}
