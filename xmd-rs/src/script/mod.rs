//! The XMD directive language.
//!
//! A document is Markdown with embedded directives:
//!
//! - `<!-- xmd:… -->` comments holding one or more statements
//! - inline `xmd:name(args)` calls inside prose
//! - `{{name}}` / `{{obj.key}}` references in plain text
//! - block markers (`if`/`elif`/`else`/`endif`, `for`/`endfor`,
//!   `while`/`endwhile`) spanning Markdown between them
//!
//! Rendering goes lexer → document parser → [`Interpreter`].  A directive
//! that fails leaves the rest of the document intact.
//!
//! # Quick start
//!
//! ```rust
//! use xmd::script::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! let out = interp.render("<!-- xmd:set x 6 -->\nx * 7 = xmd:str(x * 7)").unwrap();
//! assert_eq!(out.output, "x * 7 = 42");
//! ```

pub mod ast;
pub mod builtins;
pub mod document;
pub mod expr;
pub mod flow;
pub mod interp;
pub mod lexer;
pub mod parser;
pub mod scope;
pub mod token;
pub mod value;

// Re-exports for convenience.
pub use document::{parse_document, Document};
pub use interp::{Diagnostic, Interpreter, Rendered};
pub use parser::{parse_program, Program};
pub use value::{Value, Variable};
