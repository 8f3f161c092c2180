//! Replay macro language.
//!
//! Submodules:
//! - `token` -- tokenizer and the advisory safety check
//! - `interpreter` -- token-by-token execution with cooperative cancel

pub mod interpreter;
pub mod token;

pub use interpreter::{CancelToken, MacroInterpreter, MacroReport};
pub use token::{is_macro_safe, tokenize, MacroToken, Modifier, SpecialKey};
