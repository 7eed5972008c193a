//! Sandboxed event scripts
//!
//! Scripts are parsed into a whitelisted syntax tree before anything runs, so
//! a rejected script never executes a single statement. See [`parser`] for the
//! accepted grammar.

mod ast;
mod error;
mod interpreter;
mod lexer;
mod parser;

pub use ast::{Builtin, Program};
pub use error::{ForbiddenConstruct, ScriptError};
pub use interpreter::{execute, Environment, ScriptHost, Value};
pub use parser::{parse, MAX_NESTING};

/// Validates `source` without running it.
pub fn validate(source: &str) -> Result<(), ScriptError> {
    parse(source).map(drop)
}

/// Parses and executes `source` in one step.
pub fn run(
    source: &str,
    env: &mut Environment,
    host: &mut dyn ScriptHost,
) -> Result<(), ScriptError> {
    let program = parse(source)?;
    execute(&program, env, host)
}
