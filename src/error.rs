// SPDX-License-Identifier: GPL-3.0-or-later

//! Typed errors for the compiler and VM. See `SPEC_FULL.md` §7.

use std::fmt;

use thiserror::Error;

/// One compile-time diagnostic: `[line N] Error at 'tok': message` (or
/// `[line N] Error at end: message` at EOF, or `[line N] Error: message`
/// when the token itself is a lexer error and carries no useful lexeme).
#[derive(Debug, Clone)]
pub struct CompileError {
    pub line: u32,
    /// `at '<tok>'`, `at end`, or `None` for a lexer-error token.
    pub location: Option<String>,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = self.line;
        let message = &self.message;
        match &self.location {
            Some(location) => write!(f, "[line {line}] Error {location}: {message}"),
            None => write!(f, "[line {line}] Error: {message}"),
        }
    }
}

impl std::error::Error for CompileError {}

/// A runtime failure, carrying the stack trace captured at the moment it
/// was raised (innermost frame first) so the VM doesn't need to print
/// anything itself — the CLI decides how to report it. This is a
/// deliberate deviation from the reference, whose `runtime_error`
/// prints directly to stderr (see `SPEC_FULL.md` §7).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
    /// One entry per active frame, innermost first, formatted as
    /// `[line N] in <name>` or `[line N] in script`.
    pub trace: Vec<String>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError { message: message.into(), trace: Vec::new() }
    }
}

/// The result of compiling and running one top-level program: either it
/// ran to completion, or it failed to compile, or it raised an
/// unhandled runtime error. Maps directly onto the CLI's exit codes.
pub enum InterpretResult {
    Ok,
    CompileError(Vec<CompileError>),
    RuntimeError(RuntimeError),
}
