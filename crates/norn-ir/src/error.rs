//! Lowering error types

use norn_ast::Span;
use std::fmt;

/// Classification of compile diagnostics produced by the lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LowerErrorKind {
    /// `with` statement in strict mode code
    StrictWith,
    /// `delete` applied to an unqualified identifier in strict mode code
    StrictDelete,
    /// Duplicate formal parameter names in strict mode code
    StrictDuplicateParam,
    /// `break` without an enclosing loop, switch or matching label
    UnresolvedBreak,
    /// `continue` without an enclosing loop or matching label
    UnresolvedContinue,
    /// `return` in global code
    ReturnOutsideFunction,
    /// The module ran out of 16-bit inline-cache ids
    CacheIdExhausted,
}

/// Errors produced during lowering.
#[derive(Debug, Clone)]
pub struct LowerError {
    pub kind: LowerErrorKind,
    pub message: String,
    pub span: Span,
}

impl LowerError {
    pub fn new(kind: LowerErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for LowerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Lower error: {}", self.message)
    }
}

impl std::error::Error for LowerError {}

pub type LowerResult<T> = Result<T, LowerError>;
