//! Engine error types.
//!
//! The taxonomy separates *errors* (things that abort the current
//! request) from *control signals* (things that steer the cooperative
//! scheduler). `MORE`, "yield and come back with budget", is a success
//! value, not an error, so iterator operations return step enums
//! ([`Advance`], [`Membership`]) whose suspend variants carry no error
//! machinery. Only genuinely fatal or user-visible conditions live in
//! [`GraphError`].

use std::io;
use thiserror::Error;

/// Top-level engine error.
#[derive(Error, Debug)]
pub enum GraphError {
    /// I/O error from the store layer
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Request text or cursor format violation
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Semantically ill-formed request (conflicting linkages, missing endpoint, ...)
    #[error("semantics error: {0}")]
    Semantics(String),

    /// Cursor string malformed at the lexer level
    #[error("lexical error in cursor at byte {at}: {what}")]
    Lexical { at: usize, what: String },

    /// Cursor failed its account tag or refers to a vanished original
    #[error("bad cursor: {0}")]
    BadCursor(String),

    /// Soft timeout; the partial page carries a cursor to resume with
    #[error("request too hard; resume with the returned cursor")]
    TooHard,

    /// Sort key exceeds the current sort window
    #[error("value too large for the current sort window")]
    TooLarge,

    /// A single primitive exceeds the storage size limit
    #[error("primitive too large: {size} bytes (limit {limit})")]
    PrimitiveTooLarge { size: usize, limit: usize },

    /// Write target is not the newest generation of its lineage
    #[error("outdated: {0} is not the newest generation")]
    Outdated(String),

    /// Uniqueness check matched an existing primitive
    #[error("exists: {0}")]
    Exists(String),

    /// The worker does not want to be restarted
    #[error("worker requested no restart: {0}")]
    NoRestart(String),

    /// Primitive or guid not found in the store
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl GraphError {
    /// Category keyword used in user-visible `ERROR <CATEGORY> <text>` replies.
    pub fn category(&self) -> &'static str {
        match self {
            GraphError::Io(_) => "SYSTEM",
            GraphError::Syntax(_) => "SYNTAX",
            GraphError::Semantics(_) => "SEMANTICS",
            GraphError::Lexical { .. } => "LEXICAL",
            GraphError::BadCursor(_) => "BADCURSOR",
            GraphError::TooHard => "TOOHARD",
            GraphError::TooLarge => "TOOLARGE",
            GraphError::PrimitiveTooLarge { .. } => "TOOLARGE",
            GraphError::Outdated(_) => "OUTDATED",
            GraphError::Exists(_) => "EXISTS",
            GraphError::NoRestart(_) => "NORESTART",
            GraphError::NotFound(_) => "SEMANTICS",
            GraphError::Internal(_) => "SYSTEM",
        }
    }

    /// True for failures the caller may retry by resubmitting the
    /// returned cursor rather than the whole request.
    pub fn is_resumable(&self) -> bool {
        matches!(self, GraphError::TooHard)
    }
}

/// Result alias used throughout the engine.
pub type GraphResult<T> = Result<T, GraphError>;

/// Outcome of a producing step (`next`, `find`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Produced an id
    Id(crate::ident::Id),
    /// End of stream in the iterator's direction
    End,
    /// Budget exhausted; call again with fresh budget
    Suspend,
}

impl Advance {
    pub fn is_suspend(&self) -> bool {
        matches!(self, Advance::Suspend)
    }
}

/// Outcome of a membership test (`check`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Yes,
    No,
    /// Budget exhausted; call again with fresh budget
    Suspend,
}

/// Outcome of an incremental computation (`statistics`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Done,
    /// Budget exhausted; call again with fresh budget
    Suspend,
}
