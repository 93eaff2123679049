//! Compile errors shared by every stage of the pipeline.
//!
//! Compilation is fail-fast: the first error aborts the run, so each variant
//! carries just enough to print one positioned diagnostic.

use std::path::PathBuf;

use inkwell::builder::BuilderError;
use thiserror::Error;

use crate::ast::Pos;
use crate::digits::DigitError;
use crate::types::Ty;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("{message} at {pos}")]
    Syntax { message: String, pos: Pos },
    #[error("{source} at {pos}")]
    Decode { source: DigitError, pos: Pos },
    #[error("{message} at {pos}")]
    Scope { message: String, pos: Pos },
    #[error("{message} at {pos}")]
    Type { message: String, pos: Pos },
    #[error("{message} at {pos}")]
    Call { message: String, pos: Pos },
    #[error("{message} at {pos}")]
    Structural { message: String, pos: Pos },
    /// A state the lowering engine or constructor should never reach.
    #[error("internal error: {message} at {pos}")]
    Internal { message: String, pos: Pos },
    #[error("llvm: {0}")]
    Toolchain(String),
    #[error("linking {exe:?} failed: {message}")]
    Link { exe: PathBuf, message: String },
    #[error("optimization level must be between 0 and 3, got {0}")]
    OptLevel(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CompileError {
    pub fn syntax(message: impl Into<String>, pos: Pos) -> Self {
        Self::Syntax { message: message.into(), pos }
    }

    pub fn scope(message: impl Into<String>, pos: Pos) -> Self {
        Self::Scope { message: message.into(), pos }
    }

    pub fn type_error(message: impl Into<String>, pos: Pos) -> Self {
        Self::Type { message: message.into(), pos }
    }

    /// Mismatch between the type an operation requires and the one it got.
    pub fn mismatch(expected: &Ty, found: &Ty, pos: Pos) -> Self {
        Self::type_error(format!("expected type `{expected}`, found `{found}`"), pos)
    }

    pub fn call(message: impl Into<String>, pos: Pos) -> Self {
        Self::Call { message: message.into(), pos }
    }

    pub fn structural(message: impl Into<String>, pos: Pos) -> Self {
        Self::Structural { message: message.into(), pos }
    }

    pub fn internal(message: impl Into<String>, pos: Pos) -> Self {
        Self::Internal { message: message.into(), pos }
    }

    pub fn toolchain(message: impl ToString) -> Self {
        Self::Toolchain(message.to_string())
    }

    /// Source position of the diagnostic, when the error has one.
    pub fn pos(&self) -> Option<Pos> {
        match self {
            CompileError::Syntax { pos, .. }
            | CompileError::Decode { pos, .. }
            | CompileError::Scope { pos, .. }
            | CompileError::Type { pos, .. }
            | CompileError::Call { pos, .. }
            | CompileError::Structural { pos, .. }
            | CompileError::Internal { pos, .. } => Some(*pos),
            _ => None,
        }
    }
}

impl From<BuilderError> for CompileError {
    fn from(err: BuilderError) -> Self {
        Self::toolchain(err)
    }
}
