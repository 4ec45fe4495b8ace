//! Error handling for the compilation pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompileError>;

/// A fatal compilation error. Once one of these is raised, the pipeline
/// stops; there is no partial output.
///
/// Register exhaustion is deliberately absent: running out of colors is
/// handled by spilling inside the allocator and never surfaces here.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("unknown variable '{0}'")]
    UnknownVariable(String),
    #[error("no function '{name}' taking {arity} arguments")]
    UnknownFunction { name: String, arity: usize },
    #[error("no function with entry block BB{0}")]
    UnknownEntry(usize),
    #[error("function '{0}' has no return")]
    MissingReturn(String),
    #[error("branch at instruction {seq} has no live target instruction")]
    MissingBranchTarget { seq: usize },
    #[error("instruction {seq}: division by zero in a constant expression")]
    DivisionByZero { seq: usize },
    #[error("instruction {seq}: {what}")]
    MalformedInstr { seq: usize, what: String },
    #[error("instruction {seq}: type violation: {what}")]
    TypeViolation { seq: usize, what: String },
}

impl CompileError {
    pub fn malformed(seq: usize, what: impl Into<String>) -> Self {
        Self::MalformedInstr {
            seq,
            what: what.into(),
        }
    }

    pub fn type_violation(seq: usize, what: impl Into<String>) -> Self {
        Self::TypeViolation {
            seq,
            what: what.into(),
        }
    }
}
