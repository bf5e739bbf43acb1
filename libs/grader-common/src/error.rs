//! Failure taxonomy of the evaluation engine.
//!
//! The `Display` text of every variant is what an `Error` submission shows
//! as its feedback, so keep the messages readable by a student.

use thiserror::Error;

use crate::types::{AssignmentId, SubmissionId, SubmissionStatus};

#[derive(Debug, Error)]
pub enum GradeError {
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The isolated runtime could not be launched or prepared
    #[error("Sandbox fault: {0}")]
    SandboxFault(String),

    #[error("Execution timed out after {timeout_ms}ms")]
    ExecutionTimeout { timeout_ms: u64 },

    #[error("Malformed test case specification: {0}")]
    MalformedTestSpec(String),

    #[error("Submission {0} not found")]
    SubmissionNotFound(SubmissionId),

    #[error("Assignment {0} not found")]
    AssignmentNotFound(AssignmentId),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Submission {0} is already scheduled or evaluated")]
    AlreadyScheduled(SubmissionId),

    #[error("Submission {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: SubmissionId,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error("Evaluation pool is shut down")]
    PoolClosed,
}

impl GradeError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GradeError::SubmissionNotFound(_) | GradeError::AssignmentNotFound(_)
        )
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            GradeError::UnsupportedLanguage(_) => "unsupported_language",
            GradeError::SandboxFault(_) => "sandbox_fault",
            GradeError::ExecutionTimeout { .. } => "execution_timeout",
            GradeError::MalformedTestSpec(_) => "malformed_test_spec",
            GradeError::SubmissionNotFound(_) | GradeError::AssignmentNotFound(_) => "not_found",
            GradeError::Persistence(_) => "persistence",
            GradeError::AlreadyScheduled(_) => "already_scheduled",
            GradeError::InvalidTransition { .. } => "invalid_transition",
            GradeError::PoolClosed => "pool_closed",
        }
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;
