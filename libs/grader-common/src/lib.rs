pub mod config;
pub mod error;
pub mod keys;
pub mod types;

// Re-export commonly used types for convenience
pub use config::Config;
pub use error::{GradeError, Result};
pub use types::{
    Assignment, AssignmentId, EvaluationOutcome, ExecutionResult, Language, Submission,
    SubmissionId, SubmissionStatus, TestCase, TestResult, TestStatus,
};
