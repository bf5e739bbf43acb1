/// Store key layout shared by the worker and the external submission flow.
/// Both sides must agree on these, so they live here and nowhere else.

use crate::types::{AssignmentId, SubmissionId};

pub const QUEUE_KEY: &str = "grader:queue:evaluations";
pub const SUBMISSION_PREFIX: &str = "grader:submission";
pub const ASSIGNMENT_PREFIX: &str = "grader:assignment";

/// Key holding the JSON document of a submission
pub fn submission_key(id: SubmissionId) -> String {
    format!("{}:{}", SUBMISSION_PREFIX, id)
}

/// Key holding the JSON document of an assignment
pub fn assignment_key(id: AssignmentId) -> String {
    format!("{}:{}", ASSIGNMENT_PREFIX, id)
}
