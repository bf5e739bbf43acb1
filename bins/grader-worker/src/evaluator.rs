/// Test Case Runner - Scoring Logic
///
/// **Core Responsibility:**
/// Run a submission once per test case through a `SandboxEngine` and turn the
/// raw outputs into a score and feedback.
///
/// **Scoring Rules:**
/// - Test cases run sequentially, in stored order
/// - Trimmed stdout must equal trimmed expected output exactly
/// - score = sum of points of passed test cases
/// - The first unsuccessful execution short-circuits: score 0, later tests never run
///
/// Knows nothing about Docker, staging or the store.

use grader_common::{
    Assignment, EvaluationOutcome, ExecutionResult, GradeError, Language, Result, Submission,
    TestCase, TestResult, TestStatus,
};
use std::fmt::Write;
use tracing::{debug, info, warn};

use crate::engine::SandboxEngine;

/// Extremity whitespace is ignored; internal whitespace and case are not
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    actual.trim() == expected.trim()
}

/// Evaluate a submission against its assignment's test cases
pub async fn evaluate<E: SandboxEngine + ?Sized>(
    submission: &Submission,
    assignment: &Assignment,
    engine: &E,
    timeout_ms: u64,
) -> Result<EvaluationOutcome> {
    let test_cases = assignment.parse_test_cases()?;
    // rejects unknown tags before anything is launched
    let language = Language::from_tag(&assignment.programming_language)?;

    // score never exceeds this total, so it cannot overflow once this passes
    let total_points = test_cases
        .iter()
        .try_fold(0u32, |total, tc| total.checked_add(tc.points))
        .ok_or_else(|| {
            GradeError::MalformedTestSpec("test case points exceed the score range".to_string())
        })?;
    if total_points != assignment.max_score {
        warn!(
            assignment_id = assignment.id,
            total_points,
            max_score = assignment.max_score,
            "Test case points do not add up to the assignment's max score"
        );
    }

    info!(
        submission_id = submission.id,
        language = %language,
        test_count = test_cases.len(),
        "Evaluating submission"
    );

    let mut score = 0u32;
    let mut feedback = String::new();
    let mut results = Vec::with_capacity(test_cases.len());

    for test_case in &test_cases {
        let output = engine
            .execute(
                &submission.source_code,
                &assignment.programming_language,
                &test_case.input,
                timeout_ms,
            )
            .await?;

        if !output.success {
            warn!(
                submission_id = submission.id,
                test_id = test_case.id,
                exit_code = ?output.exit_code,
                "Execution failed; skipping remaining test cases"
            );
            let feedback = execution_error_feedback(test_case, &output);
            results.push(test_result(test_case, TestStatus::ExecutionError, 0, output));
            return Ok(EvaluationOutcome {
                score: 0,
                feedback,
                results,
                short_circuited: true,
            });
        }

        if outputs_match(&output.stdout, &test_case.expected_output) {
            score += test_case.points;
            let _ = writeln!(feedback, "Test case {}: Passed (+{} points)", test_case.id, test_case.points);
            debug!(test_id = test_case.id, execution_time_ms = output.execution_time_ms, "Output matched");
            results.push(test_result(test_case, TestStatus::Passed, test_case.points, output));
        } else {
            let _ = writeln!(feedback, "Test case {}: Failed", test_case.id);
            let _ = writeln!(feedback, "Expected: {}", test_case.expected_output.trim());
            let _ = writeln!(feedback, "Got: {}", output.stdout.trim());
            debug!(test_id = test_case.id, execution_time_ms = output.execution_time_ms, "Output mismatch");
            results.push(test_result(test_case, TestStatus::Failed, 0, output));
        }
    }

    info!(submission_id = submission.id, score, max_score = assignment.max_score, "Evaluation complete");

    Ok(EvaluationOutcome {
        score,
        feedback,
        results,
        short_circuited: false,
    })
}

fn execution_error_feedback(test_case: &TestCase, output: &ExecutionResult) -> String {
    let exit = match output.exit_code {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    };
    format!(
        "Execution error on test case {} ({}): {}",
        test_case.id,
        exit,
        output.stderr.trim()
    )
}

fn test_result(test_case: &TestCase, status: TestStatus, points: u32, output: ExecutionResult) -> TestResult {
    TestResult {
        test_id: test_case.id,
        status,
        points_awarded: points,
        stdout: output.stdout,
        stderr: output.stderr,
        execution_time_ms: output.execution_time_ms,
    }
}
