//! Fakes for the store and the sandbox, used by the unit tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use grader_common::{
    Assignment, AssignmentId, ExecutionResult, GradeError, Result, Submission, SubmissionId,
    SubmissionStatus, TestCase,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::RwLock;

use crate::engine::SandboxEngine;
use crate::runtime::{Invocation, IsolatedRuntime};
use crate::store::SubmissionStore;

/// Assignment with max score equal to the sum of the given points
pub fn assignment(language: &str, test_cases: &[TestCase]) -> Assignment {
    Assignment {
        id: 1,
        title: "Greeting".to_string(),
        programming_language: language.to_string(),
        due_at: Utc::now() + ChronoDuration::days(7),
        max_score: test_cases
            .iter()
            .fold(0u32, |total, tc| total.saturating_add(tc.points)),
        test_cases: TestCase::encode_collection(test_cases),
        is_active: true,
    }
}

pub fn prints(stdout: &str) -> Result<ExecutionResult> {
    Ok(ExecutionResult {
        success: true,
        stdout: stdout.to_string(),
        stderr: String::new(),
        exit_code: Some(0),
        execution_time_ms: 3,
    })
}

pub fn fails(exit_code: i32, stderr: &str) -> Result<ExecutionResult> {
    Ok(ExecutionResult {
        success: false,
        stdout: String::new(),
        stderr: stderr.to_string(),
        exit_code: Some(exit_code),
        execution_time_ms: 3,
    })
}

/// Engine replaying a fixed script of results, one per call
pub struct ScriptedEngine {
    script: Mutex<VecDeque<Result<ExecutionResult>>>,
    inputs: Mutex<Vec<String>>,
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Result<ExecutionResult>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            inputs: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxEngine for ScriptedEngine {
    async fn execute(
        &self,
        _source_code: &str,
        _language: &str,
        input: &str,
        _timeout_ms: u64,
    ) -> Result<ExecutionResult> {
        self.inputs.lock().unwrap().push(input.to_string());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        self.active.fetch_sub(1, Ordering::SeqCst);
        next.unwrap_or_else(|| Err(GradeError::SandboxFault("script exhausted".to_string())))
    }
}

/// Runs the staged file with `sh`, whatever the language
pub struct ShellRuntime {
    program: String,
}

impl ShellRuntime {
    pub fn with_program(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }
}

impl Default for ShellRuntime {
    fn default() -> Self {
        Self::with_program("sh")
    }
}

#[async_trait]
impl IsolatedRuntime for ShellRuntime {
    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg(&invocation.staged_path);
        cmd
    }
}

/// In-memory store recording every saved status
#[derive(Default)]
pub struct MemoryStore {
    submissions: RwLock<HashMap<SubmissionId, Submission>>,
    assignments: RwLock<HashMap<AssignmentId, Assignment>>,
    history: RwLock<HashMap<SubmissionId, Vec<SubmissionStatus>>>,
    saves: AtomicUsize,
    failing_save: AtomicUsize,
}

impl MemoryStore {
    pub async fn insert_submission(&self, submission: Submission) {
        self.submissions.write().await.insert(submission.id, submission);
    }

    pub async fn insert_assignment(&self, assignment: Assignment) {
        self.assignments.write().await.insert(assignment.id, assignment);
    }

    /// Change a stored status behind the engine's back
    pub async fn set_status(&self, id: SubmissionId, status: SubmissionStatus) {
        if let Some(stored) = self.submissions.write().await.get_mut(&id) {
            stored.status = status;
        }
    }

    pub async fn remove_submission(&self, id: SubmissionId) {
        self.submissions.write().await.remove(&id);
    }

    pub async fn remove_assignment(&self, id: AssignmentId) {
        self.assignments.write().await.remove(&id);
    }

    pub async fn submission(&self, id: SubmissionId) -> Option<Submission> {
        self.submissions.read().await.get(&id).cloned()
    }

    pub async fn saved_statuses(&self, id: SubmissionId) -> Vec<SubmissionStatus> {
        self.history.read().await.get(&id).cloned().unwrap_or_default()
    }

    /// Make the n-th save (1-based) fail with a persistence error
    pub async fn fail_save_number(&self, n: usize) {
        self.failing_save.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn get_submission(&self, id: SubmissionId) -> Result<Submission> {
        self.submission(id).await.ok_or(GradeError::SubmissionNotFound(id))
    }

    async fn get_assignment(&self, id: AssignmentId) -> Result<Assignment> {
        self.assignments
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(GradeError::AssignmentNotFound(id))
    }

    async fn update_submission(&self, submission: &Submission) -> Result<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.failing_save.load(Ordering::SeqCst) {
            return Err(GradeError::Persistence("connection reset".to_string()));
        }
        match self.submissions.write().await.get_mut(&submission.id) {
            Some(stored) => *stored = submission.clone(),
            None => return Err(GradeError::SubmissionNotFound(submission.id)),
        }
        self.history
            .write()
            .await
            .entry(submission.id)
            .or_default()
            .push(submission.status);
        Ok(())
    }
}
