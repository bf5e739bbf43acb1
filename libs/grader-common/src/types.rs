use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{GradeError, Result};

pub type SubmissionId = i64;
pub type AssignmentId = i64;

/// Languages with a known isolated runtime.
/// The set is closed: anything else is rejected before touching the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    #[serde(rename = "c#")]
    CSharp,
    JavaScript,
}

/// Static runtime mapping for one language
#[derive(Debug)]
pub struct LanguageSpec {
    pub language: Language,
    /// Canonical tag as stored on assignments
    pub tag: &'static str,
    pub aliases: &'static [&'static str],
    /// Staged file extension, without the dot
    pub extension: &'static str,
    /// Suffix of the runtime image name
    pub image_slug: &'static str,
}

static LANGUAGE_TABLE: [LanguageSpec; 4] = [
    LanguageSpec {
        language: Language::Python,
        tag: "python",
        aliases: &["py"],
        extension: "py",
        image_slug: "python",
    },
    LanguageSpec {
        language: Language::Java,
        tag: "java",
        aliases: &[],
        extension: "java",
        image_slug: "java",
    },
    LanguageSpec {
        language: Language::CSharp,
        tag: "c#",
        aliases: &["csharp", "cs"],
        extension: "cs",
        image_slug: "csharp",
    },
    LanguageSpec {
        language: Language::JavaScript,
        tag: "javascript",
        aliases: &["js"],
        extension: "js",
        image_slug: "javascript",
    },
];

impl Language {
    /// Returns all language variants in table order
    pub fn all_variants() -> &'static [Language] {
        &[
            Language::Python,
            Language::Java,
            Language::CSharp,
            Language::JavaScript,
        ]
    }

    /// Resolve an assignment's language tag (case-insensitive)
    pub fn from_tag(tag: &str) -> Result<Language> {
        let wanted = tag.trim().to_lowercase();
        LANGUAGE_TABLE
            .iter()
            .find(|spec| spec.tag == wanted || spec.aliases.contains(&wanted.as_str()))
            .map(|spec| spec.language)
            .ok_or_else(|| GradeError::UnsupportedLanguage(tag.to_string()))
    }

    pub fn spec(&self) -> &'static LanguageSpec {
        // every variant has exactly one row
        match self {
            Language::Python => &LANGUAGE_TABLE[0],
            Language::Java => &LANGUAGE_TABLE[1],
            Language::CSharp => &LANGUAGE_TABLE[2],
            Language::JavaScript => &LANGUAGE_TABLE[3],
        }
    }

    pub fn extension(&self) -> &'static str {
        self.spec().extension
    }

    pub fn image_slug(&self) -> &'static str {
        self.spec().image_slug
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().tag)
    }
}

/// Test Case Definition (Immutable Input)
/// Ordering matters - execution is sequential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    #[serde(alias = "Id")]
    pub id: u32,
    #[serde(alias = "Input")]
    pub input: String,
    #[serde(alias = "ExpectedOutput")]
    pub expected_output: String,
    /// Non-negative; penalty points are rejected at parse time
    #[serde(alias = "Points")]
    pub points: u32,
}

impl TestCase {
    /// Parse a serialized test case collection
    pub fn parse_collection(raw: &str) -> Result<Vec<TestCase>> {
        serde_json::from_str(raw).map_err(|e| GradeError::MalformedTestSpec(e.to_string()))
    }

    pub fn encode_collection(test_cases: &[TestCase]) -> String {
        // plain structs of strings and integers always serialize
        serde_json::to_string(test_cases).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Graded task definition, read-only to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub title: String,
    /// Free-form tag, resolved through the language table at evaluation time
    pub programming_language: String,
    pub due_at: DateTime<Utc>,
    pub max_score: u32,
    /// Serialized test case collection, parsed lazily
    pub test_cases: String,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Assignment {
    pub fn parse_test_cases(&self) -> Result<Vec<TestCase>> {
        TestCase::parse_collection(&self.test_cases)
    }
}

/// Submission State Machine
/// Pending → Running → {Completed, Error}; terminal states never move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Error)
    }

    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        matches!(
            (self, next),
            (SubmissionStatus::Pending, SubmissionStatus::Running)
                | (SubmissionStatus::Running, SubmissionStatus::Completed)
                | (SubmissionStatus::Running, SubmissionStatus::Error)
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Per-Test Status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    Failed,
    ExecutionError,
}

/// Per-Test Result, persisted on the submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: u32,
    pub status: TestStatus,
    pub points_awarded: u32,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
}

/// Raw outcome of one sandbox run. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    /// exit code == 0
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// None when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub execution_time_ms: u64,
}

/// Aggregated grading result of one submission
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutcome {
    pub score: u32,
    pub feedback: String,
    pub results: Vec<TestResult>,
    /// An unsuccessful execution stopped the run early
    pub short_circuited: bool,
}

/// One learner attempt at an assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub assignment_id: AssignmentId,
    pub user_id: String,
    pub source_code: String,
    pub submitted_at: DateTime<Utc>,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_results: Option<Vec<TestResult>>,
}

impl Submission {
    /// A freshly created submission awaiting evaluation
    pub fn new(
        id: SubmissionId,
        assignment_id: AssignmentId,
        user_id: impl Into<String>,
        source_code: impl Into<String>,
    ) -> Self {
        Self {
            id,
            assignment_id,
            user_id: user_id.into(),
            source_code: source_code.into(),
            submitted_at: Utc::now(),
            status: SubmissionStatus::Pending,
            score: 0,
            feedback: String::new(),
            test_results: None,
        }
    }

    fn transition(&mut self, next: SubmissionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(GradeError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn begin_evaluation(&mut self) -> Result<()> {
        self.transition(SubmissionStatus::Running)
    }

    pub fn complete(&mut self, outcome: EvaluationOutcome) -> Result<()> {
        self.transition(SubmissionStatus::Completed)?;
        self.score = outcome.score;
        self.feedback = outcome.feedback;
        self.test_results = Some(outcome.results);
        Ok(())
    }

    /// Error submissions carry one message and no partial score
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(SubmissionStatus::Error)?;
        self.score = 0;
        self.feedback = message.into();
        self.test_results = None;
        Ok(())
    }
}
