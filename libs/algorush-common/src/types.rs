use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Languages with a compile/run strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Cpp,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Cpp => write!(f, "cpp"),
        }
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cpp" | "c++" => Ok(Language::Cpp),
            other => Err(format!("unsupported language: {}", other)),
        }
    }
}

/// One stdin/stdout pair. Both payloads are passed through byte-exact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestStatus {
    Passed,
    WrongAnswer,
    CompileError,
    RuntimeError,
    TimeLimitExceeded,
}

/// Per-test verdict. `passed` implies `error.is_none()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub input: String,
    pub expected_output: String,
    pub actual_output: String,
    pub passed: bool,
    pub hidden: bool,
    pub status: TestStatus,
    pub timed_out: bool,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradeStatus {
    Accepted,
    WrongAnswer,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The submission has no (or more than one) solution unit.
    Extraction,
    /// The problem template is malformed.
    Template,
    /// Nothing to grade.
    NoTestCases,
}

/// Why a grading run produced no per-test results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Submission-level verdict handed back to the caller for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeSummary {
    pub results: Vec<TestResult>,
    pub passed_count: usize,
    pub total_count: usize,
    pub avg_elapsed_ms: u64,
    pub status: GradeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<GradeFailure>,
}

impl GradeSummary {
    /// Summary for a run that was aborted before any test executed.
    pub fn failed(kind: FailureKind, message: impl Into<String>, total_count: usize) -> Self {
        Self {
            results: Vec::new(),
            passed_count: 0,
            total_count,
            avg_elapsed_ms: 0,
            status: GradeStatus::Error,
            error: Some(GradeFailure {
                kind,
                message: message.into(),
            }),
        }
    }

    /// Copy with hidden test results removed, for untrusted callers.
    /// Counts and status still reflect every test.
    pub fn visible(&self) -> Self {
        Self {
            results: self.results.iter().filter(|r| !r.hidden).cloned().collect(),
            ..self.clone()
        }
    }
}

/// A grading request as produced by the submission-handling layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default = "default_language")]
    pub language: Language,
    /// Complete reference program containing exactly one solution unit.
    pub template: String,
    /// User code containing exactly one solution unit.
    pub submission: String,
    pub test_cases: Vec<TestCase>,
}

fn default_language() -> Language {
    Language::Cpp
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeResponse {
    pub id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<GradeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl GradeResponse {
    pub fn graded(id: Uuid, summary: GradeSummary) -> Self {
        Self {
            id,
            summary: Some(summary),
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn errored(id: Uuid, error: impl Into<String>) -> Self {
        Self {
            id,
            summary: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }
}
