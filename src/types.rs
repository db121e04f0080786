//! Core domain types for the classroom platform.
//!
//! Everything that crosses a boundary lives here: the submission record and
//! its status machine, evaluation results, instructor-authored task
//! templates, and the wire shape shared by inbound build requests and
//! outbound task dispatches.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum accepted brief size in bytes.
pub const MAX_BRIEF_SIZE: usize = 65_536;

/// Maximum number of named functional checks per task.
pub const MAX_CHECKS: usize = 32;

/// Default number of rounds a student works through a task.
pub const DEFAULT_MAX_ROUNDS: u32 = 2;

// ============================================================================
// SUBMISSION STATUS
// ============================================================================

/// Lifecycle of a submission. Transitions are one-directional:
/// received -> building -> deploying -> completed | failed.
/// `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Received,
    Building,
    Deploying,
    Completed,
    Failed,
}

#[derive(Debug, Error)]
#[error("invalid status transition from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SubmissionStatus,
    pub to: SubmissionStatus,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Building => "building",
            Self::Deploying => "deploying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "received" => Some(Self::Received),
            "building" => Some(Self::Building),
            "deploying" => Some(Self::Deploying),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the forward pipeline, used to reject backward moves.
    fn rank(&self) -> u8 {
        match self {
            Self::Received => 0,
            Self::Building => 1,
            Self::Deploying => 2,
            Self::Completed | Self::Failed => 3,
        }
    }

    /// Whether a transition to `next` is legal. Terminal states accept
    /// nothing; `failed` is reachable from any non-terminal state.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            Self::Failed => true,
            Self::Completed => *self == Self::Deploying,
            _ => next.rank() == self.rank() + 1,
        }
    }

    pub fn check_transition(&self, next: SubmissionStatus) -> Result<(), InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SUBMISSIONS
// ============================================================================

/// File attachment referenced by a brief.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub url: String,
}

/// A student submission created from an accepted build request and mutated
/// only by the build pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub brief: String,
    pub checks: Vec<String>,
    pub evaluation_url: String,
    pub attachments: Vec<Attachment>,
    pub status: SubmissionStatus,
    pub repo_url: Option<String>,
    pub commit_sha: Option<String>,
    pub pages_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

// ============================================================================
// EVALUATIONS
// ============================================================================

/// Outcome of a single named functional check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

/// Immutable evaluation record, one per evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: String,
    pub submission_id: String,
    pub email: String,
    pub task: String,
    pub round: u32,
    pub repo_url: String,
    pub pages_url: String,
    pub license_ok: bool,
    pub readme_quality: f64,
    pub code_quality: f64,
    pub check_results: Vec<CheckResult>,
    pub overall_score: u32,
    pub passed: bool,
    pub feedback: String,
    pub evaluated_at: i64,
}

// ============================================================================
// TASK TEMPLATES
// ============================================================================

/// Instructor-authored task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub name: String,
    pub brief: String,
    pub checks: Vec<String>,
    /// Script text handed to the functional test harness.
    pub functional_tests: String,
    pub attachments: Vec<Attachment>,
    pub active: bool,
    pub created_at: i64,
}

// ============================================================================
// INSTRUCTOR CONFIG
// ============================================================================

/// Per-deployment instructor configuration, stored as a single row and
/// mutated via upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructorConfig {
    pub shared_secret: String,
    pub github_token: Option<String>,
    pub evaluation_base_url: String,
    pub max_rounds: u32,
}

impl Default for InstructorConfig {
    fn default() -> Self {
        Self {
            shared_secret: String::new(),
            github_token: None,
            evaluation_base_url: String::new(),
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

// ============================================================================
// SYSTEM LOGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Append-only diagnostic entry surfaced on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: i64,
    pub level: LogLevel,
    pub message: String,
    pub submission_id: Option<String>,
    pub email: Option<String>,
    pub task: Option<String>,
    pub created_at: i64,
}

// ============================================================================
// WIRE TYPES
// ============================================================================

/// Body of `POST /api/build`, and also the payload this platform sends when
/// dispatching a task to a student's build endpoint. One shape, both
/// directions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub email: String,
    pub secret: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub brief: String,
    pub checks: Vec<String>,
    pub evaluation_url: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Body of `POST /api/evaluate`, and the payload the build pipeline posts to
/// a submission's `evaluation_url` once the artifact is deployed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub email: String,
    pub secret: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}
