//! Embedded SQLite storage for the platform.
//!
//! Single-node deployments run on a local SQLite file; tests run in memory.
//! The storage layer owns the two persistence invariants the workflows rely
//! on: status transitions are one-directional (enforced in
//! [`Storage::update_status`]) and evaluations are insert-only.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::types::{
    Attachment, CheckResult, Evaluation, InstructorConfig, LogEntry, LogLevel, Submission,
    SubmissionStatus, TaskTemplate,
};

const SCHEMA: &str = r#"
-- Student submissions, one row per accepted build request
CREATE TABLE IF NOT EXISTS submissions (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL,
    task TEXT NOT NULL,
    round INTEGER NOT NULL,
    nonce TEXT NOT NULL,
    brief TEXT NOT NULL,
    checks TEXT NOT NULL,
    evaluation_url TEXT NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL DEFAULT 'received',
    repo_url TEXT,
    commit_sha TEXT,
    pages_url TEXT,
    error_message TEXT,
    created_at INTEGER NOT NULL,
    completed_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_submissions_email ON submissions(email);
CREATE INDEX IF NOT EXISTS idx_submissions_task ON submissions(task);
CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status);
CREATE INDEX IF NOT EXISTS idx_submissions_email_task ON submissions(email, task);

-- Evaluation results (insert-only)
CREATE TABLE IF NOT EXISTS evaluations (
    id TEXT PRIMARY KEY,
    submission_id TEXT NOT NULL,
    email TEXT NOT NULL,
    task TEXT NOT NULL,
    round INTEGER NOT NULL,
    repo_url TEXT NOT NULL,
    pages_url TEXT NOT NULL,
    license_ok INTEGER NOT NULL,
    readme_quality REAL NOT NULL,
    code_quality REAL NOT NULL,
    check_results TEXT NOT NULL,
    overall_score INTEGER NOT NULL,
    passed INTEGER NOT NULL,
    feedback TEXT NOT NULL,
    evaluated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_evaluations_submission ON evaluations(submission_id);
CREATE INDEX IF NOT EXISTS idx_evaluations_task ON evaluations(task);
CREATE INDEX IF NOT EXISTS idx_evaluations_email ON evaluations(email);

-- Instructor-authored task templates
CREATE TABLE IF NOT EXISTS task_templates (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    brief TEXT NOT NULL,
    checks TEXT NOT NULL,
    functional_tests TEXT NOT NULL,
    attachments TEXT NOT NULL DEFAULT '[]',
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_templates_active ON task_templates(active);

-- Single-row instructor configuration
CREATE TABLE IF NOT EXISTS instructor_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    shared_secret TEXT NOT NULL,
    github_token TEXT,
    evaluation_base_url TEXT NOT NULL,
    max_rounds INTEGER NOT NULL
);

-- Append-only diagnostics
CREATE TABLE IF NOT EXISTS system_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    submission_id TEXT,
    email TEXT,
    task TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_created ON system_logs(created_at DESC);
"#;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("submission not found: {0}")]
    SubmissionNotFound(String),
    #[error("invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: SubmissionStatus,
        to: SubmissionStatus,
    },
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct Storage {
    conn: Arc<Mutex<Connection>>,
}

impl Storage {
    /// Open (or create) storage at the specified path.
    pub fn new(path: PathBuf) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(SCHEMA)?;
        info!("Storage initialized at {:?}", path);
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create in-memory storage (for testing).
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // ========================================================================
    // SUBMISSIONS
    // ========================================================================

    pub fn insert_submission(&self, sub: &Submission) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO submissions
             (id, email, task, round, nonce, brief, checks, evaluation_url, attachments,
              status, repo_url, commit_sha, pages_url, error_message, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                sub.id,
                sub.email,
                sub.task,
                sub.round,
                sub.nonce,
                sub.brief,
                serde_json::to_string(&sub.checks).unwrap_or_else(|_| "[]".into()),
                sub.evaluation_url,
                serde_json::to_string(&sub.attachments).unwrap_or_else(|_| "[]".into()),
                sub.status.as_str(),
                sub.repo_url,
                sub.commit_sha,
                sub.pages_url,
                sub.error_message,
                sub.created_at,
                sub.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_submission(&self, id: &str) -> Result<Option<Submission>, StorageError> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                &format!("{SELECT_SUBMISSION} WHERE id = ?1"),
                params![id],
                row_to_submission,
            )
            .optional()?;
        Ok(result)
    }

    /// Highest round recorded for `(email, task)`, if any.
    pub fn max_round(&self, email: &str, task: &str) -> Result<Option<u32>, StorageError> {
        let conn = self.conn.lock();
        let round: Option<u32> = conn.query_row(
            "SELECT MAX(round) FROM submissions WHERE email = ?1 AND task = ?2",
            params![email, task],
            |row| row.get(0),
        )?;
        Ok(round)
    }

    /// Look up the submission an evaluate notification refers to.
    pub fn find_submission(
        &self,
        email: &str,
        task: &str,
        round: u32,
        nonce: &str,
    ) -> Result<Option<Submission>, StorageError> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                &format!(
                    "{SELECT_SUBMISSION}
                     WHERE email = ?1 AND task = ?2 AND round = ?3 AND nonce = ?4"
                ),
                params![email, task, round, nonce],
                row_to_submission,
            )
            .optional()?;
        Ok(result)
    }

    pub fn submissions_by_email(&self, email: &str) -> Result<Vec<Submission>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_SUBMISSION} WHERE email = ?1 ORDER BY created_at DESC"
        ))?;
        let subs = stmt
            .query_map(params![email], row_to_submission)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    pub fn recent_submissions(&self, limit: u32) -> Result<Vec<Submission>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_SUBMISSION} ORDER BY created_at DESC LIMIT ?1"
        ))?;
        let subs = stmt
            .query_map(params![limit], row_to_submission)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(subs)
    }

    /// Move a submission to a new status, enforcing the one-directional
    /// transition rule. `error_message` is recorded on failure transitions.
    pub fn update_status(
        &self,
        id: &str,
        next: SubmissionStatus,
        error_message: Option<&str>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM submissions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let current = current
            .and_then(|s| SubmissionStatus::parse(&s))
            .ok_or_else(|| StorageError::SubmissionNotFound(id.to_string()))?;

        current
            .check_transition(next)
            .map_err(|e| StorageError::InvalidTransition {
                from: e.from,
                to: e.to,
            })?;

        conn.execute(
            "UPDATE submissions SET status = ?2, error_message = COALESCE(?3, error_message)
             WHERE id = ?1",
            params![id, next.as_str(), error_message],
        )?;
        Ok(())
    }

    /// Record build artifacts and mark the submission completed.
    pub fn complete_submission(
        &self,
        id: &str,
        repo_url: &str,
        commit_sha: &str,
        pages_url: &str,
        completed_at: i64,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM submissions WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;

        let current = current
            .and_then(|s| SubmissionStatus::parse(&s))
            .ok_or_else(|| StorageError::SubmissionNotFound(id.to_string()))?;

        current
            .check_transition(SubmissionStatus::Completed)
            .map_err(|e| StorageError::InvalidTransition {
                from: e.from,
                to: e.to,
            })?;

        conn.execute(
            "UPDATE submissions
             SET status = 'completed', repo_url = ?2, commit_sha = ?3, pages_url = ?4,
                 completed_at = ?5
             WHERE id = ?1",
            params![id, repo_url, commit_sha, pages_url, completed_at],
        )?;
        Ok(())
    }

    // ========================================================================
    // EVALUATIONS
    // ========================================================================

    pub fn insert_evaluation(&self, eval: &Evaluation) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO evaluations
             (id, submission_id, email, task, round, repo_url, pages_url, license_ok,
              readme_quality, code_quality, check_results, overall_score, passed, feedback,
              evaluated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                eval.id,
                eval.submission_id,
                eval.email,
                eval.task,
                eval.round,
                eval.repo_url,
                eval.pages_url,
                eval.license_ok as i32,
                eval.readme_quality,
                eval.code_quality,
                serde_json::to_string(&eval.check_results).unwrap_or_else(|_| "[]".into()),
                eval.overall_score,
                eval.passed as i32,
                eval.feedback,
                eval.evaluated_at,
            ],
        )?;
        Ok(())
    }

    pub fn evaluations_by_task(&self, task: &str) -> Result<Vec<Evaluation>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_EVALUATION} WHERE task = ?1 ORDER BY evaluated_at DESC"
        ))?;
        let evals = stmt
            .query_map(params![task], row_to_evaluation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(evals)
    }

    pub fn recent_evaluations(&self, limit: u32) -> Result<Vec<Evaluation>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_EVALUATION} ORDER BY evaluated_at DESC LIMIT ?1"
        ))?;
        let evals = stmt
            .query_map(params![limit], row_to_evaluation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(evals)
    }

    pub fn evaluations_for_submission(
        &self,
        submission_id: &str,
    ) -> Result<Vec<Evaluation>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_EVALUATION} WHERE submission_id = ?1 ORDER BY evaluated_at DESC"
        ))?;
        let evals = stmt
            .query_map(params![submission_id], row_to_evaluation)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(evals)
    }

    // ========================================================================
    // TASK TEMPLATES
    // ========================================================================

    pub fn insert_template(&self, template: &TaskTemplate) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO task_templates
             (id, name, brief, checks, functional_tests, attachments, active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                template.id,
                template.name,
                template.brief,
                serde_json::to_string(&template.checks).unwrap_or_else(|_| "[]".into()),
                template.functional_tests,
                serde_json::to_string(&template.attachments).unwrap_or_else(|_| "[]".into()),
                template.active as i32,
                template.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_template(&self, id: &str) -> Result<Option<TaskTemplate>, StorageError> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                &format!("{SELECT_TEMPLATE} WHERE id = ?1"),
                params![id],
                row_to_template,
            )
            .optional()?;
        Ok(result)
    }

    pub fn active_templates(&self) -> Result<Vec<TaskTemplate>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "{SELECT_TEMPLATE} WHERE active = 1 ORDER BY created_at DESC"
        ))?;
        let templates = stmt
            .query_map([], row_to_template)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(templates)
    }

    /// Deactivate a template. Returns false when the id is unknown.
    pub fn deactivate_template(&self, id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE task_templates SET active = 0 WHERE id = ?1",
            params![id],
        )?;
        Ok(changed > 0)
    }

    // ========================================================================
    // INSTRUCTOR CONFIG
    // ========================================================================

    pub fn upsert_instructor_config(&self, config: &InstructorConfig) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO instructor_config (id, shared_secret, github_token, evaluation_base_url, max_rounds)
             VALUES (1, ?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                shared_secret = excluded.shared_secret,
                github_token = excluded.github_token,
                evaluation_base_url = excluded.evaluation_base_url,
                max_rounds = excluded.max_rounds",
            params![
                config.shared_secret,
                config.github_token,
                config.evaluation_base_url,
                config.max_rounds,
            ],
        )?;
        Ok(())
    }

    pub fn instructor_config(&self) -> Result<Option<InstructorConfig>, StorageError> {
        let conn = self.conn.lock();
        let result = conn
            .query_row(
                "SELECT shared_secret, github_token, evaluation_base_url, max_rounds
                 FROM instructor_config WHERE id = 1",
                [],
                |row| {
                    Ok(InstructorConfig {
                        shared_secret: row.get(0)?,
                        github_token: row.get(1)?,
                        evaluation_base_url: row.get(2)?,
                        max_rounds: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(result)
    }

    // ========================================================================
    // SYSTEM LOGS
    // ========================================================================

    pub fn append_log(
        &self,
        level: LogLevel,
        message: &str,
        submission_id: Option<&str>,
        email: Option<&str>,
        task: Option<&str>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO system_logs (level, message, submission_id, email, task, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                level.as_str(),
                message,
                submission_id,
                email,
                task,
                chrono::Utc::now().timestamp(),
            ],
        )?;
        Ok(())
    }

    pub fn recent_logs(&self, limit: u32) -> Result<Vec<LogEntry>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, level, message, submission_id, email, task, created_at
             FROM system_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let logs = stmt
            .query_map(params![limit], |row| {
                let level: String = row.get(1)?;
                Ok(LogEntry {
                    id: row.get(0)?,
                    level: LogLevel::parse(&level).unwrap_or(LogLevel::Info),
                    message: row.get(2)?,
                    submission_id: row.get(3)?,
                    email: row.get(4)?,
                    task: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(logs)
    }
}

const SELECT_SUBMISSION: &str = "SELECT id, email, task, round, nonce, brief, checks, \
     evaluation_url, attachments, status, repo_url, commit_sha, pages_url, error_message, \
     created_at, completed_at FROM submissions";

const SELECT_EVALUATION: &str = "SELECT id, submission_id, email, task, round, repo_url, \
     pages_url, license_ok, readme_quality, code_quality, check_results, overall_score, \
     passed, feedback, evaluated_at FROM evaluations";

const SELECT_TEMPLATE: &str = "SELECT id, name, brief, checks, functional_tests, attachments, \
     active, created_at FROM task_templates";

fn row_to_submission(row: &Row<'_>) -> rusqlite::Result<Submission> {
    let checks_json: String = row.get(6)?;
    let attachments_json: String = row.get(8)?;
    let status_str: String = row.get(9)?;
    let status = SubmissionStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            9,
            rusqlite::types::Type::Text,
            format!("unknown submission status: {status_str}").into(),
        )
    })?;
    Ok(Submission {
        id: row.get(0)?,
        email: row.get(1)?,
        task: row.get(2)?,
        round: row.get(3)?,
        nonce: row.get(4)?,
        brief: row.get(5)?,
        checks: serde_json::from_str::<Vec<String>>(&checks_json).unwrap_or_default(),
        evaluation_url: row.get(7)?,
        attachments: serde_json::from_str::<Vec<Attachment>>(&attachments_json)
            .unwrap_or_default(),
        status,
        repo_url: row.get(10)?,
        commit_sha: row.get(11)?,
        pages_url: row.get(12)?,
        error_message: row.get(13)?,
        created_at: row.get(14)?,
        completed_at: row.get(15)?,
    })
}

fn row_to_evaluation(row: &Row<'_>) -> rusqlite::Result<Evaluation> {
    let check_results_json: String = row.get(10)?;
    Ok(Evaluation {
        id: row.get(0)?,
        submission_id: row.get(1)?,
        email: row.get(2)?,
        task: row.get(3)?,
        round: row.get(4)?,
        repo_url: row.get(5)?,
        pages_url: row.get(6)?,
        license_ok: row.get::<_, i32>(7)? != 0,
        readme_quality: row.get(8)?,
        code_quality: row.get(9)?,
        check_results: serde_json::from_str::<Vec<CheckResult>>(&check_results_json)
            .unwrap_or_default(),
        overall_score: row.get(11)?,
        passed: row.get::<_, i32>(12)? != 0,
        feedback: row.get(13)?,
        evaluated_at: row.get(14)?,
    })
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<TaskTemplate> {
    let checks_json: String = row.get(3)?;
    let attachments_json: String = row.get(5)?;
    Ok(TaskTemplate {
        id: row.get(0)?,
        name: row.get(1)?,
        brief: row.get(2)?,
        checks: serde_json::from_str::<Vec<String>>(&checks_json).unwrap_or_default(),
        functional_tests: row.get(4)?,
        attachments: serde_json::from_str::<Vec<Attachment>>(&attachments_json)
            .unwrap_or_default(),
        active: row.get::<_, i32>(6)? != 0,
        created_at: row.get(7)?,
    })
}
