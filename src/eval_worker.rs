//! Evaluation pipeline.
//!
//! Consumes a completed submission's deployed artifact: runs the license
//! check, the two LLM quality reviews, and the functional checks, combines
//! them into the weighted score, stores the immutable evaluation record,
//! and generates the round-2 task definition after a first-round run.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::checks::CheckRunner;
use crate::github::GithubClient;
use crate::llm::QualityReviewer;
use crate::scoring;
use crate::storage::Storage;
use crate::types::{Evaluation, LogLevel, Submission, TaskTemplate};

/// Checks attached to every generated round-2 task.
const ROUND2_CHECKS: [&str; 4] = [
    "Code is well-structured and documented",
    "Enhanced functionality beyond basic requirements",
    "Proper error handling implemented",
    "UI is responsive and user-friendly",
];

#[derive(Clone)]
pub struct EvalPipeline {
    storage: Arc<Storage>,
    github: GithubClient,
    reviewer: QualityReviewer,
    runner: Arc<dyn CheckRunner>,
}

impl EvalPipeline {
    pub fn new(
        storage: Arc<Storage>,
        github: GithubClient,
        reviewer: QualityReviewer,
        runner: Arc<dyn CheckRunner>,
    ) -> Self {
        Self {
            storage,
            github,
            reviewer,
            runner,
        }
    }

    /// Evaluate one submission's artifact. Errors are logged; nothing is
    /// reported back to the caller that scheduled the run.
    pub async fn run(&self, submission_id: &str, repo_url: &str, pages_url: &str) {
        if let Err(e) = self.execute(submission_id, repo_url, pages_url).await {
            error!("Evaluation failed for submission {}: {:#}", submission_id, e);
            let _ = self.storage.append_log(
                LogLevel::Error,
                &format!("Evaluation failed: {e:#}"),
                Some(submission_id),
                None,
                None,
            );
        }
    }

    async fn execute(&self, submission_id: &str, repo_url: &str, pages_url: &str) -> Result<()> {
        let submission = self
            .storage
            .get_submission(submission_id)?
            .ok_or_else(|| anyhow!("submission not found: {submission_id}"))?;

        let license_ok = self
            .github
            .has_mit_license(repo_url)
            .await
            .context("license check")?;
        let readme_quality = self.reviewer.readme_quality(repo_url).await;
        let code_quality = self.reviewer.code_quality(repo_url).await;
        let check_results = self.runner.run_checks(pages_url, &submission.checks).await;

        let overall_score =
            scoring::overall_score(license_ok, readme_quality, code_quality, &check_results);
        let passed = scoring::is_passing(overall_score);
        let feedback =
            scoring::generate_feedback(license_ok, readme_quality, code_quality, &check_results);

        let evaluation = Evaluation {
            id: uuid::Uuid::new_v4().to_string(),
            submission_id: submission.id.clone(),
            email: submission.email.clone(),
            task: submission.task.clone(),
            round: submission.round,
            repo_url: repo_url.to_string(),
            pages_url: pages_url.to_string(),
            license_ok,
            readme_quality,
            code_quality,
            check_results,
            overall_score,
            passed,
            feedback,
            evaluated_at: chrono::Utc::now().timestamp(),
        };
        self.storage.insert_evaluation(&evaluation)?;

        info!(
            "Evaluated {} (task {}, round {}): score {} ({})",
            submission.email,
            submission.task,
            submission.round,
            overall_score,
            if passed { "passed" } else { "failed" }
        );
        self.storage.append_log(
            LogLevel::Info,
            &format!(
                "Evaluated project for {}: score {}/100",
                submission.email, overall_score
            ),
            Some(submission_id),
            Some(&submission.email),
            Some(&submission.task),
        )?;

        let max_rounds = self
            .storage
            .instructor_config()?
            .map(|c| c.max_rounds)
            .unwrap_or(crate::types::DEFAULT_MAX_ROUNDS);
        if submission.round == 1 && submission.round < max_rounds {
            self.generate_next_round_task(&submission, passed)?;
        }

        Ok(())
    }

    /// Produce the round-2 task definition, branching the brief on the
    /// round-1 outcome, and persist it as a dispatch-ready template.
    fn generate_next_round_task(&self, submission: &Submission, previous_passed: bool) -> Result<()> {
        let brief = if previous_passed {
            format!(
                "Enhance your {} with advanced features: Add user authentication, \
                 improve UI/UX, and implement data persistence.",
                submission.task
            )
        } else {
            format!(
                "Refactor your {} to address the issues identified in round 1. \
                 Focus on code quality, proper error handling, and meeting all requirements.",
                submission.task
            )
        };

        let template = TaskTemplate {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("{}-round2", submission.task),
            brief,
            checks: ROUND2_CHECKS.iter().map(|c| c.to_string()).collect(),
            functional_tests: String::new(),
            attachments: vec![],
            active: true,
            created_at: chrono::Utc::now().timestamp(),
        };
        self.storage.insert_template(&template)?;

        info!(
            "Generated round-2 task {} for {}",
            template.name, submission.email
        );
        self.storage.append_log(
            LogLevel::Info,
            &format!("Generated round-2 task {}", template.name),
            Some(&submission.id),
            Some(&submission.email),
            Some(&submission.task),
        )?;
        Ok(())
    }
}
