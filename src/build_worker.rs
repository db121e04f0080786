//! Submission build/deploy pipeline.
//!
//! Runs detached from the HTTP request that created the submission. Walks
//! the status machine received -> building -> deploying -> completed,
//! generating the project, creating the repository, enabling Pages, and
//! notifying the submission's evaluation endpoint. Any error at any step
//! lands the submission in `failed` with the message recorded; there is no
//! whole-pipeline retry.

use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::github::{scaffold_project, GithubClient};
use crate::notify::NotifySender;
use crate::storage::Storage;
use crate::types::{EvaluateRequest, LogLevel, Submission, SubmissionStatus};

#[derive(Clone)]
pub struct BuildPipeline {
    storage: Arc<Storage>,
    github: GithubClient,
    notifier: NotifySender,
}

impl BuildPipeline {
    pub fn new(storage: Arc<Storage>, github: GithubClient, notifier: NotifySender) -> Self {
        Self {
            storage,
            github,
            notifier,
        }
    }

    /// Drive one submission through the pipeline, converting any error into
    /// a `failed` status plus a log entry.
    pub async fn run(&self, submission_id: &str) {
        if let Err(e) = self.execute(submission_id).await {
            error!("Build failed for submission {}: {:#}", submission_id, e);
            let message = format!("{e:#}");
            if let Err(se) = self.storage.update_status(
                submission_id,
                SubmissionStatus::Failed,
                Some(&message),
            ) {
                error!("Could not mark submission {} failed: {}", submission_id, se);
            }
            let _ = self.storage.append_log(
                LogLevel::Error,
                &format!("Build failed: {message}"),
                Some(submission_id),
                None,
                None,
            );
        }
    }

    async fn execute(&self, submission_id: &str) -> Result<()> {
        let submission = self
            .storage
            .get_submission(submission_id)?
            .ok_or_else(|| anyhow!("submission not found: {submission_id}"))?;

        self.storage
            .update_status(submission_id, SubmissionStatus::Building, None)?;
        info!(
            "Building project for {} (task {}, round {})",
            submission.email, submission.task, submission.round
        );

        let files = scaffold_project(&submission.brief, &submission.attachments);
        let repo = self
            .github
            .create_repo(
                &submission.email,
                &submission.task,
                submission.round,
                &files,
            )
            .await
            .context("creating repository")?;

        self.storage
            .update_status(submission_id, SubmissionStatus::Deploying, None)?;

        let pages_url = self
            .github
            .deploy_pages(&repo.repo_url)
            .await
            .context("deploying pages")?;

        self.notify_evaluation(&submission, &repo.repo_url, &repo.commit_sha, &pages_url)
            .await
            .context("notifying evaluation endpoint")?;

        self.storage.complete_submission(
            submission_id,
            &repo.repo_url,
            &repo.commit_sha,
            &pages_url,
            chrono::Utc::now().timestamp(),
        )?;

        info!(
            "Built and deployed project for {}: {}",
            submission.email, pages_url
        );
        self.storage.append_log(
            LogLevel::Info,
            &format!(
                "Successfully built and deployed project for {}",
                submission.email
            ),
            Some(submission_id),
            Some(&submission.email),
            Some(&submission.task),
        )?;

        Ok(())
    }

    async fn notify_evaluation(
        &self,
        submission: &Submission,
        repo_url: &str,
        commit_sha: &str,
        pages_url: &str,
    ) -> Result<()> {
        let secret = self
            .storage
            .instructor_config()?
            .map(|c| c.shared_secret)
            .unwrap_or_default();

        let payload = EvaluateRequest {
            email: submission.email.clone(),
            secret,
            task: submission.task.clone(),
            round: submission.round,
            nonce: submission.nonce.clone(),
            repo_url: repo_url.to_string(),
            commit_sha: commit_sha.to_string(),
            pages_url: pages_url.to_string(),
        };

        self.notifier
            .send_json(&submission.evaluation_url, &payload)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstructorConfig;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn setup(evaluation_url: String) -> (Arc<Storage>, BuildPipeline) {
        let storage = Arc::new(Storage::in_memory().unwrap());
        storage
            .upsert_instructor_config(&InstructorConfig {
                shared_secret: "s3cret".into(),
                github_token: None,
                evaluation_base_url: evaluation_url.clone(),
                max_rounds: 2,
            })
            .unwrap();
        storage
            .insert_submission(&Submission {
                id: "sub-1".into(),
                email: "a@b.edu".into(),
                task: "todo-app".into(),
                round: 1,
                nonce: "nonce1".into(),
                brief: "Build a todo app".into(),
                checks: vec!["App loads".into()],
                evaluation_url,
                attachments: vec![],
                status: SubmissionStatus::Received,
                repo_url: None,
                commit_sha: None,
                pages_url: None,
                error_message: None,
                created_at: chrono::Utc::now().timestamp(),
                completed_at: None,
            })
            .unwrap();

        let pipeline = BuildPipeline::new(
            storage.clone(),
            GithubClient::new(None),
            NotifySender::with_policy(3, Duration::from_millis(5)),
        );
        (storage, pipeline)
    }

    #[tokio::test]
    async fn test_successful_pipeline_completes_and_notifies() {
        let server = MockServer::start();
        let hook = server.mock(|when, then| {
            when.method(POST).path("/api/evaluate");
            then.status(200).json_body(serde_json::json!({"success": true}));
        });

        let (storage, pipeline) = setup(server.url("/api/evaluate"));
        pipeline.run("sub-1").await;

        hook.assert_hits(1);
        let sub = storage.get_submission("sub-1").unwrap().unwrap();
        assert_eq!(sub.status, SubmissionStatus::Completed);
        assert!(sub.repo_url.is_some());
        assert!(sub.pages_url.is_some());
        assert!(sub.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_notification_failure_fails_submission() {
        let server = MockServer::start();
        let hook = server.mock(|when, then| {
            when.method(POST).path("/api/evaluate");
            then.status(500);
        });

        let (storage, pipeline) = setup(server.url("/api/evaluate"));
        pipeline.run("sub-1").await;

        hook.assert_hits(3);
        let sub = storage.get_submission("sub-1").unwrap().unwrap();
        assert_eq!(sub.status, SubmissionStatus::Failed);
        let message = sub.error_message.unwrap();
        assert!(message.contains("after 3 attempts"), "got: {message}");
    }

    #[tokio::test]
    async fn test_missing_submission_logs_error() {
        let server = MockServer::start();
        let (storage, pipeline) = setup(server.url("/api/evaluate"));
        pipeline.run("no-such-id").await;

        let logs = storage.recent_logs(10).unwrap();
        assert!(logs.iter().any(|l| l.message.contains("no-such-id")));
    }
}
