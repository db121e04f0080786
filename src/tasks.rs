//! Task dispatch to students.
//!
//! Fans a task template out to each student's build endpoint as a round-1
//! build request: fresh nonce per student, shared secret and evaluation
//! URL taken from the instructor configuration. Each send is scheduled
//! independently and goes through the notification sender's retry policy;
//! a failed student does not abort the fan-out.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::generate_nonce;
use crate::notify::NotifySender;
use crate::storage::{Storage, StorageError};
use crate::types::{BuildRequest, LogLevel, TaskTemplate};

/// One student recipient of a task dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentTarget {
    pub email: String,
    /// The student system's build endpoint.
    pub endpoint: String,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("instructor configuration not found")]
    MissingConfig,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Schedule one build request per student. Returns the number of sends
/// scheduled; delivery outcomes land in the system log.
pub fn dispatch_task(
    storage: &Arc<Storage>,
    notifier: &NotifySender,
    template: &TaskTemplate,
    students: &[StudentTarget],
) -> Result<u32, DispatchError> {
    let config = storage
        .instructor_config()?
        .ok_or(DispatchError::MissingConfig)?;

    for student in students {
        let request = BuildRequest {
            email: student.email.clone(),
            secret: config.shared_secret.clone(),
            task: template.name.clone(),
            round: 1,
            nonce: generate_nonce(),
            brief: template.brief.clone(),
            checks: template.checks.clone(),
            evaluation_url: config.evaluation_base_url.clone(),
            attachments: template.attachments.clone(),
        };

        let notifier = notifier.clone();
        let storage = storage.clone();
        let endpoint = student.endpoint.clone();
        let email = student.email.clone();
        let task = template.name.clone();
        tokio::spawn(async move {
            match notifier.send_json(&endpoint, &request).await {
                Ok(()) => {
                    info!("Task {} sent to {}", task, email);
                    let _ = storage.append_log(
                        LogLevel::Info,
                        &format!("Sent task {task} to {email}"),
                        None,
                        Some(&email),
                        Some(&task),
                    );
                }
                Err(e) => {
                    warn!("Task dispatch to {} failed: {}", email, e);
                    let _ = storage.append_log(
                        LogLevel::Error,
                        &format!("Task dispatch failed: {e}"),
                        None,
                        Some(&email),
                        Some(&task),
                    );
                }
            }
        });
    }

    info!(
        "Dispatching task {} to {} student(s)",
        template.name,
        students.len()
    );
    Ok(students.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InstructorConfig;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn sample_template() -> TaskTemplate {
        TaskTemplate {
            id: "tpl-1".into(),
            name: "todo-app".into(),
            brief: "Build a todo app".into(),
            checks: vec!["App loads".into()],
            functional_tests: String::new(),
            attachments: vec![],
            active: true,
            created_at: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn test_dispatch_requires_config() {
        let storage = Arc::new(Storage::in_memory().unwrap());
        let notifier = NotifySender::with_policy(1, Duration::from_millis(5));

        let err = dispatch_task(
            &storage,
            &notifier,
            &sample_template(),
            &[StudentTarget {
                email: "a@b.edu".into(),
                endpoint: "http://127.0.0.1:9/build".into(),
            }],
        )
        .unwrap_err();
        assert!(matches!(err, DispatchError::MissingConfig));
    }

    #[tokio::test]
    async fn test_dispatch_sends_round_one_request_per_student() {
        let server = MockServer::start();
        let hook = server.mock(|when, then| {
            when.method(POST)
                .path("/build")
                .json_body_partial(r#"{"task": "todo-app", "round": 1, "secret": "s3cret"}"#);
            then.status(200);
        });

        let storage = Arc::new(Storage::in_memory().unwrap());
        storage
            .upsert_instructor_config(&InstructorConfig {
                shared_secret: "s3cret".into(),
                github_token: None,
                evaluation_base_url: "http://inst.example/api/evaluate".into(),
                max_rounds: 2,
            })
            .unwrap();
        let notifier = NotifySender::with_policy(1, Duration::from_millis(5));

        let students = vec![
            StudentTarget {
                email: "a@b.edu".into(),
                endpoint: server.url("/build"),
            },
            StudentTarget {
                email: "c@d.edu".into(),
                endpoint: server.url("/build"),
            },
        ];
        let sent = dispatch_task(&storage, &notifier, &sample_template(), &students).unwrap();
        assert_eq!(sent, 2);

        // Sends are spawned; wait until both outcomes are logged.
        let sent_logs = |storage: &Storage| {
            storage
                .recent_logs(10)
                .unwrap()
                .iter()
                .filter(|l| l.message.starts_with("Sent task"))
                .count()
        };
        for _ in 0..100 {
            if sent_logs(&storage) >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        hook.assert_hits(2);
        assert_eq!(sent_logs(&storage), 2);
    }
}
