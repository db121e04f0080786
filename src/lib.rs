//! Classroom automation platform.
//!
//! Instructors author project briefs and dispatch them to students'
//! external build services; build requests come back as webhooks, run
//! through a build/deploy pipeline, and completed artifacts are
//! auto-evaluated into a pass/fail score surfaced on the dashboard API.
//!
//! ## Module Structure
//!
//! - `types`: domain types and the submission status machine
//! - `storage`: embedded SQLite persistence
//! - `auth`: shared-secret verification, nonces
//! - `notify`: webhook sender with bounded retry
//! - `scoring`: weighted evaluation score and feedback
//! - `llm`: LLM quality review (stubbed without an API)
//! - `github`: repository/Pages client (stubbed without a token)
//! - `checks`: functional check runner seam
//! - `build_worker` / `eval_worker`: the two async pipelines
//! - `tasks`: task dispatch to students
//! - `api` / `server`: REST surface and server assembly
//! - `config`: deployment configuration

pub mod api;
pub mod auth;
pub mod build_worker;
pub mod checks;
pub mod config;
pub mod eval_worker;
pub mod github;
pub mod llm;
pub mod notify;
pub mod scoring;
pub mod server;
pub mod storage;
pub mod tasks;
pub mod types;

pub use api::ApiState;
pub use build_worker::BuildPipeline;
pub use config::ServiceConfig;
pub use eval_worker::EvalPipeline;
pub use notify::NotifySender;
pub use server::{build_router, create_state, run_server};
pub use storage::{Storage, StorageError};
pub use types::{
    Evaluation, InstructorConfig, Submission, SubmissionStatus, TaskTemplate,
};
