//! Classforge Server
//!
//! Runs the classroom platform as a standalone HTTP server.

use anyhow::Result;
use clap::Parser;
use classforge::config::{LlmConfig, ServiceConfig};
use classforge::types::{InstructorConfig, DEFAULT_MAX_ROUNDS};
use classforge::{create_state, run_server, Storage};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "classforge-server")]
#[command(about = "Classroom automation platform HTTP server")]
struct Args {
    /// Server port
    #[arg(short, long, default_value = "8080", env = "CLASSFORGE_PORT")]
    port: u16,

    /// Server host
    #[arg(long, default_value = "0.0.0.0", env = "CLASSFORGE_HOST")]
    host: String,

    /// SQLite database path
    #[arg(short, long, default_value = "classforge.db", env = "CLASSFORGE_DB")]
    database: String,

    /// Shared secret used to bootstrap the instructor configuration when
    /// none exists yet
    #[arg(long, env = "SHARED_SECRET")]
    shared_secret: Option<String>,

    /// Evaluation callback base URL handed to students on dispatch
    #[arg(long, env = "EVALUATION_BASE_URL")]
    evaluation_base_url: Option<String>,

    /// GitHub token for real repository creation (stubbed when absent)
    #[arg(long, env = "GITHUB_TOKEN")]
    github_token: Option<String>,

    /// Chat-completion API URL for LLM quality review (stubbed when absent)
    #[arg(long, env = "LLM_API_URL")]
    llm_api_url: Option<String>,

    /// API key for the LLM endpoint
    #[arg(long, env = "LLM_API_KEY")]
    llm_api_key: Option<String>,

    /// Model name for LLM quality review
    #[arg(long, default_value = "gpt-4o-mini", env = "LLM_MODEL")]
    llm_model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("classforge=debug".parse()?)
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();

    info!("Starting Classforge server");
    info!("  Database: {}", args.database);
    info!("  Listening on: {}:{}", args.host, args.port);

    let storage = Arc::new(Storage::new(args.database.clone().into())?);

    // Bootstrap the instructor configuration on first run.
    if storage.instructor_config()?.is_none() {
        if let Some(secret) = args.shared_secret.clone() {
            storage.upsert_instructor_config(&InstructorConfig {
                shared_secret: secret,
                github_token: args.github_token.clone(),
                evaluation_base_url: args.evaluation_base_url.clone().unwrap_or_default(),
                max_rounds: DEFAULT_MAX_ROUNDS,
            })?;
            info!("Bootstrapped instructor configuration from environment");
        } else {
            info!("No instructor configuration yet; webhook endpoints will reject requests until one is set via PUT /api/config");
        }
    }

    let config = ServiceConfig {
        host: args.host.clone(),
        port: args.port,
        database_path: args.database,
        llm: LlmConfig {
            api_url: args.llm_api_url,
            api_key: args.llm_api_key,
            model: args.llm_model,
        },
        ..ServiceConfig::default()
    };

    let state = create_state(storage, &config);
    run_server(state, &config.host, config.port).await
}
