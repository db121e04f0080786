//! GitHub repository client for the build pipeline.
//!
//! With a token configured the client drives the real GitHub API: create a
//! repository, commit the generated files, enable Pages, read the license.
//! Without one it produces deterministic stub results so the whole
//! pipeline runs self-contained in a classroom or a test.

use anyhow::{anyhow, Context, Result};
use base64::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::types::Attachment;

const GITHUB_API: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("classforge/", env!("CARGO_PKG_VERSION"));

/// Repository created for a submission.
#[derive(Debug, Clone)]
pub struct RepoData {
    pub repo_url: String,
    pub commit_sha: String,
}

#[derive(Clone)]
pub struct GithubClient {
    token: Option<String>,
    api_base: String,
    client: reqwest::Client,
}

impl GithubClient {
    pub fn new(token: Option<String>) -> Self {
        Self::with_api_base(token, GITHUB_API)
    }

    /// Point the client at a different API host (tests use httpmock).
    pub fn with_api_base(token: Option<String>, api_base: impl Into<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn stubbed(&self) -> bool {
        self.token.is_none()
    }

    /// Create a repository holding `files` and return its URL plus the
    /// commit sha of the initial content.
    pub async fn create_repo(
        &self,
        email: &str,
        task: &str,
        round: u32,
        files: &[(String, String)],
    ) -> Result<RepoData> {
        let login = login_for(email);
        let repo_name = repo_name_for(email, task, round);

        if self.stubbed() {
            let commit_sha = content_sha(files);
            debug!("Stub repo for {}: {}/{}", email, login, repo_name);
            return Ok(RepoData {
                repo_url: format!("https://github.com/{login}/{repo_name}"),
                commit_sha,
            });
        }

        let resp = self
            .request(reqwest::Method::POST, "/user/repos")
            .json(&serde_json::json!({
                "name": repo_name,
                "description": format!("Generated project for task {task} (round {round})"),
                "auto_init": false,
            }))
            .send()
            .await
            .context("creating repository")?;
        if !resp.status().is_success() {
            return Err(anyhow!("repository creation failed: HTTP {}", resp.status()));
        }
        let repo: serde_json::Value = resp.json().await?;
        let full_name = repo
            .get("full_name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("repository response missing full_name"))?
            .to_string();
        let repo_url = repo
            .get("html_url")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| format!("https://github.com/{full_name}"));

        let mut commit_sha = String::new();
        for (path, content) in files {
            let resp = self
                .request(
                    reqwest::Method::PUT,
                    &format!("/repos/{full_name}/contents/{path}"),
                )
                .json(&serde_json::json!({
                    "message": format!("Add {path}"),
                    "content": BASE64_STANDARD.encode(content),
                }))
                .send()
                .await
                .with_context(|| format!("committing {path}"))?;
            if !resp.status().is_success() {
                return Err(anyhow!("commit of {} failed: HTTP {}", path, resp.status()));
            }
            let body: serde_json::Value = resp.json().await?;
            if let Some(sha) = body.pointer("/commit/sha").and_then(|v| v.as_str()) {
                commit_sha = sha.to_string();
            }
        }
        if commit_sha.is_empty() {
            return Err(anyhow!("no commit sha returned for {full_name}"));
        }

        info!("Created repository {} at {}", full_name, commit_sha);
        Ok(RepoData {
            repo_url,
            commit_sha,
        })
    }

    /// Enable GitHub Pages for the repository and return the site URL.
    pub async fn deploy_pages(&self, repo_url: &str) -> Result<String> {
        let (owner, repo) = split_repo_url(repo_url)?;

        if self.stubbed() {
            return Ok(format!("https://{owner}.github.io/{repo}"));
        }

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/repos/{owner}/{repo}/pages"),
            )
            .json(&serde_json::json!({
                "source": {"branch": "main", "path": "/"}
            }))
            .send()
            .await
            .context("enabling pages")?;
        // 409 means pages were already enabled; anything else non-2xx is fatal.
        if !resp.status().is_success() && resp.status().as_u16() != 409 {
            return Err(anyhow!("pages deploy failed: HTTP {}", resp.status()));
        }

        Ok(format!("https://{owner}.github.io/{repo}"))
    }

    /// Repository-level license check: does the repo carry an MIT license?
    pub async fn has_mit_license(&self, repo_url: &str) -> Result<bool> {
        if self.stubbed() {
            return Ok(true);
        }

        let (owner, repo) = split_repo_url(repo_url)?;
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/repos/{owner}/{repo}/license"),
            )
            .send()
            .await
            .context("fetching license")?;
        if resp.status().as_u16() == 404 {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(anyhow!("license lookup failed: HTTP {}", resp.status()));
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body.pointer("/license/spdx_id").and_then(|v| v.as_str()) == Some("MIT"))
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .request(method, format!("{}{}", self.api_base, path))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder
    }
}

// ============================================================================
// PROJECT SCAFFOLD
// ============================================================================

/// Generate the project files for a brief. Stands in for the LLM codegen
/// step; the scaffold is a minimal static page carrying the brief plus a
/// README and MIT license.
pub fn scaffold_project(brief: &str, attachments: &[Attachment]) -> Vec<(String, String)> {
    let escaped = html_escape(brief);
    let attachment_list = if attachments.is_empty() {
        String::new()
    } else {
        let items: String = attachments
            .iter()
            .map(|a| format!("        <li><a href=\"{}\">{}</a></li>\n", a.url, a.name))
            .collect();
        format!("    <ul>\n{items}    </ul>\n")
    };

    let index_html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Generated Project</title>
    <style>
        body {{ font-family: Arial, sans-serif; max-width: 800px; margin: 0 auto; padding: 20px; }}
        .brief {{ background: #f5f5f5; padding: 20px; border-radius: 8px; margin: 20px 0; }}
    </style>
</head>
<body>
    <h1>Generated Project</h1>
    <div class="brief">
        <h2>Project Brief</h2>
        <p>{escaped}</p>
    </div>
{attachment_list}    <p>This project was automatically generated from the provided brief.</p>
</body>
</html>
"#
    );

    let readme = format!(
        "# Generated Project\n\n\
         ## Summary\n\
         This project was automatically generated from the brief: \"{brief}\"\n\n\
         ## Setup\n\
         1. Clone this repository\n\
         2. Open index.html in a web browser\n\n\
         ## Usage\n\
         Open the deployed GitHub Pages URL to view the application.\n\n\
         ## License\n\
         MIT License - see LICENSE file for details.\n"
    );

    let year = chrono::Utc::now().format("%Y");
    let license = format!(
        "MIT License\n\n\
         Copyright (c) {year} Student Project\n\n\
         Permission is hereby granted, free of charge, to any person obtaining a copy\n\
         of this software and associated documentation files (the \"Software\"), to deal\n\
         in the Software without restriction, including without limitation the rights\n\
         to use, copy, modify, merge, publish, distribute, sublicense, and/or sell\n\
         copies of the Software, and to permit persons to whom the Software is\n\
         furnished to do so, subject to the following conditions:\n\n\
         The above copyright notice and this permission notice shall be included in all\n\
         copies or substantial portions of the Software.\n\n\
         THE SOFTWARE IS PROVIDED \"AS IS\", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR\n\
         IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,\n\
         FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE\n\
         AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER\n\
         LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,\n\
         OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE\n\
         SOFTWARE.\n"
    );

    vec![
        ("index.html".to_string(), index_html),
        ("README.md".to_string(), readme),
        ("LICENSE".to_string(), license),
    ]
}

// ============================================================================
// HELPERS
// ============================================================================

/// GitHub-style login derived from the email local part.
fn login_for(email: &str) -> String {
    let local = email.split('@').next().unwrap_or(email);
    let sanitized: String = local
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let trimmed = sanitized.trim_matches('-');
    if trimmed.is_empty() {
        "student".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Deterministic repository name for `(email, task, round)`.
fn repo_name_for(email: &str, task: &str, round: u32) -> String {
    let digest = Sha256::digest(format!("{email}|{task}|{round}").as_bytes());
    format!("{task}-r{round}-{}", &hex::encode(digest)[..8])
}

/// Commit sha stand-in: hash of the scaffold contents.
fn content_sha(files: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    for (path, content) in files {
        hasher.update(path.as_bytes());
        hasher.update(content.as_bytes());
    }
    hex::encode(hasher.finalize())[..40].to_string()
}

fn split_repo_url(repo_url: &str) -> Result<(String, String)> {
    let mut parts = repo_url.trim_end_matches('/').rsplit('/');
    let repo = parts.next().filter(|s| !s.is_empty());
    let owner = parts.next().filter(|s| !s.is_empty());
    match (owner, repo) {
        (Some(owner), Some(repo)) => Ok((owner.to_string(), repo.to_string())),
        _ => Err(anyhow!("malformed repository url: {repo_url}")),
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
