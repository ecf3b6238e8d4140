//! External collaborators of the remediation workflow: version control, the
//! test runner and the pull-request host. Every call is bounded by a timeout.

use async_trait::async_trait;
use healwatch_core::config::{PullRequestConfig, RemediationConfig};
use healwatch_core::error::{MonitorError, MonitorResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const MAX_TEST_OUTPUT_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestReport {
    pub passed: bool,
    pub output: String,
}

#[async_trait]
pub trait VersionControlGateway: Send + Sync {
    /// Make the workspace checkout available on the base branch.
    async fn prepare(&self) -> MonitorResult<()>;

    async fn create_branch(&self, name: &str) -> MonitorResult<()>;

    /// Stage `paths` and commit; returns the commit id.
    async fn commit(&self, message: &str, paths: &[PathBuf]) -> MonitorResult<String>;

    /// Publish `branch` and open a pull request. `None` when no host is
    /// configured.
    async fn open_pull_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> MonitorResult<Option<String>>;

    /// Return the workspace to the base branch after a run.
    async fn restore(&self) -> MonitorResult<()>;
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, module: &str) -> MonitorResult<TestReport>;
}

#[async_trait]
pub trait PullRequestHost: Send + Sync {
    fn is_enabled(&self) -> bool;

    async fn open(&self, branch: &str, base: &str, title: &str, body: &str) -> MonitorResult<String>;
}

async fn run_bounded(
    mut command: Command,
    timeout: Duration,
    what: &str,
    error: fn(String) -> MonitorError,
) -> MonitorResult<Output> {
    command.kill_on_drop(true);
    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(error(format!("{what}: failed to start: {e}"))),
        Err(_) => Err(error(format!("{what}: timed out after {}s", timeout.as_secs()))),
    }
}

fn combined_output(output: &Output) -> String {
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        text.push_str(&stderr);
    }
    tail(text, MAX_TEST_OUTPUT_BYTES)
}

fn tail(text: String, max: usize) -> String {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

/// Git through the `git` binary in the remediation workspace.
pub struct GitCliGateway {
    workspace: PathBuf,
    repository_url: Option<String>,
    base_branch: String,
    author_name: String,
    author_email: String,
    timeout: Duration,
    host: Arc<dyn PullRequestHost>,
}

impl GitCliGateway {
    pub fn new(config: &RemediationConfig, host: Arc<dyn PullRequestHost>) -> Self {
        Self {
            workspace: PathBuf::from(&config.workspace_path),
            repository_url: config.repository_url.clone().filter(|u| !u.trim().is_empty()),
            base_branch: config.base_branch.clone(),
            author_name: config.git_author_name.clone(),
            author_email: config.git_author_email.clone(),
            timeout: Duration::from_secs(config.git_timeout_secs),
            host,
        }
    }

    async fn git(&self, args: &[&str]) -> MonitorResult<String> {
        let mut command = Command::new("git");
        command.args(args).current_dir(&self.workspace);
        let what = format!("git {}", args.first().copied().unwrap_or_default());
        let output =
            run_bounded(command, self.timeout, &what, MonitorError::ExternalIntegration).await?;
        if !output.status.success() {
            return Err(MonitorError::ExternalIntegration(format!(
                "{what} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl VersionControlGateway for GitCliGateway {
    async fn prepare(&self) -> MonitorResult<()> {
        if self.workspace.join(".git").exists() {
            return self.git(&["checkout", &self.base_branch]).await.map(|_| ());
        }
        let Some(url) = &self.repository_url else {
            return Err(MonitorError::ExternalIntegration(format!(
                "workspace {} is not a git checkout and no repository_url is configured",
                self.workspace.display()
            )));
        };
        tokio::fs::create_dir_all(&self.workspace).await?;
        let mut command = Command::new("git");
        command
            .args(["clone", "--branch", self.base_branch.as_str(), url.as_str()])
            .arg(&self.workspace);
        let output = run_bounded(
            command,
            self.timeout,
            "git clone",
            MonitorError::ExternalIntegration,
        )
        .await?;
        if !output.status.success() {
            return Err(MonitorError::ExternalIntegration(format!(
                "git clone exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!(workspace = %self.workspace.display(), "Cloned remediation workspace");
        Ok(())
    }

    async fn create_branch(&self, name: &str) -> MonitorResult<()> {
        self.git(&["checkout", "-b", name]).await.map(|_| ())
    }

    async fn commit(&self, message: &str, paths: &[PathBuf]) -> MonitorResult<String> {
        let mut add: Vec<String> = vec!["add".into(), "--".into()];
        add.extend(paths.iter().map(|p| p.to_string_lossy().into_owned()));
        let add_refs: Vec<&str> = add.iter().map(String::as_str).collect();
        self.git(&add_refs).await?;

        let name = format!("user.name={}", self.author_name);
        let email = format!("user.email={}", self.author_email);
        self.git(&["-c", &name, "-c", &email, "commit", "-m", message]).await?;
        self.git(&["rev-parse", "HEAD"]).await
    }

    async fn open_pull_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> MonitorResult<Option<String>> {
        if !self.host.is_enabled() {
            debug!(branch, "Pull request host disabled");
            return Ok(None);
        }
        self.git(&["push", "-u", "origin", branch]).await?;
        let url = self.host.open(branch, &self.base_branch, title, body).await?;
        Ok(Some(url))
    }

    async fn restore(&self) -> MonitorResult<()> {
        if !self.workspace.join(".git").exists() {
            return Ok(());
        }
        self.git(&["checkout", "--force", &self.base_branch]).await.map(|_| ())
    }
}

/// Runs the module's test suite with a build tool, `mvn test -pl <module>`
/// by default.
pub struct CommandTestRunner {
    program: String,
    workspace: PathBuf,
    timeout: Duration,
}

impl CommandTestRunner {
    pub fn new(config: &RemediationConfig) -> Self {
        Self {
            program: config.test_command.clone(),
            workspace: PathBuf::from(&config.workspace_path),
            timeout: Duration::from_secs(config.test_timeout_secs),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>, workspace: &Path) -> Self {
        self.program = program.into();
        self.workspace = workspace.to_path_buf();
        self
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_tests(&self, module: &str) -> MonitorResult<TestReport> {
        let mut command = Command::new(&self.program);
        command
            .args(["test", "-pl", module])
            .current_dir(&self.workspace);
        let what = format!("{} test", self.program);
        let output =
            run_bounded(command, self.timeout, &what, MonitorError::TestExecution).await?;

        let passed = output.status.success();
        let captured = combined_output(&output);
        let summary = if passed {
            "All tests passed".to_string()
        } else {
            format!("Tests failed with {}", output.status)
        };
        Ok(TestReport {
            passed,
            output: format!("{summary}\n{captured}"),
        })
    }
}

/// Pull requests through the GitHub REST API.
pub struct GitHubPullRequestHost {
    client: reqwest::Client,
    api_url: String,
    repository: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestResponse {
    html_url: String,
}

impl GitHubPullRequestHost {
    /// `None` unless both `api_url` and `repository` are configured.
    pub fn from_config(config: &PullRequestConfig, timeout: Duration) -> MonitorResult<Option<Self>> {
        let (Some(api_url), Some(repository)) = (&config.api_url, &config.repository) else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("healwatch")
            .build()
            .map_err(|e| MonitorError::Config(format!("pull request client: {e}")))?;
        Ok(Some(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.clone(),
            token: config.token.clone(),
        }))
    }
}

#[async_trait]
impl PullRequestHost for GitHubPullRequestHost {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn open(&self, branch: &str, base: &str, title: &str, body: &str) -> MonitorResult<String> {
        let url = format!("{}/repos/{}/pulls", self.api_url, self.repository);
        let mut request = self.client.post(&url).json(&serde_json::json!({
            "title": title,
            "head": branch,
            "base": base,
            "body": body,
        }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| MonitorError::ExternalIntegration(format!("pull request: {e}")))?;
        if !response.status().is_success() {
            return Err(MonitorError::ExternalIntegration(format!(
                "pull request host returned {}",
                response.status()
            )));
        }
        let created: PullRequestResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::ExternalIntegration(format!("pull request response: {e}")))?;
        Ok(created.html_url)
    }
}

pub struct DisabledPullRequestHost;

#[async_trait]
impl PullRequestHost for DisabledPullRequestHost {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn open(&self, _branch: &str, _base: &str, _title: &str, _body: &str) -> MonitorResult<String> {
        Err(MonitorError::ExternalIntegration(
            "pull request host is not configured".into(),
        ))
    }
}
