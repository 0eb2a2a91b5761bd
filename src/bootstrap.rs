//! Repository bootstrap
//!
//! Clones the configured repository (or pulls it when the directory already
//! exists), then installs its `requirements.txt`. Any failing step aborts
//! startup. Progress lines go to the writer handed to [`Bootstrap::run`],
//! stderr in the binary.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

use crate::config::BootstrapConfig;

const MANIFEST_FILE: &str = "requirements.txt";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Failed { command: String, status: String },
    #[error("Failed to report bootstrap progress: {0}")]
    Progress(#[source] std::io::Error),
}

/// One external command of the bootstrap plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapStep {
    pub label: &'static str,
    pub program: String,
    pub args: Vec<String>,
}

impl BootstrapStep {
    fn new(label: &'static str, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            label,
            program: program.into(),
            args,
        }
    }

    /// Command line for messages
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Runs external commands
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, step: &BootstrapStep) -> Result<(), BootstrapError>;
}

/// Runs commands as child processes, inheriting stdout/stderr
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, step: &BootstrapStep) -> Result<(), BootstrapError> {
        let status = Command::new(&step.program)
            .args(&step.args)
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|source| BootstrapError::Spawn {
                command: step.display(),
                source,
            })?;

        if !status.success() {
            return Err(BootstrapError::Failed {
                command: step.display(),
                status: status.to_string(),
            });
        }
        Ok(())
    }
}

/// Bootstrap for one repository
pub struct Bootstrap {
    repo_url: String,
    clone_dir: PathBuf,
    python: String,
}

impl Bootstrap {
    pub fn new(config: &BootstrapConfig) -> Self {
        Self {
            repo_url: config.repo_url.clone(),
            clone_dir: config.clone_dir.clone(),
            python: config.python.clone(),
        }
    }

    /// Steps to run, given whether the clone directory already exists
    pub fn plan(&self, clone_exists: bool) -> Vec<BootstrapStep> {
        let dir = path_arg(&self.clone_dir);

        let sync = if clone_exists {
            BootstrapStep::new(
                "Updating repository",
                "git",
                vec!["-C".to_string(), dir, "pull".to_string()],
            )
        } else {
            BootstrapStep::new(
                "Cloning repository",
                "git",
                vec!["clone".to_string(), self.repo_url.clone(), dir],
            )
        };

        let install = BootstrapStep::new(
            "Installing dependencies",
            self.python.clone(),
            vec![
                "-m".to_string(),
                "pip".to_string(),
                "install".to_string(),
                "-r".to_string(),
                path_arg(&self.clone_dir.join(MANIFEST_FILE)),
            ],
        );

        vec![sync, install]
    }

    /// Run the plan, stopping at the first failure
    pub async fn run<W: Write>(
        &self,
        runner: &dyn CommandRunner,
        progress: &mut W,
    ) -> Result<(), BootstrapError> {
        let clone_exists = self.clone_dir.exists();
        tracing::info!(
            repo = %self.repo_url,
            dir = %self.clone_dir.display(),
            clone_exists,
            "Bootstrapping"
        );
        writeln!(
            progress,
            "Setting up {} in {}",
            self.repo_url,
            self.clone_dir.display()
        )
        .map_err(BootstrapError::Progress)?;

        for step in self.plan(clone_exists) {
            tracing::info!(command = %step.display(), "{}", step.label);
            writeln!(progress, "{}...", step.label).map_err(BootstrapError::Progress)?;
            runner.run(&step).await?;
        }
        Ok(())
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
