//! Sequential execution of a backup's shell commands.

use super::template::expand_command;
use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, error, info};

/// Shell used when none is configured.
pub const DEFAULT_SHELL: &str = "/bin/bash";

/// Errors raised when a command line cannot be handed to the shell at all.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("failed to spawn {shell}: {source}")]
    Spawn {
        shell: String,
        #[source]
        source: std::io::Error,
    },
}

/// Captured result of one shell invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    /// Everything written to stdout, then everything written to stderr.
    /// The two streams are captured separately, so writes are not interleaved.
    pub stdout_stderr: String,
}

/// Port for running a command line through a shell.
#[async_trait]
pub trait ShellRunner: Send + Sync {
    async fn run(&self, command_line: &str) -> Result<CommandOutput, ShellError>;
}

/// Runs command lines as `<shell> -c <line>`.
#[derive(Debug, Clone)]
pub struct BashShell {
    program: String,
}

impl BashShell {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for BashShell {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

#[async_trait]
impl ShellRunner for BashShell {
    async fn run(&self, command_line: &str) -> Result<CommandOutput, ShellError> {
        let output = Command::new(&self.program)
            .arg("-c")
            .arg(command_line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| ShellError::Spawn {
                shell: self.program.clone(),
                source,
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        Ok(CommandOutput {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout_stderr: combined,
        })
    }
}

/// Outcome of a single pipeline step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        stdout_stderr: String,
    },
    /// The shell could not be started.
    SpawnFailed { error: String },
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// Position in the job's command list.
    pub index: usize,
    /// Command as written in the configuration.
    pub template: String,
    /// Command after `{path}` expansion.
    pub command: String,
    pub status: CommandStatus,
}

impl CommandOutcome {
    pub fn succeeded(&self) -> bool {
        self.status == CommandStatus::Succeeded
    }
}

/// Ordered per-command outcomes of one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    pub outcomes: Vec<CommandOutcome>,
}

impl PipelineReport {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(CommandOutcome::succeeded)
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.succeeded()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &CommandOutcome> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

/// Executes command templates in order against one artifact path.
///
/// A failing step never stops the pipeline.
#[derive(Clone)]
pub struct CommandPipeline {
    shell: Arc<dyn ShellRunner>,
}

impl CommandPipeline {
    pub fn new(shell: Arc<dyn ShellRunner>) -> Self {
        Self { shell }
    }

    pub async fn execute(&self, commands: &[String], resolved_path: &str) -> PipelineReport {
        let mut report = PipelineReport::default();

        for (index, template) in commands.iter().enumerate() {
            let command = expand_command(template, resolved_path);
            debug!(command = %command, "running command");

            let status = match self.shell.run(&command).await {
                Ok(result) if result.success => {
                    info!(command = %template, "success");
                    CommandStatus::Succeeded
                }
                Ok(result) => {
                    error!(
                        command = %template,
                        exit_code = ?result.exit_code,
                        output = %result.stdout_stderr,
                        "command failed"
                    );
                    CommandStatus::Failed {
                        exit_code: result.exit_code,
                        stdout_stderr: result.stdout_stderr,
                    }
                }
                Err(e) => {
                    error!(command = %template, "command could not be started: {}", e);
                    CommandStatus::SpawnFailed {
                        error: e.to_string(),
                    }
                }
            };

            report.outcomes.push(CommandOutcome {
                index,
                template: template.clone(),
                command,
                status,
            });
        }

        report
    }
}
