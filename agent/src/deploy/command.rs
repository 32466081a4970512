//! Shell-template executor

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::{ContainerStatus, ExecutionResult, Executor, HealthProbe, Intent, LivenessProbe};
use crate::errors::KeeperError;
use crate::models::restart::ProbeResult;
use crate::storage::settings::SettingsProvider;

/// Operator-configured shell commands.
///
/// Templates may use `{container}`, `{image}` and `{tag}`; values are
/// single-quoted before substitution.
#[derive(Debug, Clone, Default)]
pub struct CommandTemplates {
    pub apply: Option<String>,
    pub restart: Option<String>,
    pub health: Option<String>,
    pub status: Option<String>,
}

impl CommandTemplates {
    pub fn from_settings(settings: &dyn SettingsProvider) -> Self {
        let get = |key: &str| settings.get(key).filter(|v| !v.trim().is_empty());
        Self {
            apply: get("exec.apply_command"),
            restart: get("exec.restart_command"),
            health: get("exec.health_command"),
            status: get("exec.status_command"),
        }
    }
}

/// Runs intents and probes through `sh -c`
pub struct CommandExecutor {
    templates: CommandTemplates,
    timeout: Duration,
}

struct CommandOutput {
    success: bool,
    stdout: String,
    output: String,
    duration: Duration,
}

impl CommandExecutor {
    pub fn new(templates: CommandTemplates, timeout: Duration) -> Self {
        Self { templates, timeout }
    }

    async fn run(&self, command: &str) -> CommandOutput {
        let started = Instant::now();
        debug!("Running command: {}", command);

        let child = Command::new("sh")
            .args(["-c", command])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return CommandOutput {
                    success: false,
                    stdout: String::new(),
                    output: format!("Failed to spawn command: {}", e),
                    duration: started.elapsed(),
                }
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr);
                let mut combined = stdout.clone();
                if !stderr.is_empty() {
                    combined.push_str(&stderr);
                }
                CommandOutput {
                    success: output.status.success(),
                    stdout,
                    output: combined,
                    duration: started.elapsed(),
                }
            }
            Ok(Err(e)) => CommandOutput {
                success: false,
                stdout: String::new(),
                output: format!("Command failed: {}", e),
                duration: started.elapsed(),
            },
            Err(_) => CommandOutput {
                success: false,
                stdout: String::new(),
                output: format!("Command timed out after {:?}", self.timeout),
                duration: started.elapsed(),
            },
        }
    }
}

/// Substitute placeholders with single-quoted values
pub fn render(template: &str, container: &str, image: &str, tag: &str) -> String {
    template
        .replace("{container}", &shell_quote(container))
        .replace("{image}", &shell_quote(image))
        .replace("{tag}", &shell_quote(tag))
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(&self, intent: Intent) -> ExecutionResult {
        let command = match &intent {
            Intent::SetTag { container, image, tag } => {
                self.templates.apply.as_deref().map(|t| render(t, container, image, tag))
            }
            Intent::Restart { container } => {
                self.templates.restart.as_deref().map(|t| render(t, container, "", ""))
            }
        };

        let Some(command) = command else {
            warn!(container = intent.container(), "No command configured for {:?}", intent);
            return ExecutionResult::failed("No command configured", Duration::ZERO);
        };

        let output = self.run(&command).await;
        info!(
            container = intent.container(),
            success = output.success,
            "Executed command in {:?}",
            output.duration
        );
        ExecutionResult {
            success: output.success,
            output: output.output,
            duration: output.duration,
        }
    }
}

#[async_trait]
impl HealthProbe for CommandExecutor {
    async fn probe(&self, container: &str) -> ProbeResult {
        let Some(template) = &self.templates.health else {
            return ProbeResult {
                healthy: true,
                detail: "no health command configured".to_string(),
            };
        };
        let output = self.run(&render(template, container, "", "")).await;
        ProbeResult {
            healthy: output.success,
            detail: output.output.trim().to_string(),
        }
    }
}

#[async_trait]
impl LivenessProbe for CommandExecutor {
    async fn status(&self, container: &str) -> Result<ContainerStatus, KeeperError> {
        let Some(template) = &self.templates.status else {
            return Ok(ContainerStatus::Unknown);
        };
        let output = self.run(&render(template, container, "", "")).await;
        if !output.success {
            return Err(KeeperError::ExecutionError(format!(
                "Status command failed for {}: {}",
                container,
                output.output.trim()
            )));
        }
        Ok(parse_status(&output.stdout))
    }
}

/// Map `docker inspect`-style status words
pub fn parse_status(stdout: &str) -> ContainerStatus {
    match stdout.trim().trim_matches('\'').to_ascii_lowercase().as_str() {
        "running" | "up" | "healthy" | "restarting" => ContainerStatus::Running,
        "exited" | "dead" | "stopped" | "created" => ContainerStatus::Exited,
        _ => ContainerStatus::Unknown,
    }
}
