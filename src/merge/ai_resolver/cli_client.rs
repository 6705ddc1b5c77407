//! CLI agent model client
//!
//! Runs a locally installed coding agent (Claude Code by default, `claude -p`)
//! in print mode, feeding the prompt on stdin and returning stdout.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use crate::merge::ai_resolver::AiClient;
use crate::merge::config::AgentConfig;

pub struct CliAgentClient {
    command: String,
    args: Vec<String>,
    model: Option<String>,
    working_dir: PathBuf,
    timeout_secs: u64,
}

impl CliAgentClient {
    pub fn new(agent: &AgentConfig, working_dir: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            command: agent.command.clone(),
            args: agent.args.clone(),
            model: agent.model.clone(),
            working_dir: working_dir.into(),
            timeout_secs,
        }
    }

    /// Whether the agent binary can be found on PATH
    pub fn is_available(&self) -> bool {
        which::which(&self.command).is_ok()
    }

    fn build_command(&self) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args);
        if let Some(model) = &self.model {
            cmd.arg("--model").arg(model);
        }
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run_agent(&self, prompt: &str) -> Result<String, String> {
        if !self.is_available() {
            return Err(format!(
                "{} CLI not found. Please ensure it is installed and in PATH.",
                self.command
            ));
        }

        log::info!("[CliAgentClient] Running {} for conflict resolution", self.command);

        let mut child = self
            .build_command()
            .spawn()
            .map_err(|e| format!("Failed to spawn {}: {}", self.command, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| format!("Failed to write prompt to {}: {}", self.command, e))?;
            // Closing stdin signals end of prompt
            drop(stdin);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| format!("Failed to wait for {}: {}", self.command, e))?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            if stdout.trim().is_empty() {
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if !stderr.trim().is_empty() {
                    log::warn!("[CliAgentClient] {} stderr: {}", self.command, stderr);
                }
                Err(format!("{} returned empty output", self.command))
            } else {
                Ok(stdout)
            }
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            Err(format!(
                "{} failed with exit code {:?}: {}",
                self.command,
                output.status.code(),
                stderr.trim()
            ))
        }
    }
}

#[async_trait]
impl AiClient for CliAgentClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String, String> {
        let prompt = format!("{}\n\n{}", system_prompt, user_prompt);
        match timeout(Duration::from_secs(self.timeout_secs), self.run_agent(&prompt)).await {
            Ok(result) => result,
            Err(_) => Err(format!("Timeout after {} seconds", self.timeout_secs)),
        }
    }
}
