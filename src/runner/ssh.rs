//! Runner executing commands on a remote node through the system `ssh` client.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::RunError;

use super::context::{Context, RunOptions};
use super::contract::Runner;
use super::process::run_process;

/// Exit status `ssh` itself uses for connection and authentication failures.
const SSH_FAILURE_EXIT_CODE: i32 = 255;

/// Runs commands on a remote host over SSH.
#[derive(Debug, Clone)]
pub struct SshRunner {
    /// Remote host name or address.
    host: String,
    /// Remote user.
    user: String,
    /// SSH port.
    port: u16,
    /// Private key passed with `-i`.
    identity_file: Option<PathBuf>,
}

impl SshRunner {
    /// Creates a runner for `user@host` on port 22.
    #[must_use]
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: 22,
            identity_file: None,
        }
    }

    /// Sets the SSH port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the private key file.
    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Arguments passed to `ssh` ahead of the remote command.
    fn ssh_args(&self) -> Vec<String> {
        let mut args = vec![
            String::from("-o"),
            String::from("BatchMode=yes"),
            String::from("-o"),
            String::from("StrictHostKeyChecking=accept-new"),
            String::from("-p"),
            self.port.to_string(),
        ];
        if let Some(key) = &self.identity_file {
            args.push(String::from("-i"));
            args.push(key.display().to_string());
        }
        args.push(format!("{}@{}", self.user, self.host));
        args.push(String::from("--"));
        args
    }
}

#[async_trait]
impl Runner for SshRunner {
    async fn run_command(
        &self,
        ctx: &Context,
        command: &str,
        options: &RunOptions,
    ) -> Result<String, RunError> {
        debug!(target_node = %self.target(), command = %command, "running command");

        let mut cmd = Command::new("ssh");
        cmd.args(self.ssh_args()).arg(command);

        match run_process(cmd, command, ctx, options).await {
            Err(RunError::NonZeroExit { code, .. }) if code == SSH_FAILURE_EXIT_CODE => {
                Err(RunError::transport(format!(
                    "ssh to {} failed (exit {SSH_FAILURE_EXIT_CODE})",
                    self.target()
                )))
            }
            other => other,
        }
    }

    fn target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}
