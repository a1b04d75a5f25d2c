use anyhow::{Context, Result};
use std::process::{Command, Stdio};

/// Captured result of a host command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: &str) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: &str) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Trait for executing commands on the host being deployed to
pub trait CommandExecutor {
    /// Execute a program with arguments, capturing its output
    fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput>;

    /// Check if a command resolves on PATH
    fn check_command_exists(&self, command: &str) -> bool;

    /// Whether the current process may manage services, firewall and system files
    fn is_privileged(&self) -> Result<bool>;

    /// Execute and fail on a non-zero exit status
    fn execute_checked(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        let output = self.execute(program, args)?;
        if !output.success() {
            anyhow::bail!(
                "Command '{} {}' failed with exit code {}: {}",
                program,
                args.join(" "),
                output.status.unwrap_or(-1),
                output.stderr.trim()
            );
        }
        Ok(output)
    }
}

/// Executor that runs commands directly on this machine
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExecutor;

impl CommandExecutor for LocalExecutor {
    fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        tracing::debug!(program, ?args, "executing");
        let output = Command::new(program)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute command: {}", program))?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn check_command_exists(&self, command: &str) -> bool {
        which::which(command).is_ok()
    }

    #[cfg(unix)]
    fn is_privileged(&self) -> Result<bool> {
        // SAFETY: geteuid has no preconditions and cannot fail
        Ok(unsafe { libc::geteuid() } == 0)
    }

    #[cfg(windows)]
    fn is_privileged(&self) -> Result<bool> {
        // `net session` only succeeds from an elevated token
        Ok(self.execute("net", &["session"])?.success())
    }
}
