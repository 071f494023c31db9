use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ResourceError;

/// One external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl ExternalCommand {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
        }
    }

    pub fn git<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new("git", args)
    }

    pub fn npm<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(npm_program(), args)
    }

    pub fn current_dir(mut self, cwd: &Path) -> Self {
        self.cwd = Some(cwd.to_path_buf());
        self
    }
}

/// Command line with credentials redacted, for logs and errors.
impl fmt::Display for ExternalCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", sanitize_arg_for_log(arg))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined(&self) -> String {
        let stdout = self.stdout.trim();
        let stderr = self.stderr.trim();
        match (stdout.is_empty(), stderr.is_empty()) {
            (true, true) => format!("exit code {:?}", self.exit_code),
            (false, true) => stdout.to_string(),
            (true, false) => stderr.to_string(),
            (false, false) => format!("{stdout}\n{stderr}"),
        }
    }
}

/// Executes external commands. Swappable so tests never spawn processes.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion. Only a failure to spawn is an `Err`; a non-zero exit is reported
    /// through [`CommandOutput::exit_code`].
    async fn run(&self, command: &ExternalCommand) -> Result<CommandOutput, ResourceError>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCommandRunner;

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(&self, command: &ExternalCommand) -> Result<CommandOutput, ResourceError> {
        let mut process = tokio::process::Command::new(&command.program);
        process.args(&command.args);
        if let Some(cwd) = &command.cwd {
            process.current_dir(cwd);
        }
        tracing::debug!("Running `{command}`");
        let output = process.output().await.map_err(|e| {
            ResourceError::Config(format!("Failed to run `{command}`: {e}"))
        })?;
        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run and turn a non-zero exit into [`ResourceError::CommandFailed`].
pub async fn run_checked(
    runner: &dyn CommandRunner,
    command: &ExternalCommand,
) -> Result<CommandOutput, ResourceError> {
    let output = runner.run(command).await?;
    if output.success() {
        return Ok(output);
    }
    Err(ResourceError::CommandFailed {
        command: command.to_string(),
        output: output.combined(),
    })
}

fn npm_program() -> &'static str {
    if cfg!(windows) { "npm.cmd" } else { "npm" }
}

fn sanitize_arg_for_log(arg: &str) -> String {
    let mut value = arg.to_string();

    if let Some((scheme, rest)) = value.split_once("://")
        && let Some((userinfo, host_rest)) = rest.split_once('@')
        && !userinfo.is_empty()
        && !userinfo.contains('/')
    {
        value = format!("{scheme}://***@{host_rest}");
    }

    // Best-effort redaction for query/kv secrets.
    for marker in [
        "token=",
        "access_token=",
        "auth=",
        "password=",
        "passwd=",
        "apikey=",
        "api_key=",
    ] {
        if let Some(pos) = value.to_ascii_lowercase().find(marker) {
            let value_start = pos + marker.len();
            let value_end = value[value_start..]
                .find(['&', ';', ' '])
                .map(|idx| value_start + idx)
                .unwrap_or(value.len());
            value.replace_range(value_start..value_end, "***");
        }
    }

    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_arg_for_log_redacts_credentials() {
        let sanitized =
            sanitize_arg_for_log("https://token-123@github.com/org/repo.git?access_token=abc");
        assert!(!sanitized.contains("token-123"));
        assert!(!sanitized.contains("access_token=abc"));
        assert!(sanitized.contains("***@github.com"));
    }

    #[test]
    fn test_display_redacts_args() {
        let command = ExternalCommand::git(["clone", "https://user:pw@example.com/a/b", "/tmp/x"]);
        assert_eq!(
            command.to_string(),
            "git clone https://***@example.com/a/b /tmp/x"
        );
    }

    #[test]
    fn test_combined_output() {
        let output = CommandOutput {
            exit_code: Some(1),
            stdout: "out\n".to_string(),
            stderr: "err\n".to_string(),
        };
        assert_eq!(output.combined(), "out\nerr");
        assert_eq!(CommandOutput { exit_code: Some(2), ..Default::default() }.combined(), "exit code Some(2)");
    }

    #[tokio::test]
    async fn test_run_checked_reports_failure_output() {
        struct Failing;

        #[async_trait]
        impl CommandRunner for Failing {
            async fn run(&self, _command: &ExternalCommand) -> Result<CommandOutput, ResourceError> {
                Ok(CommandOutput {
                    exit_code: Some(128),
                    stdout: String::new(),
                    stderr: "fatal: repository not found".to_string(),
                })
            }
        }

        let err = run_checked(&Failing, &ExternalCommand::git(["clone", "x"]))
            .await
            .unwrap_err();
        match err {
            ResourceError::CommandFailed { command, output } => {
                assert_eq!(command, "git clone x");
                assert_eq!(output, "fatal: repository not found");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
