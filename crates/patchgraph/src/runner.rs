//! External process execution.
//!
//! Every interaction with the sound tools and the routing daemon goes through
//! [`CommandRunner`], so the engine can be driven by [`crate::testing::FakeRig`]
//! in tests and by [`SystemRunner`] in production.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("could not launch {program}: {source}")]
    Launch {
        program: String,
        source: std::io::Error,
    },

    #[error("lost track of {program}: {source}")]
    Wait {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with status {}", display_code(.code))]
    Exit { program: String, code: Option<i32> },

    #[error("{program} exited during startup with status {}", display_code(.code))]
    EarlyExit { program: String, code: Option<i32> },

    #[error("{program} timed out")]
    TimedOut { program: String },

    #[error("bridge {0} is already running")]
    AlreadyRunning(String),
}

fn display_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "signal".to_string(),
    }
}

/// Captured result of a finished (or timed-out) command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal or by our timeout.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }

    /// stdout followed by stderr, the way a terminal would interleave them
    /// for tools that write their report to one and diagnostics to the other.
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        text.push_str(&self.stdout);
        if !self.stdout.is_empty() && !self.stdout.ends_with('\n') && !self.stderr.is_empty() {
            text.push('\n');
        }
        text.push_str(&self.stderr);
        text
    }

    /// Treat anything but a clean zero exit as an error.
    pub fn check(self, program: &str) -> Result<Self, CommandError> {
        if self.timed_out {
            Err(CommandError::TimedOut {
                program: program.to_string(),
            })
        } else if self.code == Some(0) {
            Ok(self)
        } else {
            Err(CommandError::Exit {
                program: program.to_string(),
                code: self.code,
            })
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run to completion, or until `timeout` elapses. A timed-out command is
    /// killed and whatever it printed so far is returned with `timed_out` set.
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError>;

    /// Start a long-running process registered under `key`. Succeeds once the
    /// process has survived `grace`.
    async fn spawn(
        &self,
        key: &str,
        invocation: &Invocation,
        grace: Duration,
    ) -> Result<(), CommandError>;

    /// Stop a process started by [`CommandRunner::spawn`]. Returns whether one was running.
    async fn terminate(&self, key: &str) -> Result<bool, CommandError>;
}

/// Runs real processes with `tokio::process`.
///
/// Bridge processes are owned by the runner and are killed when it is dropped.
/// A runner that never gets dropped (a crash, SIGKILL) leaves them running.
#[derive(Default)]
pub struct SystemRunner {
    bridges: Mutex<HashMap<String, Child>>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live bridge is registered under `key`. Exited ones are dropped.
    async fn is_running(&self, key: &str) -> bool {
        let mut bridges = self.bridges.lock().await;
        match bridges.get_mut(key).map(|child| child.try_wait()) {
            Some(Ok(None)) => true,
            Some(_) => {
                bridges.remove(key);
                false
            }
            None => false,
        }
    }
}

async fn read_all<R: AsyncRead + Unpin>(pipe: Option<R>) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            tracing::debug!("pipe read ended early: {}", e);
        }
    }
    buf
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        invocation: &Invocation,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, CommandError> {
        tracing::debug!(command = %invocation, "running");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Launch {
                program: invocation.program.clone(),
                source,
            })?;

        // Readers run on their own tasks so partial output survives a timeout.
        let stdout_task = tokio::spawn(read_all(child.stdout.take()));
        let stderr_task = tokio::spawn(read_all(child.stderr.take()));

        let wait_err = |source| CommandError::Wait {
            program: invocation.program.clone(),
            source,
        };

        let (code, timed_out) = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => (status.map_err(wait_err)?.code(), false),
                Err(_) => {
                    child.kill().await.map_err(wait_err)?;
                    (None, true)
                }
            },
            None => (child.wait().await.map_err(wait_err)?.code(), false),
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        Ok(CommandOutput {
            code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
        })
    }

    async fn spawn(
        &self,
        key: &str,
        invocation: &Invocation,
        grace: Duration,
    ) -> Result<(), CommandError> {
        if self.is_running(key).await {
            return Err(CommandError::AlreadyRunning(key.to_string()));
        }

        tracing::debug!(command = %invocation, key, "spawning bridge");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| CommandError::Launch {
                program: invocation.program.clone(),
                source,
            })?;

        // The lock is not held while the bridge proves itself.
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => Err(CommandError::EarlyExit {
                program: invocation.program.clone(),
                code: status.code(),
            }),
            Ok(Err(source)) => Err(CommandError::Wait {
                program: invocation.program.clone(),
                source,
            }),
            Err(_) => {
                let mut bridges = self.bridges.lock().await;
                if let Some(existing) = bridges.get_mut(key) {
                    if matches!(existing.try_wait(), Ok(None)) {
                        // lost a race with a concurrent spawn of the same key
                        drop(bridges);
                        if let Err(e) = child.kill().await {
                            tracing::debug!(key, "could not stop duplicate bridge: {}", e);
                        }
                        return Err(CommandError::AlreadyRunning(key.to_string()));
                    }
                }
                bridges.insert(key.to_string(), child);
                Ok(())
            }
        }
    }

    async fn terminate(&self, key: &str) -> Result<bool, CommandError> {
        let child = self.bridges.lock().await.remove(key);
        match child {
            Some(mut child) => {
                child.kill().await.map_err(|source| CommandError::Wait {
                    program: key.to_string(),
                    source,
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation::new("sh", ["-c", script])
    }

    #[tokio::test]
    async fn test_run_captures_both_streams() {
        let runner = SystemRunner::new();
        let out = runner
            .run(&sh("echo report; echo warning >&2"), None)
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "report\n");
        assert_eq!(out.stderr, "warning\n");
        assert_eq!(out.combined(), "report\nwarning\n");
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let runner = SystemRunner::new();
        let out = runner.run(&sh("exit 3"), None).await.unwrap();
        assert_eq!(out.code, Some(3));
        let err = out.check("sh").unwrap_err();
        assert_eq!(err.to_string(), "sh exited with status 3");
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_output() {
        let runner = SystemRunner::new();
        let out = runner
            .run(
                &sh("echo report; exec sleep 5"),
                Some(Duration::from_millis(200)),
            )
            .await
            .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert_eq!(out.stdout, "report\n");
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_error() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&Invocation::new("definitely-not-a-real-tool", ["-l"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Launch { .. }));
    }

    #[tokio::test]
    async fn test_spawn_and_terminate_bridge() {
        let runner = SystemRunner::new();
        let sleeper = Invocation::new("sleep", ["5"]);
        runner
            .spawn("dev_in", &sleeper, Duration::from_millis(100))
            .await
            .unwrap();

        let again = runner
            .spawn("dev_in", &sleeper, Duration::from_millis(100))
            .await;
        assert!(matches!(again, Err(CommandError::AlreadyRunning(_))));

        assert!(runner.terminate("dev_in").await.unwrap());
        assert!(!runner.terminate("dev_in").await.unwrap());
    }

    #[tokio::test]
    async fn test_terminate_not_blocked_by_bridge_startup() {
        let runner = SystemRunner::new();
        let sleeper = Invocation::new("sleep", ["5"]);

        let (spawned, other) = tokio::join!(
            runner.spawn("slow_in", &sleeper, Duration::from_secs(2)),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                tokio::time::timeout(Duration::from_millis(500), runner.terminate("other_out")).await
            }
        );

        spawned.unwrap();
        assert!(!other.expect("terminate waited on bridge startup").unwrap());
        assert!(runner.terminate("slow_in").await.unwrap());
    }

    #[tokio::test]
    async fn test_spawn_early_exit_fails() {
        let runner = SystemRunner::new();
        let err = runner
            .spawn("dev_out", &sh("exit 1"), Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::EarlyExit { code: Some(1), .. }));
        assert!(!runner.terminate("dev_out").await.unwrap());
    }
}
