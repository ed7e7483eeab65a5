use std::{path::PathBuf, process::Stdio, time::Duration};

use async_trait::async_trait;
use clap::Parser;
use tokio::{io::AsyncWriteExt, process::Command};
use tracing::{debug, warn};

/// Every external command gets this long, local or remote.
const EXEC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    fn failure(reason: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: reason.into(),
            status: 1,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct Config {
    /// Run privileged commands on this host over SSH instead of locally.
    #[clap(long, env = "SSH_HOST")]
    pub ssh_host: Option<String>,
    #[clap(long, env = "SSH_PORT", default_value_t = 22)]
    pub ssh_port: u16,
    #[clap(long, env = "SSH_USER", default_value = "root")]
    pub ssh_user: String,
    #[clap(long, env = "SSH_KEY_PATH")]
    pub ssh_key_path: Option<PathBuf>,
    /// Accept unknown remote host keys. Insecure; off by default.
    #[clap(long, env = "SSH_NO_HOST_CHECK")]
    pub ssh_insecure_no_host_check: bool,
}

/// Seam between the reconciliation engine and the host. Executor
/// failures are reported through `CmdOutput`, never as `Err` — callers
/// decide whether a bad exit status matters.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, sudo: bool, cmd: &str, args: &[&str]) -> CmdOutput;
    async fn run_piped(&self, sudo: bool, cmd: &str, args: &[&str], input: &[u8]) -> CmdOutput;

    /// True when commands land on another host, in which case config
    /// files must be installed through the runner rather than the
    /// local filesystem.
    fn is_remote(&self) -> bool {
        false
    }
}

/// Shells out to the local host, or tunnels the command over `ssh`
/// when a remote host is configured. Stdin piping works in both modes
/// since `ssh` forwards its own stdin to the remote command.
pub struct Shell {
    config: Config,
    timeout: Duration,
}

impl Shell {
    pub fn new(config: Config) -> Self {
        Self::with_timeout(config, EXEC_TIMEOUT)
    }

    pub fn with_timeout(config: Config, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    fn command(&self, sudo: bool, cmd: &str, args: &[&str]) -> Command {
        let mut words = Vec::with_capacity(args.len() + 2);
        if sudo {
            words.push("sudo".to_owned());
        }
        words.push(cmd.to_owned());
        words.extend(args.iter().map(|a| (*a).to_owned()));

        match &self.config.ssh_host {
            Some(host) => {
                let mut c = Command::new("ssh");
                if let Some(key) = &self.config.ssh_key_path {
                    c.arg("-i").arg(key);
                }
                let check = if self.config.ssh_insecure_no_host_check {
                    "StrictHostKeyChecking=no"
                } else {
                    "StrictHostKeyChecking=yes"
                };
                c.arg("-p")
                    .arg(self.config.ssh_port.to_string())
                    .arg("-o")
                    .arg(check)
                    .arg(format!("{}@{}", self.config.ssh_user, host))
                    .arg(words.join(" "));
                c
            }
            None => {
                let mut c = Command::new(&words[0]);
                c.args(&words[1..]);
                c
            }
        }
    }

    async fn wait(&self, cmd: &str, mut command: Command) -> CmdOutput {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to spawn {cmd}: {e}");
                return CmdOutput::failure(e.to_string());
            }
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(out)) => CmdOutput {
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                status: out.status.code().unwrap_or(-1),
            },
            Ok(Err(e)) => {
                warn!("{cmd} failed: {e}");
                CmdOutput::failure(e.to_string())
            }
            Err(_) => {
                warn!("{cmd} timed out after {:?}", self.timeout);
                CmdOutput::failure("command timed out")
            }
        }
    }
}

#[async_trait]
impl CommandRunner for Shell {
    fn is_remote(&self) -> bool {
        self.config.ssh_host.is_some()
    }

    async fn run(&self, sudo: bool, cmd: &str, args: &[&str]) -> CmdOutput {
        debug!("exec: {cmd} {args:?}");
        self.wait(cmd, self.command(sudo, cmd, args)).await
    }

    async fn run_piped(&self, sudo: bool, cmd: &str, args: &[&str], input: &[u8]) -> CmdOutput {
        debug!("exec (piped): {cmd} {args:?}");
        let mut command = self.command(sudo, cmd, args);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!("failed to spawn {cmd}: {e}");
                return CmdOutput::failure(e.to_string());
            }
        };

        // The stdin write counts against the timeout too, so a child
        // that never drains its pipe cannot stall past the deadline.
        let feed_and_wait = async {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).await?;
                // Closes the stream so the child sees EOF.
                drop(stdin);
            }
            child.wait_with_output().await
        };

        match tokio::time::timeout(self.timeout, feed_and_wait).await {
            Ok(Ok(out)) => CmdOutput {
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
                status: out.status.code().unwrap_or(-1),
            },
            Ok(Err(e)) => {
                warn!("{cmd} failed: {e}");
                CmdOutput::failure(e.to_string())
            }
            Err(_) => {
                warn!("{cmd} timed out after {:?}", self.timeout);
                CmdOutput::failure("command timed out")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        Config {
            ssh_host: None,
            ssh_port: 22,
            ssh_user: "root".to_owned(),
            ssh_key_path: None,
            ssh_insecure_no_host_check: false,
        }
    }

    fn local() -> Shell {
        Shell::new(config())
    }

    #[tokio::test]
    async fn captures_stdout_and_status() {
        let out = local().run(false, "echo", &["hello"]).await;
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn missing_binary_is_a_soft_failure() {
        let out = local().run(false, "wgadmin-no-such-binary", &[]).await;
        assert!(!out.success());
        assert!(!out.stderr.is_empty());
    }

    #[tokio::test]
    async fn pipes_stdin_through() {
        let out = local().run_piped(false, "cat", &[], b"key-material").await;
        assert!(out.success());
        assert_eq!(out.stdout, "key-material");
    }

    #[tokio::test]
    async fn overrunning_commands_are_cut_off() {
        let shell = Shell::with_timeout(config(), Duration::from_millis(100));
        let out = shell.run(false, "sleep", &["5"]).await;
        assert!(!out.success());
        assert!(out.stdout.is_empty());
        assert!(out.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn piped_commands_honor_the_deadline_too() {
        let shell = Shell::with_timeout(config(), Duration::from_millis(100));
        let out = shell.run_piped(false, "sleep", &["5"], b"ignored").await;
        assert!(!out.success());
        assert!(out.stderr.contains("timed out"));
    }
}
