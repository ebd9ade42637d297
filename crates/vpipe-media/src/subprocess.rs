//! Cancellable subprocess driver.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{MediaError, MediaResult};

/// How much trailing stderr is kept for error reporting.
const STDERR_TAIL_BYTES: usize = 8 * 1024;

/// A subprocess invocation with incremental output sinks.
///
/// Both output streams are drained line by line into caller-provided
/// sinks while the process runs. Cancellation kills the process and
/// surfaces as [`MediaError::Cancelled`]; exit codes outside the
/// accepted set surface as [`MediaError::CommandFailed`] carrying the
/// stderr tail.
#[derive(Debug, Clone)]
pub struct Subprocess {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    accepted_exit_codes: Vec<i32>,
}

impl Subprocess {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            accepted_exit_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn accept_exit_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.accepted_exit_codes = codes.into_iter().collect();
        self
    }

    /// Run to completion, feeding output lines to the sinks.
    pub async fn run<O, E>(
        &self,
        mut cancel: watch::Receiver<bool>,
        mut on_stdout: O,
        mut on_stderr: E,
    ) -> MediaResult<i32>
    where
        O: FnMut(&str),
        E: FnMut(&str),
    {
        if *cancel.borrow() {
            return Err(MediaError::Cancelled);
        }

        debug!("Running: {} {}", self.program, self.args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn()?;

        let stdout = child.stdout.take().ok_or_else(|| {
            MediaError::Io(std::io::Error::other("stdout not captured"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            MediaError::Io(std::io::Error::other("stderr not captured"))
        })?;
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();

        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut stderr_tail = String::new();

        while !(stdout_done && stderr_done) {
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => match line? {
                    Some(line) => on_stdout(&line),
                    None => stdout_done = true,
                },
                line = stderr_lines.next_line(), if !stderr_done => match line? {
                    Some(line) => {
                        push_tail(&mut stderr_tail, &line);
                        on_stderr(&line);
                    }
                    None => stderr_done = true,
                },
                _ = cancelled(&mut cancel) => {
                    info!("Cancelled, killing {}", self.program);
                    child.kill().await.ok();
                    return Err(MediaError::Cancelled);
                }
            }
        }

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancelled(&mut cancel) => {
                info!("Cancelled, killing {}", self.program);
                child.kill().await.ok();
                return Err(MediaError::Cancelled);
            }
        };

        let code = status.code().unwrap_or(-1);
        if self.accepted_exit_codes.contains(&code) {
            Ok(code)
        } else {
            Err(MediaError::CommandFailed {
                program: self.program.clone(),
                code,
                stderr: stderr_tail,
            })
        }
    }
}

/// Resolves once the signal flips to cancelled; pends forever otherwise.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without cancelling: nothing will ever cancel us.
            std::future::pending::<()>().await;
        }
    }
}

fn push_tail(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() > STDERR_TAIL_BYTES {
        let cut = tail.len() - STDERR_TAIL_BYTES;
        // Keep the cut on a char boundary
        let cut = (cut..tail.len()).find(|i| tail.is_char_boundary(*i)).unwrap_or(0);
        tail.drain(..cut);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let (_tx, rx) = watch::channel(false);
        let mut lines = Vec::new();

        let code = Subprocess::new("echo")
            .arg("hello")
            .run(rx, |l| lines.push(l.to_string()), |_| {})
            .await
            .unwrap();

        assert_eq!(code, 0);
        assert_eq!(lines, vec!["hello"]);
    }

    #[tokio::test]
    async fn rejects_unaccepted_exit_codes() {
        let (_tx, rx) = watch::channel(false);

        let err = Subprocess::new("false")
            .run(rx, |_| {}, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::CommandFailed { code: 1, .. }));
    }

    #[tokio::test]
    async fn accepted_nonzero_exit_is_ok() {
        let (_tx, rx) = watch::channel(false);

        let code = Subprocess::new("false")
            .accept_exit_codes([0, 1])
            .run(rx, |_| {}, |_| {})
            .await
            .unwrap();

        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn pre_cancelled_signal_short_circuits() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).ok();

        let err = Subprocess::new("sleep")
            .arg("5")
            .run(rx, |_| {}, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Cancelled));
    }

    #[tokio::test]
    async fn cancellation_kills_a_running_process() {
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            Subprocess::new("sleep").arg("30").run(rx, |_| {}, |_| {}).await
        });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tx.send(true).ok();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, MediaError::Cancelled));
    }
}
