use crate::prelude::*;
use crate::util::StrExt;
use crate::{err, Result};
use std::collections::VecDeque;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Max number of trailing stderr characters attached to the error message
const MAX_STDERR_TAIL: usize = 600;

/// Max number of trailing stderr lines remembered by [`run_streaming`]
const MAX_STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ProcessError {
    #[error("Couldn't spawn `{program}` (is it installed?). Command:\n{cmd}")]
    Spawn {
        program: String,
        cmd: String,
        source: std::io::Error,
    },

    #[error("`{program}` invocation failed with status {status}. Command:\n{cmd}\nStderr:\n{stderr}")]
    Status {
        program: String,
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },
}

fn display_cmd<S: AsRef<str>>(program: &str, args: &[S]) -> Result<String> {
    let display_args = shlex::try_join(args.iter().map(AsRef::as_ref)).fatal_ctx(|| {
        format!(
            "Couldn't run program that contains a nul byte: {program:?} {:?}",
            args.iter().map(AsRef::as_ref).collect::<Vec<_>>()
        )
    })?;

    Ok(format!("{program} {display_args}"))
}

fn stderr_tail(stderr: &str) -> String {
    let stderr = stderr.trim();
    let skip = stderr.chars().count().saturating_sub(MAX_STDERR_TAIL);
    let start = stderr.char_indices().nth(skip).map_or(0, |(idx, _)| idx);
    stderr[start..].to_owned()
}

fn spawn_error(program: &str, cmd: String) -> impl FnOnce(std::io::Error) -> crate::Error + '_ {
    move |source| {
        err!(ProcessError::Spawn {
            program,
            cmd,
            source
        })
    }
}

/// Runs the program to completion and returns its stdout.
/// Non-zero exit status is reported as [`ProcessError::Status`].
pub(crate) async fn run<S: AsRef<str>>(program: &str, args: &[S]) -> Result<Vec<u8>> {
    let cmd = display_cmd(program, args)?;

    debug!(%cmd, "Running program");

    let output = tokio::process::Command::new(program)
        .args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(spawn_error(program, cmd.clone()))?;

    let status = output.status;

    if !status.success() {
        return Err(err!(ProcessError::Status {
            program,
            cmd,
            status,
            stderr: stderr_tail(&String::from_utf8_lossy(&output.stderr)),
        }));
    }

    Ok(output.stdout)
}

pub(crate) async fn run_utf8<S: AsRef<str>>(program: &str, args: &[S]) -> Result<String> {
    let bytes = run(program, args).await?;
    String::from_utf8(bytes).fatal_ctx(|| format!("Bad output of `{program}` (invalid UTF-8)"))
}

/// Runs the program and feeds every line of its stdout and stderr to
/// `on_line` as soon as it is printed. The lines of the two streams are
/// interleaved in the order they become available.
///
/// The child process is killed if the returned future is dropped.
pub(crate) async fn run_streaming<S, F, Fut>(program: &str, args: &[S], mut on_line: F) -> Result
where
    S: AsRef<str>,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = ()>,
{
    let cmd = display_cmd(program, args)?;

    debug!(%cmd, "Running program with streaming output");

    let mut child = tokio::process::Command::new(program)
        .args(args.iter().map(AsRef::as_ref))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(spawn_error(program, cmd.clone()))?;

    let stdout = child
        .stdout
        .take()
        .fatal_ctx(|| "BUG: stdout of the child process must be piped")?;
    let stderr = child
        .stderr
        .take()
        .fatal_ctx(|| "BUG: stderr of the child process must be piped")?;

    let mut stdout = BufReader::new(stdout).lines();
    let mut stderr = BufReader::new(stderr).lines();

    let mut tail = VecDeque::with_capacity(MAX_STDERR_TAIL_LINES);
    let mut stdout_open = true;
    let mut stderr_open = true;

    while stdout_open || stderr_open {
        tokio::select! {
            line = stdout.next_line(), if stdout_open => {
                match line.fatal_ctx(|| format!("Failed to read stdout of `{program}`"))? {
                    Some(line) => on_line(line).await,
                    None => stdout_open = false,
                }
            }
            line = stderr.next_line(), if stderr_open => {
                match line.fatal_ctx(|| format!("Failed to read stderr of `{program}`"))? {
                    Some(line) => {
                        if tail.len() == MAX_STDERR_TAIL_LINES {
                            tail.pop_front();
                        }
                        tail.push_back(line.truncate_chars(MAX_STDERR_TAIL).to_owned());
                        on_line(line).await;
                    }
                    None => stderr_open = false,
                }
            }
        }
    }

    let status = child
        .wait()
        .await
        .fatal_ctx(|| format!("Failed to wait for `{program}` to exit"))?;

    if !status.success() {
        let stderr = Vec::from(tail).join("\n");
        return Err(err!(ProcessError::Status {
            program,
            cmd,
            status,
            stderr: stderr_tail(&stderr),
        }));
    }

    Ok(())
}
