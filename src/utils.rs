use std::ffi::OsStr;
use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::{info, warn};

/// Renders a command line for the logs, e.g. `git clone --quiet <url> <dir>`.
pub fn display_command<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}

/// Prepares a command that is killed if the future driving it is dropped,
/// which happens on timeout or when the client goes away.
pub fn command_in<S: AsRef<OsStr>>(program: S, cwd: &Path) -> Command {
    let mut cmd = Command::new(program);
    cmd.current_dir(cwd).stdin(Stdio::null()).kill_on_drop(true);
    cmd
}

/// Runs the command to completion and captures stdout/stderr.
pub async fn run_captured(cmd: &mut Command) -> std::io::Result<Output> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).output().await
}

/// Runs the command while forwarding every stdout/stderr line to the log.
/// Returns the exit status; interpreting it is left to the caller.
pub async fn run_streaming(mut cmd: Command, label: &str) -> std::io::Result<ExitStatus> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    let mut child = cmd.spawn()?;

    let stdout = child.stdout.take().map(|out| {
        LinesStream::new(BufReader::new(out).lines()).map(|line| (false, line))
    });
    let stderr = child.stderr.take().map(|err| {
        LinesStream::new(BufReader::new(err).lines()).map(|line| (true, line))
    });

    match (stdout, stderr) {
        (Some(stdout), Some(stderr)) => {
            let lines = stdout.merge(stderr);
            tokio::pin!(lines);
            while let Some((is_stderr, line)) = lines.next().await {
                match line {
                    Ok(line) if is_stderr => {
                        warn!(target: "preview_relay::build_output", "[{}] {}", label, line)
                    }
                    Ok(line) => info!(target: "preview_relay::build_output", "[{}] {}", label, line),
                    Err(e) => {
                        warn!("[{}] could not read output: {}", label, e);
                        break;
                    }
                }
            }
        }
        _ => warn!("[{}] output pipes unavailable, not streaming", label),
    }

    child.wait().await
}

/// Returns the trimmed stderr, falling back to stdout when stderr is empty.
pub fn failure_output(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    } else {
        stderr.trim().to_string()
    }
}
