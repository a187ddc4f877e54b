//! Running external programs with a deadline.

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

/// Why an external program did not produce usable output.
#[derive(Debug)]
pub(crate) enum ProcessFailure {
    Spawn(std::io::Error),
    TimedOut(Duration),
    Exit { code: Option<i32>, stderr: String },
}

impl std::fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessFailure::Spawn(e) => write!(f, "failed to start: {}", e),
            ProcessFailure::TimedOut(budget) => write!(f, "did not finish within {:?}", budget),
            ProcessFailure::Exit { code, stderr } => match code {
                Some(code) => write!(f, "exited with status {}: {}", code, stderr.trim()),
                None => write!(f, "terminated by signal: {}", stderr.trim()),
            },
        }
    }
}

/// Run `program` with `args`, killing it if it outlives `timeout`.
///
/// Returns the captured output of a successful (exit status 0) run.
pub(crate) async fn run<I, S>(program: &str, args: I, timeout: Duration) -> Result<Output, ProcessFailure>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    debug!(program, "Running external command");

    let child = command.spawn().map_err(ProcessFailure::Spawn)?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(ProcessFailure::Spawn)?,
        Err(_) => return Err(ProcessFailure::TimedOut(timeout)),
    };

    if output.status.success() {
        Ok(output)
    } else {
        Err(ProcessFailure::Exit {
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
