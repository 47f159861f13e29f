/// Process Supervisor - spawn, feed, wait, kill
///
/// **Core Responsibility:**
/// Run one already-built command to completion or until its wall-clock
/// ceiling elapses, and report what happened.
///
/// **Rules:**
/// - stdin is written concurrently with output capture, so a child that
///   fills its stdout pipe before reading input cannot deadlock us
/// - the child leads its own process group; on timeout the whole group is
///   killed and any output is discarded
/// - a child killed by a signal reports `128 + signal` as its return code
/// - only failing to start the process is an `Err`
use crate::sandbox::TaskResult;
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Map an exit status to a shell-style return code
pub fn return_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}

/// Cap the data segment of the child before it execs. Inherited by
/// everything the child starts.
pub fn limit_memory(command: &mut Command, bytes: u64) {
    let limit = bytes as libc::rlim_t;
    // SAFETY: the closure only calls async-signal-safe libc functions and
    // does not allocate.
    unsafe {
        command.pre_exec(move || set_data_limit(limit));
    }
}

fn set_data_limit(limit: libc::rlim_t) -> io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    if unsafe { libc::getrlimit(libc::RLIMIT_DATA, &mut current) } != 0 {
        return Err(io::Error::last_os_error());
    }
    if limit > current.rlim_max {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }
    current.rlim_cur = limit;
    if unsafe { libc::setrlimit(libc::RLIMIT_DATA, &current) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn kill_group(pid: u32) {
    // SAFETY: plain syscall on a process group we created
    let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        // ESRCH: the group already exited between the timeout and the kill
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(pid = pid, error = %err, "Failed to kill process group");
        }
    }
}

/// Spawn `command`, stream `stdin` into it and wait up to `time_limit`
pub async fn supervise(
    mut command: Command,
    stdin: &[u8],
    time_limit: Option<Duration>,
) -> io::Result<TaskResult> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut command = tokio::process::Command::from(command);
    command.kill_on_drop(true);

    let start = Instant::now();
    let mut child = command.spawn()?;
    let pid = child.id();

    let pipe = child.stdin.take();
    let feed = async move {
        let Some(mut pipe) = pipe else { return };
        if let Err(e) = pipe.write_all(stdin).await {
            // The program is free to exit without consuming its input
            if e.kind() != io::ErrorKind::BrokenPipe {
                debug!(error = %e, "Failed to write stdin");
            }
        }
        // Dropping the pipe delivers EOF
    };
    let completion = async {
        let (_, output) = tokio::join!(feed, child.wait_with_output());
        output
    };

    let outcome = match time_limit {
        Some(limit) => tokio::time::timeout(limit, completion).await.ok(),
        None => Some(completion.await),
    };

    match outcome {
        Some(output) => {
            let output = output?;
            Ok(TaskResult {
                stdout: output.stdout,
                stderr: output.stderr,
                return_code: Some(return_code(output.status)),
                elapsed: start.elapsed(),
                timed_out: false,
            })
        }
        None => {
            if let Some(pid) = pid {
                kill_group(pid);
            }
            Ok(TaskResult {
                stdout: Vec::new(),
                stderr: Vec::new(),
                return_code: None,
                elapsed: start.elapsed(),
                timed_out: true,
            })
        }
    }
}
