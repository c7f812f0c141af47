//! Subprocess execution helpers.
//!
//! Command lines are plain `Vec<String>` values; the conversion to the
//! OS-level argv happens once, inside `std::process::Command`, at the fork
//! boundary.

use crate::error::{Error, Result};
use std::io;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

/// Runs a command and returns its captured standard output.
///
/// Standard error is inherited so diagnostics from helpers such as
/// `dropbearkey` reach the operator. Any non-zero exit or signal death is
/// an error.
pub fn output_of(argv: &[String]) -> Result<String> {
    let (program, args) = argv.split_first().ok_or(Error::EmptyCommand)?;
    debug!(command = %argv.join(" "), "executing");

    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .map_err(|source| Error::SpawnFailed {
            command: argv.join(" "),
            source,
        })?;

    if !output.status.success() {
        return Err(Error::CommandFailed {
            command: argv.join(" "),
            status: describe_status(output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Forks, runs `pre_exec` in the child, execs `argv`, and waits.
///
/// Returns the child's exit code. The closure runs after `fork` and before
/// `exec`, so it must restrict itself to async-signal-safe operations; an
/// error it returns aborts the child and surfaces here as a spawn failure.
/// Signal death of the child is an error; a non-zero exit code is not, the
/// caller decides what it means.
pub fn fork_exec_wait<F>(argv: &[String], pre_exec: F) -> Result<i32>
where
    F: FnMut() -> io::Result<()> + Send + Sync + 'static,
{
    let (program, args) = argv.split_first().ok_or(Error::EmptyCommand)?;
    debug!(command = %argv.join(" "), "executing with pre-exec actions");

    let mut command = Command::new(program);
    command.args(args);
    // SAFETY: the closure is documented to perform only async-signal-safe
    // operations between fork and exec (chroot, prctl, setgroups,
    // setresgid/uid). It does not allocate or take locks.
    unsafe {
        command.pre_exec(pre_exec);
    }

    let status = command.status().map_err(|source| Error::SpawnFailed {
        command: argv.join(" "),
        source,
    })?;

    match status.code() {
        Some(code) => {
            debug!(command = %argv.join(" "), code, "child exited");
            Ok(code)
        }
        None => Err(Error::CommandFailed {
            command: argv.join(" "),
            status: describe_status(status),
        }),
    }
}

fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exited with status {code}"),
        (None, Some(signal)) => format!("terminated by signal {signal}"),
        (None, None) => "terminated abnormally".to_string(),
    }
}

// =============================================================================
// Tests
// =============================================================================
