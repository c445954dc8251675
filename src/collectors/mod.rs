pub mod network;
pub mod status;
pub mod system;

use crate::error::ProbeError;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;

/// Runs `program` with `args` and returns its stdout. A non-zero exit or an
/// elapsed `timeout` is an error; the child is killed when the future drops.
pub async fn run_command(
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String, ProbeError> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ProbeError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let output = match time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(source)) => {
            return Err(ProbeError::Spawn {
                program: program.to_string(),
                source,
            })
        }
        Err(_elapsed) => {
            return Err(ProbeError::Timeout {
                probe: program.to_string(),
                timeout,
            })
        }
    };

    if !output.status.success() {
        return Err(ProbeError::ExitStatus {
            program: program.to_string(),
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
