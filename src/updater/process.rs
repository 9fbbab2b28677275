//! Init-system (systemd/rc) and arbitrary-script update backends. Each spawns
//! a child process, waits with an optional timeout, and folds a non-zero exit
//! or timeout into the matching `CertDeployError` variant.
use std::path::Path;
use std::time::Duration;

use tokio::process::Command;

use crate::error::{CertDeployError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitKind {
    Systemd,
    Rc,
}

pub async fn run_init_command(
    exec: &str,
    args: &[&str],
    timeout: Option<Duration>,
    kind: InitKind,
) -> Result<()> {
    let output = run_with_timeout(Command::new(exec).args(args), timeout).await;
    let make_err = |msg: String| match kind {
        InitKind::Systemd => CertDeployError::systemd(msg),
        InitKind::Rc => CertDeployError::rc_service(msg),
    };
    match output {
        Err(err) => Err(make_err(format!("{exec} {}: {err}", args.join(" ")))),
        Ok(output) if !output.status.success() => Err(make_err(format!(
            "{exec} {} exited with {}: {}",
            args.join(" "),
            output.status,
            combined_output(&output)
        ))),
        Ok(_) => Ok(()),
    }
}

pub async fn run_script(script_path: &Path, timeout: Option<Duration>) -> Result<()> {
    let output = run_with_timeout(Command::new(script_path), timeout).await;
    match output {
        Err(err) => Err(CertDeployError::script(format!(
            "{}: {err}",
            script_path.display()
        ))),
        Ok(output) if !output.status.success() => Err(CertDeployError::script(format!(
            "{} exited with {}: {}",
            script_path.display(),
            output.status,
            combined_output(&output)
        ))),
        Ok(_) => Ok(()),
    }
}

/// Concatenates stdout then stderr, matching the combined-capture behavior
/// of piping both streams together (`subprocess.STDOUT` on the other side).
fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

async fn run_with_timeout(
    command: &mut Command,
    timeout: Option<Duration>,
) -> std::io::Result<std::process::Output> {
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());
    let child = command.output();
    match timeout {
        None => child.await,
        Some(dur) => match tokio::time::timeout(dur, child).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "process did not finish in time",
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_script_reports_nonzero_exit() {
        let script = write_script("#!/bin/sh\nexit 3\n");
        let err = run_script(script.path(), None).await.unwrap_err();
        assert!(matches!(err, CertDeployError::Script(_)));
    }

    #[tokio::test]
    async fn run_script_succeeds_on_zero_exit() {
        let script = write_script("#!/bin/sh\nexit 0\n");
        run_script(script.path(), None).await.unwrap();
    }

    #[tokio::test]
    async fn run_script_times_out() {
        let script = write_script("#!/bin/sh\nsleep 5\n");
        let err = run_script(script.path(), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(err, CertDeployError::Script(_)));
    }

    fn write_script(body: &str) -> tempfile::NamedTempFile {
        use std::io::Write;
        use std::os::unix::fs::PermissionsExt;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        let mut perms = file.as_file().metadata().unwrap().permissions();
        perms.set_mode(0o755);
        file.as_file().set_permissions(perms).unwrap();
        file
    }
}
