//! Starting the target application.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use pivrun_core::config::TargetConfig;
use pivrun_core::ProcessId;

/// Environment variables set on the child only. The orchestrator's own
/// environment is never touched.
pub type EnvOverrides = BTreeMap<String, OsString>;

/// Program and arguments of the target application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl From<&TargetConfig> for TargetCommand {
    fn from(config: &TargetConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
        }
    }
}

/// Handle to a freshly started target instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedProcess {
    pub pid: ProcessId,
}

pub trait Spawner {
    fn spawn(&self, command: &TargetCommand, env: &EnvOverrides) -> io::Result<SpawnedProcess>;
}

/// Spawns through `std::process::Command`.
///
/// The child keeps running after pivrun exits. A detached reaper thread
/// waits on it so a finished instance does not linger as a zombie while the
/// batch is still going.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandSpawner;

impl Spawner for CommandSpawner {
    fn spawn(&self, command: &TargetCommand, env: &EnvOverrides) -> io::Result<SpawnedProcess> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let pid = ProcessId(child.id());

        std::thread::Builder::new()
            .name(format!("reap-{pid}"))
            .spawn(move || match child.wait() {
                Ok(status) => tracing::debug!(%pid, %status, "target instance exited"),
                Err(err) => tracing::debug!(%pid, error = %err, "cannot wait on target instance"),
            })?;

        Ok(SpawnedProcess { pid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_is_an_error() {
        let command = TargetCommand {
            program: PathBuf::from("/nonexistent/pivrun-target"),
            args: vec![],
        };
        let err = CommandSpawner.spawn(&command, &EnvOverrides::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn overrides_reach_the_child() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("env.txt");
        let command = TargetCommand {
            program: PathBuf::from("sh"),
            args: vec!["-c".into(), format!("printf %s \"$TMPDIR\" > '{}'", out.display())],
        };
        let mut env = EnvOverrides::new();
        env.insert("TMPDIR".into(), tmp.path().as_os_str().to_owned());

        let spawned = CommandSpawner.spawn(&command, &env).expect("spawn");
        assert!(spawned.pid.0 > 0);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while std::time::Instant::now() < deadline {
            if let Ok(text) = std::fs::read_to_string(&out) {
                if !text.is_empty() {
                    assert_eq!(text, tmp.path().display().to_string());
                    return;
                }
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        panic!("child never wrote {}", out.display());
    }
}
