use std::{
    env,
    future::Future,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};
use web_time::Instant;

use crate::command::Invocation;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Could not start {}: {source}. Is blockmatching installed?", .program.display())]
    Unavailable {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("blockmatching was terminated by a signal: {stderr}")]
    Killed { stderr: String },

    #[error("blockmatching returned with error (exit code {exit_code:?}): {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
        missing: Vec<PathBuf>,
    },
}

/// What the tool left behind
#[derive(Clone, Debug)]
pub struct ToolOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

pub trait ToolRunner {
    /// Run the invocation to completion
    fn run(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<ToolOutput, RunError>>;
}

/// Spawns the external executable
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ToolOutput, RunError> {
        let start = Instant::now();
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| RunError::Unavailable {
                program: invocation.program.clone(),
                source,
            })?;

        let result = ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        };
        debug!(
            "blockmatching exited with {:?} after {:.1}s",
            result.exit_code,
            result.elapsed.as_secs_f32()
        );
        Ok(result)
    }
}

/// Decide whether a run succeeded.
///
/// Exit codes differ between blockmatching releases, so the declared output
/// files are what counts. A non-zero exit with every output present is only
/// logged. A process killed by a signal has no exit code and may have left
/// partial files behind, so it always fails.
pub fn verify_outputs(invocation: &Invocation, output: &ToolOutput) -> Result<(), RunError> {
    if output.exit_code.is_none() {
        return Err(RunError::Killed {
            stderr: output.stderr.trim().to_string(),
        });
    }

    let missing: Vec<PathBuf> = invocation
        .paths
        .declared_outputs()
        .iter()
        .filter(|path| !path.exists())
        .map(|path| path.to_path_buf())
        .collect();

    if !missing.is_empty() {
        return Err(RunError::Failed {
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
            missing,
        });
    }

    if output.exit_code != Some(0) {
        warn!(
            "blockmatching exited with {:?} but wrote all outputs",
            output.exit_code
        );
    }
    Ok(())
}

/// Resolve `program` the way a shell would. Paths with a directory part are
/// only checked, bare names are looked up on `PATH`.
pub fn which(program: impl AsRef<Path>) -> Option<PathBuf> {
    let program = program.as_ref();
    if program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }

    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}
