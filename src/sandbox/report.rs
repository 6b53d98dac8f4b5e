use serde::Serialize;

use super::{RunState, SandboxRun};

/// Exit code reported for runs killed by the deadline (128 + SIGKILL)
pub const TIMEOUT_EXIT_CODE: i32 = 137;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl From<SandboxRun> for ExecutionResult {
    /// A deadline kill only counts as a timeout when nothing was printed;
    /// any captured output is returned as a regular result.
    fn from(run: SandboxRun) -> Self {
        let exit_code = match run.state {
            RunState::Completed(code) | RunState::Killed(code) => code,
            RunState::TimedOut => TIMEOUT_EXIT_CODE,
            // supervise never hands out a non-terminal run
            RunState::Starting | RunState::Running => -1,
        };
        let timed_out =
            run.state == RunState::TimedOut && run.stdout.is_empty() && run.stderr.is_empty();

        Self {
            exit_code,
            stdout: run.stdout,
            stderr: run.stderr,
            timed_out,
        }
    }
}
