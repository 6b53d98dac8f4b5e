use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio_util::sync::CancellationToken;

const READ_CHUNK_SIZE: usize = 8192;
/// How long the drains may keep reading once the process is gone
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle of one supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Running,
    /// Exited on its own with this code
    Completed(i32),
    /// Killed by the deadline
    TimedOut,
    /// Died from a signal the supervisor did not send (`128 + signal`)
    Killed(i32),
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::TimedOut | Self::Killed(_))
    }
}

/// Terminated sandbox process together with everything it printed
#[derive(Debug)]
pub struct SandboxRun {
    pub state: RunState,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Drives `child` to a terminal state.
///
/// `input` is written to the child's stdin, which is closed afterwards (or
/// right away when there is no input). stdout and stderr are drained
/// concurrently with the exit wait and capped at `output_limit` bytes each.
/// When `deadline` elapses first the child is SIGKILLed and reaped; whatever
/// it printed until then is kept.
///
/// The child must have been spawned with all three stdio streams piped.
pub async fn supervise(
    mut child: Child,
    input: Option<&str>,
    deadline: Duration,
    output_limit: usize,
) -> io::Result<SandboxRun> {
    let start_time = Instant::now();
    let mut state = RunState::Starting;

    let stdin = child.stdin.take();
    let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
    let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

    match child.id() {
        Some(pid) => log::debug!("Supervising process {pid}"),
        None => log::debug!("Supervising process that already exited"),
    }
    advance(&mut state, RunState::Running);

    // stops every pending activity once the outcome is settled
    let cancel = CancellationToken::new();
    // fires when both output streams reached end-of-file
    let drained = CancellationToken::new();

    let feed = feed_stdin(stdin, input, cancel.clone());

    let drains = async {
        let streams = tokio::join!(
            drain(stdout, output_limit, cancel.clone()),
            drain(stderr, output_limit, cancel.clone()),
        );
        drained.cancel();
        streams
    };

    let exit = async {
        let terminal = tokio::select! {
            status = child.wait() => status.map(terminal_state),
            _ = tokio::time::sleep(deadline) => {
                log::debug!("Deadline of {deadline:?} elapsed, killing process");
                // kill() sends SIGKILL and reaps the child
                child.kill().await.map(|()| RunState::TimedOut)
            }
        };

        tokio::select! {
            _ = drained.cancelled() => {}
            _ = tokio::time::sleep(DRAIN_GRACE) => {
                log::debug!("Output still open {DRAIN_GRACE:?} after exit, abandoning it");
            }
        }
        cancel.cancel();
        terminal
    };

    let ((), (stdout, stderr), terminal) = tokio::join!(feed, drains, exit);

    advance(&mut state, terminal?);
    let run = SandboxRun {
        state,
        stdout: String::from_utf8_lossy(&stdout?).into_owned(),
        stderr: String::from_utf8_lossy(&stderr?).into_owned(),
        elapsed: start_time.elapsed(),
    };

    log::debug!(
        "Process finished as {:?} after {:?} ({} bytes stdout, {} bytes stderr)",
        run.state,
        run.elapsed,
        run.stdout.len(),
        run.stderr.len()
    );
    Ok(run)
}

fn advance(state: &mut RunState, next: RunState) {
    debug_assert!(!state.is_terminal(), "{state:?} is terminal");
    log::trace!("Run state {state:?} -> {next:?}");
    *state = next;
}

fn terminal_state(status: ExitStatus) -> RunState {
    match (status.code(), status.signal()) {
        (Some(code), _) => RunState::Completed(code),
        (None, Some(signal)) => RunState::Killed(128 + signal),
        (None, None) => RunState::Killed(-1),
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::other(format!("child {name} is not piped"))
}

/// Writes the input once and closes the pipe
async fn feed_stdin(stdin: Option<ChildStdin>, input: Option<&str>, cancel: CancellationToken) {
    let Some(mut pipe) = stdin else {
        return;
    };

    if let Some(input) = input.filter(|s| !s.is_empty()) {
        tokio::select! {
            written = pipe.write_all(input.as_bytes()) => {
                if let Err(e) = written {
                    // the program may exit without reading its input
                    log::debug!("Stopped writing stdin: {e}");
                }
            }
            _ = cancel.cancelled() => {
                log::debug!("Process finished before consuming its stdin");
            }
        }
    }

    // dropping the pipe signals end-of-input
    drop(pipe);
}

/// Reads `reader` to the end, keeping at most `limit` bytes.
///
/// Bytes past the limit are still read so the writer never blocks on a full pipe.
async fn drain<R>(mut reader: R, limit: usize, cancel: CancellationToken) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut captured = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];
    let mut discarded = 0usize;

    loop {
        let n = tokio::select! {
            read = reader.read(&mut chunk) => read?,
            _ = cancel.cancelled() => break,
        };
        if n == 0 {
            break;
        }

        let room = limit.saturating_sub(captured.len());
        let kept = n.min(room);
        captured.extend_from_slice(&chunk[..kept]);
        discarded += n - kept;
    }

    if discarded > 0 {
        log::debug!("Discarded {discarded} bytes of output past the {limit} byte limit");
        trim_partial_char(&mut captured);
    }
    Ok(captured)
}

/// Drops a UTF-8 sequence the byte limit cut in half
fn trim_partial_char(buf: &mut Vec<u8>) {
    // a character spans at most four bytes
    let tail = buf.len().saturating_sub(4);
    let Some(start) = (tail..buf.len()).rev().find(|&i| buf[i] & 0xC0 != 0x80) else {
        return;
    };
    let width = match buf[start] {
        0xF0..=0xFF => 4,
        0xE0..=0xEF => 3,
        0xC0..=0xDF => 2,
        _ => 1,
    };
    if buf.len() - start < width {
        buf.truncate(start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use std::process::Stdio;
    use tokio::process::Command;

    const LIMIT: usize = 64 * 1024;

    fn spawn_shell(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn test_completed_with_stdout() {
        let child = spawn_shell("echo 'Hello World!'");
        let run = supervise(child, None, Duration::from_secs(5), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed(0));
        assert_eq!(run.stdout, "Hello World!\n");
        assert_eq!(run.stderr, "");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_recorded() {
        let child = spawn_shell("echo oops >&2; exit 3");
        let run = supervise(child, None, Duration::from_secs(5), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed(3));
        assert_eq!(run.stdout, "");
        assert_eq!(run.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_stdin_is_fed_and_closed() {
        let child = spawn_shell("read line; echo \"got $line\"; cat");
        let run = supervise(child, Some("hello\nrest\n"), Duration::from_secs(5), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed(0));
        assert_eq!(run.stdout, "got hello\nrest\n");
    }

    #[tokio::test]
    async fn test_missing_stdin_signals_end_of_input() {
        // cat would block forever if stdin stayed open
        let child = spawn_shell("cat; echo done");
        let run = supervise(child, None, Duration::from_secs(5), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed(0));
        assert_eq!(run.stdout, "done\n");
    }

    #[tokio::test]
    async fn test_silent_process_times_out() {
        let child = spawn_shell("exec sleep 30");
        let pid = child.id().unwrap();
        let start = Instant::now();
        let run = supervise(child, None, Duration::from_millis(300), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::TimedOut);
        assert_eq!(run.stdout, "");
        assert_eq!(run.stderr, "");
        assert!(start.elapsed() < Duration::from_secs(5));
        // killed and reaped, so no zombie entry is left
        assert!(!Path::new(&format!("/proc/{pid}")).exists());
    }

    #[tokio::test]
    async fn test_partial_output_survives_timeout() {
        let child = spawn_shell("echo partial; exec sleep 30");
        let run = supervise(child, None, Duration::from_millis(500), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::TimedOut);
        assert_eq!(run.stdout, "partial\n");
    }

    #[tokio::test]
    async fn test_orphaned_pipe_holder_does_not_hang() {
        // the background sleep inherits stdout and outlives the killed shell
        let child = spawn_shell("sleep 30 & echo started; wait");
        let start = Instant::now();
        let run = supervise(child, None, Duration::from_millis(300), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::TimedOut);
        assert_eq!(run.stdout, "started\n");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_output_is_capped_without_deadlock() {
        // far more than a pipe buffer on both streams at once
        let child = spawn_shell(
            "head -c 300000 /dev/zero | tr '\\0' e >&2; head -c 300000 /dev/zero | tr '\\0' o",
        );
        let run = supervise(child, None, Duration::from_secs(10), 1000)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed(0));
        assert_eq!(run.stdout.len(), 1000);
        assert_eq!(run.stderr.len(), 1000);
        assert!(run.stdout.chars().all(|c| c == 'o'));
        assert!(run.stderr.chars().all(|c| c == 'e'));
    }

    #[tokio::test]
    async fn test_cap_does_not_split_characters() {
        // 'a' followed by the two bytes of 'é'; the cap falls between them
        let child = spawn_shell("printf 'a\\303\\251'");
        let run = supervise(child, None, Duration::from_secs(5), 2)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed(0));
        assert_eq!(run.stdout, "a");
    }

    #[test]
    fn test_trim_partial_char() {
        let cases: [(&[u8], &[u8]); 6] = [
            (b"abc", b"abc"),
            ("aé".as_bytes(), "aé".as_bytes()),
            (&[b'a', 0xC3], b"a"),
            (&[b'a', 0xE2, 0x82], b"a"),
            (&[0xF0, 0x9F, 0x98], b""),
            ("x€".as_bytes(), "x€".as_bytes()),
        ];
        for (input, expected) in cases {
            let mut buf = input.to_vec();
            trim_partial_char(&mut buf);
            assert_eq!(buf, expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_interfere() {
        let deadline = Duration::from_secs(2);
        let slow = supervise(spawn_shell("exec sleep 30"), None, deadline, LIMIT);
        let quick = async {
            let start = Instant::now();
            let run = supervise(spawn_shell("echo quick"), None, deadline, LIMIT).await;
            (run, start.elapsed())
        };

        let (slow, (quick, quick_elapsed)) = tokio::join!(slow, quick);

        let quick = quick.unwrap();
        assert_eq!(quick.state, RunState::Completed(0));
        assert_eq!(quick.stdout, "quick\n");
        assert!(quick_elapsed < Duration::from_secs(1));
        assert_eq!(slow.unwrap().state, RunState::TimedOut);
    }

    #[tokio::test]
    async fn test_unread_large_input_does_not_block() {
        let input = "x".repeat(LIMIT);
        let child = spawn_shell("echo ignored");
        let run = supervise(child, Some(&input), Duration::from_secs(5), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Completed(0));
        assert_eq!(run.stdout, "ignored\n");
    }

    #[tokio::test]
    async fn test_signal_death_is_reported_as_killed() {
        let child = spawn_shell("kill -9 $$");
        let run = supervise(child, None, Duration::from_secs(5), LIMIT)
            .await
            .unwrap();

        assert_eq!(run.state, RunState::Killed(137));
    }

    #[tokio::test]
    async fn test_unpiped_child_is_rejected() {
        let child = Command::new("true")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .unwrap();
        assert!(supervise(child, None, Duration::from_secs(1), LIMIT).await.is_err());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!RunState::Starting.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Completed(0).is_terminal());
        assert!(RunState::TimedOut.is_terminal());
        assert!(RunState::Killed(137).is_terminal());
    }
}
