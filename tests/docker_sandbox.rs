//! End-to-end runs against a real Docker daemon.
//!
//! Run with `cargo test --test docker_sandbox -- --ignored` on a host where
//! `docker` works for the current user and the language images can be pulled.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;

use codebox::config::{MilliSecond, SandboxConfig};
use codebox::sandbox::{ExecutionRequest, ExecutionResult, Sandbox, TIMEOUT_EXIT_CODE};

fn create_sandbox(time_limit_ms: u64) -> (Sandbox, tempfile::TempDir) {
    let root = tempfile::tempdir().expect("Failed to create temp dir");
    let config = SandboxConfig {
        runtime: None,
        time_limit: Some(MilliSecond(time_limit_ms)),
        workspace_root: Some(workspaces(root.path())),
    };
    (Sandbox::new(&config).unwrap(), root)
}

fn workspaces(temp: &Path) -> PathBuf {
    temp.join("workspaces")
}

async fn run(sandbox: &Sandbox, language: &str, code: &str, stdin: Option<&str>) -> ExecutionResult {
    let request = ExecutionRequest::new(
        Some(language),
        Some(code.to_string()),
        stdin.map(str::to_string),
    )
    .unwrap();
    sandbox.execute(request).await.expect("sandbox failed")
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_hello_world_and_cleanup() {
    let (sandbox, root) = create_sandbox(10_000);
    let result = run(&sandbox, "python", "print('Hello World!')", None).await;

    assert_eq!(
        result,
        ExecutionResult {
            exit_code: 0,
            stdout: "Hello World!\n".to_string(),
            stderr: String::new(),
            timed_out: false,
        }
    );
    assert_eq!(fs::read_dir(workspaces(root.path())).unwrap().count(), 0);
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_stdin_is_echoed() {
    let (sandbox, _root) = create_sandbox(10_000);
    let result = run(&sandbox, "python", "print(input())", Some("hello\n")).await;

    assert_eq!(result.exit_code, 0);
    assert!(result.stdout.contains("hello"));
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_compiled_language_with_compile_error() {
    let (sandbox, _root) = create_sandbox(30_000);
    let ok = run(
        &sandbox,
        "c",
        "#include <stdio.h>\nint main(){puts(\"compiled\");return 0;}\n",
        None,
    )
    .await;
    assert_eq!(ok.exit_code, 0);
    assert_eq!(ok.stdout, "compiled\n");

    let broken = run(&sandbox, "c", "int main( {", None).await;
    assert_ne!(broken.exit_code, 0);
    assert!(!broken.stderr.is_empty());
    assert!(!broken.timed_out);
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_silent_infinite_loop_times_out() {
    let (sandbox, root) = create_sandbox(3_000);
    let result = run(&sandbox, "python", "while True:\n    pass\n", None).await;

    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(result.timed_out);
    assert_eq!(result.stdout, "");
    assert_eq!(result.stderr, "");
    assert_eq!(fs::read_dir(workspaces(root.path())).unwrap().count(), 0);

    // the container is gone too
    let leftover = std::process::Command::new("docker")
        .args(["ps", "--all", "--quiet", "--filter", "label=codebox.managed=true"])
        .output()
        .unwrap();
    assert!(String::from_utf8_lossy(&leftover.stdout).trim().is_empty());
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_partial_output_is_not_a_timeout() {
    let (sandbox, _root) = create_sandbox(3_000);
    let code = "print('partial')\nwhile True:\n    pass\n";
    let result = run(&sandbox, "python", code, None).await;

    assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
    assert!(!result.timed_out);
    assert!(result.stdout.contains("partial"));
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_concurrent_runs_do_not_interfere() {
    let (sandbox, _root) = create_sandbox(4_000);
    let start = Instant::now();

    let (looping, quick) = tokio::join!(
        run(&sandbox, "python", "while True:\n    pass\n", None),
        run(&sandbox, "python", "print('quick')", None),
    );
    let elapsed = start.elapsed();

    assert!(looping.timed_out);
    assert_eq!(quick.stdout, "quick\n");
    assert!(!quick.timed_out);
    assert!(elapsed < Duration::from_secs(15));
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_network_is_disabled() {
    let (sandbox, _root) = create_sandbox(10_000);
    let code = r#"
import socket
try:
    socket.create_connection(("1.1.1.1", 80), timeout=2)
    print("connected")
except OSError as e:
    print("blocked")
"#;
    let result = run(&sandbox, "python", code, None).await;

    assert_eq!(result.stdout, "blocked\n");
    assert!(!result.timed_out);
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_memory_exhaustion_is_killed() {
    let (sandbox, _root) = create_sandbox(20_000);
    let code = "data = []\nwhile True:\n    data.append(bytearray(16 * 1024 * 1024))\n";
    let result = run(&sandbox, "python", code, None).await;

    assert_ne!(result.exit_code, 0);
    assert!(!result.timed_out);
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_fork_bomb_is_contained() {
    let (sandbox, _root) = create_sandbox(5_000);
    let result = run(&sandbox, "bash", ":(){ :|:& };:", None).await;

    // the pids limit keeps the host usable; the run ends by itself or at the deadline
    assert!(result.exit_code != 0 || result.timed_out);
}

#[actix_web::test]
#[ignore = "requires a running docker daemon"]
async fn test_source_mount_is_read_only() {
    let (sandbox, _root) = create_sandbox(10_000);
    let code = r#"
try:
    open("/code/evil.txt", "w").write("x")
    print("writable")
except OSError:
    print("read-only")
"#;
    let result = run(&sandbox, "python", code, None).await;
    assert_eq!(result.stdout, "read-only\n");
}
