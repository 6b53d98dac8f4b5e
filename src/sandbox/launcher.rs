use std::io;
use std::path::Path;
use std::process::Stdio;

use anyhow::{Context, bail};
use tokio::process::{Child, Command};
use uuid::Uuid;

use super::{ExecError, LanguageProfile, SCRATCH_DIR, SOURCE_MOUNT, Workspace};

// Container limits; fixed for every run and not exposed to callers
const CPU_LIMIT: &str = "0.5";
const MEMORY_LIMIT: &str = "256m";
const PIDS_LIMIT: u32 = 64;
const SCRATCH_SIZE: &str = "64m";
const SANDBOX_USER: &str = "65534:65534";

const CONTAINER_PREFIX: &str = "codebox-";
const MANAGED_LABEL: &str = "codebox.managed=true";

/// Exit status the docker CLI reserves for its own failures
pub const RUNTIME_FAILURE_EXIT_CODE: i32 = 125;

/// Starts submissions inside locked-down containers through the docker CLI.
///
/// Every container gets no network, a read-only root, a small `nosuid,nodev`
/// tmpfs at `/tmp`, no capabilities, no privilege escalation, an unprivileged
/// user and capped CPU, memory and process count.
#[derive(Debug, Clone)]
pub struct DockerLauncher {
    runtime: String,
}

/// A started sandbox: the attached runtime client plus its container
#[derive(Debug)]
pub struct SandboxHandle {
    pub child: Child,
    pub container: Container,
}

impl DockerLauncher {
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
        }
    }

    pub fn runtime(&self) -> &str {
        &self.runtime
    }

    /// Asks the runtime for its server version
    pub async fn server_version(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.runtime)
            .args(["version", "--format", "{{.Server.Version}}"])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn `{} version`", self.runtime))?;

        if !output.status.success() {
            bail!(
                "`{} version` exited with {}: {}",
                self.runtime,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Makes sure `image` is present locally, pulling it when it is not.
    ///
    /// Runs never pull, so a missing image fails the launch instead of
    /// spending the run's deadline on a download.
    pub async fn ensure_image(&self, image: &str) -> anyhow::Result<()> {
        let inspected = Command::new(&self.runtime)
            .args(["image", "inspect", "--format", "{{.Id}}", image])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to spawn `{} image inspect`", self.runtime))?;
        if inspected.success() {
            return Ok(());
        }

        log::info!("Pulling image {image}");
        let output = Command::new(&self.runtime)
            .args(["pull", "--quiet", image])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn `{} pull`", self.runtime))?;
        if !output.status.success() {
            bail!(
                "`{} pull {image}` exited with {}: {}",
                self.runtime,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    /// Force-removes containers left behind by a previous process
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let output = Command::new(&self.runtime)
            .args(["ps", "--all", "--quiet", "--filter"])
            .arg(format!("label={MANAGED_LABEL}"))
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Failed to spawn `{} ps`", self.runtime))?;

        if !output.status.success() {
            bail!(
                "`{} ps` exited with {}: {}",
                self.runtime,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let ids: Vec<&str> = stdout.split_whitespace().collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let status = Command::new(&self.runtime)
            .args(["rm", "--force"])
            .args(&ids)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to spawn `{} rm`", self.runtime))?;
        if !status.success() {
            bail!("`{} rm` exited with {status}", self.runtime);
        }
        Ok(ids.len())
    }

    /// Arguments of the `run` invocation for one submission
    pub fn run_args(
        &self,
        container_name: &str,
        workspace: &Path,
        profile: &LanguageProfile,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--interactive".into(),
            "--pull".into(),
            "never".into(),
            "--name".into(),
            container_name.into(),
            "--label".into(),
            MANAGED_LABEL.into(),
            "--network".into(),
            "none".into(),
            "--cpus".into(),
            CPU_LIMIT.into(),
            "--memory".into(),
            MEMORY_LIMIT.into(),
            "--memory-swap".into(),
            MEMORY_LIMIT.into(),
            "--pids-limit".into(),
            PIDS_LIMIT.to_string(),
            "--read-only".into(),
            "--tmpfs".into(),
            format!("{SCRATCH_DIR}:rw,exec,nosuid,nodev,size={SCRATCH_SIZE}"),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--user".into(),
            SANDBOX_USER.into(),
            "--log-driver".into(),
            "none".into(),
            "--mount".into(),
            format!(
                "type=bind,source={},target={SOURCE_MOUNT},readonly",
                workspace.display()
            ),
            "--workdir".into(),
            SCRATCH_DIR.into(),
            "--env".into(),
            format!("HOME={SCRATCH_DIR}"),
        ];
        for (key, value) in profile.env {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }
        args.push(profile.image.into());
        args.extend(profile.command());
        args
    }

    /// Starts the submission stored in `workspace` and returns its handle.
    ///
    /// Only failures to start the runtime client are reported here; the
    /// runtime's own start-up failures surface as exit status
    /// [`RUNTIME_FAILURE_EXIT_CODE`] and are checked with
    /// [`Container::was_started`].
    pub async fn launch(
        &self,
        workspace: &Workspace,
        profile: &LanguageProfile,
    ) -> Result<SandboxHandle, ExecError> {
        let container_name = format!("{CONTAINER_PREFIX}{}", Uuid::new_v4().simple());
        let args = self.run_args(&container_name, workspace.path(), profile);

        let child = Command::new(&self.runtime)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                log::error!("Failed to spawn sandbox runtime `{}`: {e}", self.runtime);
                match e.kind() {
                    io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied => {
                        ExecError::RuntimeUnavailable {
                            runtime: self.runtime.clone(),
                            source: e,
                        }
                    }
                    _ => ExecError::LaunchFailed(e.to_string()),
                }
            })?;

        log::info!("Launched {} sandbox {container_name}", profile.id);
        Ok(SandboxHandle {
            child,
            container: Container {
                name: container_name,
                runtime: self.runtime.clone(),
                removed: false,
            },
        })
    }
}

/// Guard for one named container.
///
/// [`Container::remove`] force-removes it; if the guard is dropped first the
/// removal is scheduled on the current runtime instead.
#[derive(Debug)]
pub struct Container {
    name: String,
    runtime: String,
    removed: bool,
}

impl Container {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the runtime ever got the container to run
    pub async fn was_started(&self) -> bool {
        let output = Command::new(&self.runtime)
            .args(["container", "inspect", "--format", "{{.State.StartedAt}}"])
            .arg(&self.name)
            .stdin(Stdio::null())
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                // docker reports the zero time for containers that never ran
                !String::from_utf8_lossy(&output.stdout)
                    .trim()
                    .starts_with("0001-01-01")
            }
            Ok(_) => false,
            Err(e) => {
                log::warn!("Unable to inspect container {}: {e}", self.name);
                false
            }
        }
    }

    /// Kills the container if it still runs and deletes it
    pub async fn remove(mut self) {
        self.removed = true;
        remove_container(&self.runtime, &self.name).await;
    }
}

impl Drop for Container {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        log::warn!("Container {} abandoned, scheduling removal", self.name);

        let runtime = std::mem::take(&mut self.runtime);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { remove_container(&runtime, &name).await });
            }
            Err(_) => log::error!("No runtime available to remove container {name}"),
        }
    }
}

async fn remove_container(runtime: &str, name: &str) {
    let output = Command::new(runtime)
        .args(["rm", "--force", name])
        .stdin(Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            log::debug!("Removed container {name}");
        }
        Ok(output) => {
            // nothing to remove when the runtime never created it
            log::debug!(
                "`{runtime} rm` for {name} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Err(e) => log::warn!("Unable to remove container {name}: {e}"),
    }
}
