mod error;
mod language;
mod launcher;
mod report;
mod supervisor;
mod workspace;

pub use error::ExecError;
pub use language::{
    Language, LanguageProfile, SCRATCH_DIR, SOURCE_MOUNT, Toolchain, profiles, resolve,
};
pub use launcher::{Container, DockerLauncher, RUNTIME_FAILURE_EXIT_CODE, SandboxHandle};
pub use report::{ExecutionResult, TIMEOUT_EXIT_CODE};
pub use supervisor::{RunState, SandboxRun, supervise};
pub use workspace::{Workspace, WorkspaceManager};

use std::time::Duration;

use crate::config::SandboxConfig;

/// Upper bound for submitted source, stdin and each captured output stream
pub const MAX_SOURCE_BYTES: usize = 64 * 1024;

/// A validated submission
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    language: Language,
    source: String,
    stdin: Option<String>,
}

impl ExecutionRequest {
    /// Validates raw submission fields; nothing is allocated for rejected ones.
    pub fn new(
        language: Option<&str>,
        source: Option<String>,
        stdin: Option<String>,
    ) -> Result<Self, ExecError> {
        let language = match language.map(str::trim) {
            None | Some("") => return Err(ExecError::MissingLanguage),
            Some(id) => id.parse::<Language>()?,
        };

        let source = match source {
            Some(source) if !source.is_empty() => source,
            _ => return Err(ExecError::MissingCode),
        };
        if source.len() > MAX_SOURCE_BYTES {
            return Err(ExecError::PayloadTooLarge {
                field: "code",
                limit: MAX_SOURCE_BYTES,
            });
        }
        if stdin.as_ref().is_some_and(|s| s.len() > MAX_SOURCE_BYTES) {
            return Err(ExecError::PayloadTooLarge {
                field: "stdin",
                limit: MAX_SOURCE_BYTES,
            });
        }

        Ok(Self {
            language,
            source,
            stdin,
        })
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }
}

/// Runs submissions end to end: workspace, container, supervision, cleanup.
///
/// Holds no per-request state, so one instance serves all requests
/// concurrently.
#[derive(Debug)]
pub struct Sandbox {
    launcher: DockerLauncher,
    workspaces: WorkspaceManager,
    time_limit: Duration,
}

impl Sandbox {
    pub fn new(config: &SandboxConfig) -> anyhow::Result<Self> {
        let workspace_root = config.workspace_root();
        // the bind mount option list is comma separated
        if workspace_root.to_string_lossy().contains(',') {
            anyhow::bail!(
                "Workspace root {} must not contain ','",
                workspace_root.display()
            );
        }
        let workspaces = WorkspaceManager::new(&workspace_root).map_err(|e| {
            anyhow::anyhow!(
                "Unable to create workspace root {}: {e}",
                workspace_root.display()
            )
        })?;

        Ok(Self {
            launcher: DockerLauncher::new(config.runtime()),
            workspaces,
            time_limit: config.time_limit(),
        })
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    pub fn launcher(&self) -> &DockerLauncher {
        &self.launcher
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Start-up checks: runtime availability, profile images and leftovers of
    /// a previous process
    pub async fn preflight(&self) {
        match self.launcher.server_version().await {
            Ok(version) => log::info!(
                "Sandbox runtime `{}` available (server {version})",
                self.launcher.runtime()
            ),
            Err(e) => log::warn!("Sandbox runtime is not usable yet: {e:#}"),
        }

        let mut images: Vec<&str> = profiles().iter().map(|p| p.image).collect();
        images.sort_unstable();
        images.dedup();
        for image in images {
            if let Err(e) = self.launcher.ensure_image(image).await {
                log::warn!("Image {image} is not available, its runs will fail: {e:#}");
            }
        }

        match self.workspaces.sweep() {
            Ok(0) => {}
            Ok(n) => log::info!("Removed {n} stale workspaces"),
            Err(e) => log::warn!("Unable to sweep workspace root: {e}"),
        }

        match self.launcher.sweep().await {
            Ok(0) => {}
            Ok(n) => log::info!("Removed {n} stale containers"),
            Err(e) => log::warn!("Unable to sweep stale containers: {e:#}"),
        }
    }

    /// Runs one submission.
    ///
    /// The container and the workspace are gone by the time this returns,
    /// whatever the outcome.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult, ExecError> {
        let profile = request.language().profile();

        let mut workspace = self.workspaces.create().map_err(ExecError::Workspace)?;
        workspace
            .write(profile.file_name, request.source())
            .map_err(ExecError::Workspace)?;

        let SandboxHandle { child, container } = self.launcher.launch(&workspace, profile).await?;

        let outcome = supervise(child, request.stdin(), self.time_limit, MAX_SOURCE_BYTES).await;

        let launch_failed = match &outcome {
            Ok(run) if run.state == RunState::Completed(RUNTIME_FAILURE_EXIT_CODE) => {
                !container.was_started().await
            }
            _ => false,
        };

        container.remove().await;
        workspace.destroy();

        let run = outcome.map_err(|e| {
            log::error!("Supervision of {} run failed: {e}", profile.id);
            ExecError::Supervision(e)
        })?;
        if launch_failed {
            log::error!("Sandbox runtime failed to start container: {}", run.stderr.trim());
            return Err(ExecError::LaunchFailed(run.stderr.trim().to_string()));
        }

        log::info!(
            "Finished {} run as {:?} in {:?}",
            profile.id,
            run.state,
            run.elapsed
        );
        Ok(ExecutionResult::from(run))
    }
}
