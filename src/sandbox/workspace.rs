use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use uuid::Uuid;

// The sandbox runs as an unprivileged user that must be able to read the mount
const WORKSPACE_DIR_PERMISSIONS: u32 = 0o755;
const SOURCE_FILE_PERMISSIONS: u32 = 0o644;
const WORKSPACE_PREFIX: &str = "run-";

/// Hands out per-request workspaces below a dedicated root directory
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        fs::set_permissions(&root, fs::Permissions::from_mode(WORKSPACE_DIR_PERMISSIONS))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a fresh, exclusively owned directory.
    ///
    /// `create_dir` fails on an existing path, so a name collision can never
    /// hand out a directory that belongs to another request.
    pub fn create(&self) -> io::Result<Workspace> {
        let path = self
            .root
            .join(format!("{WORKSPACE_PREFIX}{}", Uuid::new_v4().simple()));
        fs::create_dir(&path)?;
        let workspace = Workspace {
            path,
            destroyed: false,
        };
        // from here on Drop takes care of the directory
        fs::set_permissions(
            &workspace.path,
            fs::Permissions::from_mode(WORKSPACE_DIR_PERMISSIONS),
        )?;
        log::debug!("Created workspace {}", workspace.path.display());
        Ok(workspace)
    }

    /// Removes workspaces left behind by a previous process
    pub fn sweep(&self) -> io::Result<usize> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let is_workspace = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(WORKSPACE_PREFIX));
            if !is_workspace || !entry.file_type()?.is_dir() {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!(
                    "Unable to remove stale workspace {}: {e}",
                    entry.path().display()
                ),
            }
        }
        Ok(removed)
    }
}

/// A single-use directory holding one submission's source file.
///
/// The directory is removed by [`Workspace::destroy`] or, failing that, when
/// the value is dropped.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    destroyed: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, file_name: &str, content: &str) -> io::Result<PathBuf> {
        let file_path = self.path.join(file_name);
        fs::write(&file_path, content)?;
        fs::set_permissions(
            &file_path,
            fs::Permissions::from_mode(SOURCE_FILE_PERMISSIONS),
        )?;
        Ok(file_path)
    }

    /// Best-effort removal; failures are logged and otherwise ignored.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        match fs::remove_dir_all(&self.path) {
            Ok(()) => log::debug!("Removed workspace {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Unable to remove workspace {}: {e}", self.path.display()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.destroy();
    }
}
