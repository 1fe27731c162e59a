//! Secret-backed directory provider
//!
//! Mounting a tmpfs is left to the host. [`DirectoryMount`] only prepares an
//! existing or new directory with owner-only permissions and warns when it
//! is not backed by volatile memory.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{CaError, Result};

/// Source of the directory plaintext secrets are staged into
pub trait SecretMount: Send + Sync {
    /// Return the secret directory, preparing it on first use
    ///
    /// Must be idempotent.
    fn mount(&self) -> Result<PathBuf>;
}

/// Plain directory used as the secret mount
#[derive(Clone, Debug)]
pub struct DirectoryMount {
    path: PathBuf,
}

impl DirectoryMount {
    /// Mount rooted at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretMount for DirectoryMount {
    fn mount(&self) -> Result<PathBuf> {
        let mount_error = |e: std::io::Error| CaError::Mount {
            path: self.path.clone(),
            reason: e.to_string(),
        };

        std::fs::create_dir_all(&self.path).map_err(mount_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o700))
                .map_err(mount_error)?;
        }

        let path = self.path.canonicalize().map_err(mount_error)?;
        match filesystem_type(&path) {
            Some(fs) if is_volatile(&fs) => debug!("Secret mount {} is {fs}", path.display()),
            Some(fs) => warn!(
                "Secret mount {} is backed by {fs}, staged keys may reach persistent storage",
                path.display()
            ),
            None => debug!("Could not determine filesystem of {}", path.display()),
        }
        Ok(path)
    }
}

fn is_volatile(fs_type: &str) -> bool {
    matches!(fs_type, "tmpfs" | "ramfs")
}

#[cfg(target_os = "linux")]
fn filesystem_type(path: &Path) -> Option<String> {
    let mounts = std::fs::read_to_string("/proc/self/mounts").ok()?;
    fs_type_from_mounts(&mounts, path)
}

#[cfg(not(target_os = "linux"))]
fn filesystem_type(_path: &Path) -> Option<String> {
    None
}

/// Filesystem type of the deepest mount point containing `path`
fn fs_type_from_mounts(mounts: &str, path: &Path) -> Option<String> {
    mounts
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _device = fields.next()?;
            let mount_point = fields.next()?.replace("\\040", " ");
            let fs_type = fields.next()?;
            Some((PathBuf::from(mount_point), fs_type.to_string()))
        })
        .filter(|(mount_point, _)| path.starts_with(mount_point))
        .max_by_key(|(mount_point, _)| mount_point.components().count())
        .map(|(_, fs_type)| fs_type)
}
