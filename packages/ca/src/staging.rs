//! Scoped staging of plaintext secret material
//!
//! Each [`SecretStage`] owns a fresh `<mount>/<uuid>/` directory. Files are
//! created owner-only, and on release they are overwritten with random bytes
//! before being unlinked. Whatever is still staged when the stage is dropped
//! gets the same treatment, so an early return or panic never leaves a
//! plaintext key behind.

use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use ephca_common::{log_security_event, LoggingTransformer, SecurityEvent};
use rand::RngCore;
use tracing::warn;
use uuid::Uuid;

use crate::error::{CaError, Result};

/// Handle to one staged plaintext file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSecretFile {
    path: PathBuf,
}

impl StagedSecretFile {
    /// Location of the staged file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Per-operation staging area under the secret mount
#[derive(Debug)]
pub struct SecretStage {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl SecretStage {
    /// Create a unique staging directory inside `mount_dir`
    pub fn create(mount_dir: &Path) -> Result<Self> {
        let dir = mount_dir.join(Uuid::new_v4().to_string());
        create_private_dir(&dir).map_err(|e| CaError::staging(&dir, e))?;
        Ok(Self {
            dir,
            files: Vec::new(),
        })
    }

    /// The per-operation staging directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `content` to `<stage>/<filename>` with mode 0600
    ///
    /// `filename` must be a bare file name.
    pub fn stage_file(&mut self, filename: &str, content: &[u8]) -> Result<StagedSecretFile> {
        let path = self.dir.join(filename);
        if Path::new(filename).file_name() != Some(OsStr::new(filename)) {
            return Err(CaError::staging(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "staged secrets must be plain file names",
                ),
            ));
        }

        let mut options = OpenOptions::new();
        options.create_new(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        // Tracked before writing so a partial write is still scrubbed.
        let mut file = options.open(&path).map_err(|e| CaError::staging(&path, e))?;
        self.files.push(path.clone());
        file.write_all(content)
            .and_then(|()| file.sync_all())
            .map_err(|e| CaError::staging(&path, e))?;

        log_security_event(
            SecurityEvent::SecretStaged,
            &format!("{filename} ({})", LoggingTransformer::fingerprint(content)),
            true,
        );
        Ok(StagedSecretFile { path })
    }

    /// Scrub and remove a single staged file
    pub fn release_file(&mut self, handle: StagedSecretFile) -> Result<()> {
        self.files.retain(|path| path != &handle.path);
        scrub(&handle.path).map_err(|e| CaError::staging(&handle.path, e))
    }

    /// Scrub every remaining file and remove the staging directory
    ///
    /// All files are attempted even if one fails; the first failure is
    /// returned.
    pub fn release(mut self) -> Result<()> {
        self.scrub_all()
    }

    fn scrub_all(&mut self) -> Result<()> {
        let mut first_error = None;
        for path in std::mem::take(&mut self.files) {
            if let Err(e) = scrub(&path) {
                LoggingTransformer::log_cleanup_warning("secret staging", &e);
                first_error.get_or_insert(CaError::staging(&path, e));
            }
        }
        match std::fs::remove_dir(&self.dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                LoggingTransformer::log_cleanup_warning("secret staging directory", &e);
                first_error.get_or_insert(CaError::staging(&self.dir, e));
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for SecretStage {
    fn drop(&mut self) {
        if !self.files.is_empty() || self.dir.exists() {
            if let Err(e) = self.scrub_all() {
                warn!("Secret stage cleanup on drop incomplete: {e}");
            }
        }
    }
}

fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Overwrite with random bytes, then unlink
fn scrub(path: &Path) -> std::io::Result<()> {
    let size = match std::fs::metadata(path) {
        Ok(metadata) => metadata.len() as usize,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    if size > 0 {
        let mut noise = vec![0u8; size];
        rand::rng().fill_bytes(&mut noise);
        let mut file = OpenOptions::new().write(true).truncate(false).open(path)?;
        file.write_all(&noise)?;
        file.sync_all()?;
    }

    std::fs::remove_file(path)?;
    log_security_event(
        SecurityEvent::SecretScrubbed,
        &path.file_name().map_or_else(String::new, |name| name.to_string_lossy().into_owned()),
        true,
    );
    Ok(())
}
