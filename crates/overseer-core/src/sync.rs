//! Config synchronizer: keeps `<config_dir>/<service>.conf` in step with the
//! rendered specification.

use std::{
    fs,
    io::{ErrorKind, Write},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::{render::render, spec::ServiceSpec, Error, Result};

/// Writes and removes per-service configuration files.
#[derive(Debug, Clone)]
pub struct ConfigSynchronizer {
    dir: PathBuf,
    mode: u32,
}

impl ConfigSynchronizer {
    pub fn new(dir: impl Into<PathBuf>, mode: u32) -> Self {
        Self {
            dir: dir.into(),
            mode,
        }
    }

    /// Path of the configuration file for `service_name`.
    #[must_use]
    pub fn conf_path(&self, service_name: &str) -> PathBuf {
        self.dir.join(format!("{service_name}.conf"))
    }

    /// Render `spec` and write it if the file content differs.
    ///
    /// The new content is written to a temporary file in the same directory
    /// and renamed over the old one, so readers never see a partial file.
    /// Returns `true` when the file was created or changed.
    ///
    /// # Errors
    ///
    /// Returns `FileWriteFailed` if the existing file cannot be read or the
    /// new one cannot be written.
    pub fn write(&self, spec: &ServiceSpec) -> Result<bool> {
        let path = self.conf_path(&spec.service_name);
        let rendered = render(spec);

        if read_existing(&path)?.as_deref() == Some(rendered.as_str()) {
            debug!(path = %path.display(), "configuration unchanged");
            return Ok(false);
        }

        fs::create_dir_all(&self.dir)
            .map_err(|e| Error::file_write_failed(&self.dir, e.to_string()))?;
        let fail = |e: std::io::Error| Error::file_write_failed(&path, e.to_string());

        let mut temp = NamedTempFile::new_in(&self.dir).map_err(fail)?;
        temp.write_all(rendered.as_bytes()).map_err(fail)?;
        temp.as_file().sync_all().map_err(fail)?;
        fs::set_permissions(temp.path(), fs::Permissions::from_mode(self.mode)).map_err(fail)?;
        temp.persist(&path).map_err(|e| fail(e.error))?;

        info!(path = %path.display(), "configuration written");
        Ok(true)
    }

    /// Delete the configuration file for `service_name`, returning whether
    /// one existed.
    ///
    /// # Errors
    ///
    /// Returns `FileRemoveFailed` if the file exists but cannot be deleted.
    pub fn remove(&self, service_name: &str) -> Result<bool> {
        let path = self.conf_path(service_name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(path = %path.display(), "configuration removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::file_remove_failed(&path, e.to_string())),
        }
    }
}

fn read_existing(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        // Non-UTF-8 content can never equal a rendering; overwrite it.
        Err(e) if e.kind() == ErrorKind::InvalidData => Ok(None),
        Err(e) => Err(Error::file_write_failed(path, e.to_string())),
    }
}
