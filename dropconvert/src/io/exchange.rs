//! Transient path-list files handed to the conversion entrypoint.
//!
//! Each conversion gets its own uniquely named directory holding
//! `file_paths.json` and `folder_paths.json`: UTF-8 JSON arrays of absolute
//! paths, no byte-order mark. The directory is removed by [`ExchangeArtifacts::cleanup`],
//! and on drop if cleanup was never reached.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tempfile::TempDir;
use tracing::debug;

pub const FILE_LIST_NAME: &str = "file_paths.json";
pub const FOLDER_LIST_NAME: &str = "folder_paths.json";
const DIR_PREFIX: &str = "dropconvert-";

#[derive(Debug)]
pub struct ExchangeArtifacts {
    dir: TempDir,
    files_path: PathBuf,
    folders_path: PathBuf,
}

impl ExchangeArtifacts {
    /// Create a fresh, uniquely named directory under `parent`.
    pub fn create(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent)
            .with_context(|| format!("create exchange dir {}", parent.display()))?;
        let dir = tempfile::Builder::new()
            .prefix(DIR_PREFIX)
            .tempdir_in(parent)
            .with_context(|| format!("create exchange dir in {}", parent.display()))?;
        let files_path = dir.path().join(FILE_LIST_NAME);
        let folders_path = dir.path().join(FOLDER_LIST_NAME);
        debug!(dir = %dir.path().display(), "created exchange dir");
        Ok(Self {
            dir,
            files_path,
            folders_path,
        })
    }

    pub fn write(&self, files: &[PathBuf], folders: &[PathBuf]) -> Result<()> {
        write_path_list(&self.files_path, files)?;
        write_path_list(&self.folders_path, folders)?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn files_path(&self) -> &Path {
        &self.files_path
    }

    pub fn folders_path(&self) -> &Path {
        &self.folders_path
    }

    /// Delete both artifacts and their directory.
    pub fn cleanup(self) -> Result<()> {
        let dir = self.dir.path().to_path_buf();
        self.dir
            .close()
            .with_context(|| format!("remove exchange dir {}", dir.display()))?;
        debug!(dir = %dir.display(), "removed exchange dir");
        Ok(())
    }
}

/// Encode paths as a JSON array of strings.
pub fn encode_path_list(paths: &[PathBuf]) -> Result<String> {
    serde_json::to_string(paths).context("serialize path list")
}

fn write_path_list(path: &Path, paths: &[PathBuf]) -> Result<()> {
    let payload = encode_path_list(paths)?;
    fs::write(path, payload.as_bytes()).with_context(|| format!("write {}", path.display()))
}
