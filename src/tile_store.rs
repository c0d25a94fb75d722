//! Filesystem-backed tile cache laid out as `{root}/{zoom}/{x}/{y}.{ext}`.
//!
//! A tile counts as stored when its file exists with a non-zero length. Writes
//! go to a temp file in the destination directory and are renamed into place,
//! so a reader never observes a truncated tile.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::config::StoreConfig;
use crate::geo::TileCoord;
use crate::planner::TileRange;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create tile directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write tile {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("tile write task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone)]
pub struct TileStore {
    root: PathBuf,
    extension: String,
}

impl TileStore {
    pub fn new(config: &StoreConfig) -> Self {
        TileStore {
            root: config.root.clone(),
            extension: config.extension.clone(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, coord: &TileCoord) -> PathBuf {
        self.root
            .join(coord.zoom.to_string())
            .join(coord.x.to_string())
            .join(format!("{}.{}", coord.y, self.extension))
    }

    pub fn exists(&self, coord: &TileCoord) -> bool {
        match std::fs::metadata(self.path(coord)) {
            Ok(metadata) => metadata.is_file() && metadata.len() > 0,
            Err(_) => false,
        }
    }

    #[instrument(level = "debug", skip(self, bytes), fields(tile = %coord, bytes = bytes.len()))]
    pub async fn write(&self, coord: &TileCoord, bytes: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path(coord);
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes)).await??;
        debug!("stored tile");
        Ok(())
    }

    /// Number of tiles of `range` currently stored.
    pub fn count_present(&self, range: &TileRange) -> u64 {
        range.coords().filter(|coord| self.exists(coord)).count() as u64
    }

    /// Counts every stored tile file under `{root}/{zoom}` without consulting a plan.
    pub fn scan(&self, zoom: u8) -> u64 {
        let zoom_dir = self.root.join(zoom.to_string());
        if !zoom_dir.is_dir() {
            return 0;
        }
        WalkDir::new(zoom_dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry
                        .path()
                        .extension()
                        .map_or(false, |extension| extension == self.extension.as_str())
                    && entry.metadata().map_or(false, |metadata| metadata.len() > 0)
            })
            .count() as u64
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    // create_dir_all treats a directory created concurrently by another worker as success
    std::fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let write_err = |source: io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut temp = NamedTempFile::new_in(dir).map_err(write_err)?;
    temp.write_all(bytes).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|err| write_err(err.error))?;
    Ok(())
}
