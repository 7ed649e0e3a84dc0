//! SD card file store.
//!
//! Implements [`FileStore`] on top of the FAT volume that ESP-IDF mounts
//! into the VFS (`/sdcard` by default), so plain `std::fs` works on both
//! the device and the host.
//!
//! ## Backends
//!
//! - **Mounted**: `std::fs` under a root directory. Used on the device and
//!   by host tests that want real file semantics.
//! - **Simulated** (host only): in-memory map, shared between clones.
//!
//! ## Atomic replace
//!
//! FAT cannot rename over an existing file, so [`FileStore::write`] goes
//! through `<path>.tmp`:
//!
//! ```text
//!   write tmp ─▶ fsync ─▶ remove old ─▶ rename tmp → path
//! ```
//!
//! A power cut between the last two steps leaves only the temp file, which
//! the next read promotes. Readers therefore see old or new, never a mix.

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use log::{debug, warn};

use crate::app::ports::{FileStore, StorageError};

const TMP_SUFFIX: &str = ".tmp";

#[derive(Clone)]
pub struct SdCardStore {
    backend: Backend,
}

#[derive(Clone)]
enum Backend {
    Mounted {
        root: PathBuf,
    },
    #[cfg(not(target_os = "espidf"))]
    Simulated(std::rc::Rc<core::cell::RefCell<std::collections::BTreeMap<String, Vec<u8>>>>),
}

impl SdCardStore {
    /// Store rooted at an already mounted volume.
    pub fn mounted(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: Backend::Mounted { root: root.into() },
        }
    }

    /// In-memory card for host tests and simulation.
    #[cfg(not(target_os = "espidf"))]
    pub fn simulated() -> Self {
        Self {
            backend: Backend::Simulated(std::rc::Rc::default()),
        }
    }

    fn full_path(root: &std::path::Path, path: &str) -> Result<PathBuf, StorageError> {
        let rel = path.strip_prefix('/').ok_or(StorageError::InvalidPath)?;
        if rel.split('/').any(|c| c == "..") {
            return Err(StorageError::InvalidPath);
        }
        Ok(root.join(rel))
    }

    fn tmp_path(full: &std::path::Path) -> PathBuf {
        let mut s = full.as_os_str().to_owned();
        s.push(TMP_SUFFIX);
        PathBuf::from(s)
    }

    /// Finish an interrupted replace: only the temp file survived.
    fn recover(full: &std::path::Path) {
        let tmp = Self::tmp_path(full);
        if !full.exists() && tmp.exists() {
            warn!("SD: promoting leftover {}", tmp.display());
            if let Err(e) = fs::rename(&tmp, full) {
                warn!("SD: recovery failed: {}", e);
            }
        }
    }
}

fn map_io(e: &io::Error) -> StorageError {
    match e.kind() {
        io::ErrorKind::NotFound => StorageError::NotFound,
        io::ErrorKind::StorageFull => StorageError::Full,
        io::ErrorKind::InvalidInput => StorageError::InvalidPath,
        _ => StorageError::IoError,
    }
}

#[cfg(not(target_os = "espidf"))]
fn check_sim_path(path: &str) -> Result<(), StorageError> {
    if !path.starts_with('/') || path.split('/').any(|c| c == "..") {
        return Err(StorageError::InvalidPath);
    }
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
fn sim_parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

impl FileStore for SdCardStore {
    fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        match &self.backend {
            Backend::Mounted { root } => {
                let full = Self::full_path(root, path)?;
                Self::recover(&full);
                fs::read(&full).map_err(|e| map_io(&e))
            }
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(files) => {
                check_sim_path(path)?;
                files.borrow().get(path).cloned().ok_or(StorageError::NotFound)
            }
        }
    }

    fn read_range(&self, path: &str, offset: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        match &self.backend {
            Backend::Mounted { root } => {
                let full = Self::full_path(root, path)?;
                let mut file = fs::File::open(&full).map_err(|e| map_io(&e))?;
                file.seek(SeekFrom::Start(offset)).map_err(|e| map_io(&e))?;
                let mut buf = Vec::with_capacity(len);
                file.take(len as u64)
                    .read_to_end(&mut buf)
                    .map_err(|e| map_io(&e))?;
                Ok(buf)
            }
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(files) => {
                check_sim_path(path)?;
                let files = files.borrow();
                let data = files.get(path).ok_or(StorageError::NotFound)?;
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Ok(data[start..end].to_vec())
            }
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Mounted { root } => {
                let full = Self::full_path(root, path)?;
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).map_err(|e| map_io(&e))?;
                }
                let tmp = Self::tmp_path(&full);
                {
                    let mut file = fs::File::create(&tmp).map_err(|e| map_io(&e))?;
                    file.write_all(data).map_err(|e| map_io(&e))?;
                    file.sync_all().map_err(|e| map_io(&e))?;
                }
                if full.exists() {
                    fs::remove_file(&full).map_err(|e| map_io(&e))?;
                }
                fs::rename(&tmp, &full).map_err(|e| map_io(&e))?;
                debug!("SD: wrote {} ({} bytes)", path, data.len());
                Ok(())
            }
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(files) => {
                check_sim_path(path)?;
                files.borrow_mut().insert(path.to_string(), data.to_vec());
                Ok(())
            }
        }
    }

    fn append(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Mounted { root } => {
                let full = Self::full_path(root, path)?;
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent).map_err(|e| map_io(&e))?;
                }
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&full)
                    .map_err(|e| map_io(&e))?;
                file.write_all(data).map_err(|e| map_io(&e))?;
                file.flush().map_err(|e| map_io(&e))
            }
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(files) => {
                check_sim_path(path)?;
                files
                    .borrow_mut()
                    .entry(path.to_string())
                    .or_default()
                    .extend_from_slice(data);
                Ok(())
            }
        }
    }

    fn exists(&self, path: &str) -> bool {
        match &self.backend {
            Backend::Mounted { root } => Self::full_path(root, path).is_ok_and(|full| {
                Self::recover(&full);
                full.exists()
            }),
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(files) => {
                let files = files.borrow();
                let dir_prefix = format!("{}/", path.trim_end_matches('/'));
                files.contains_key(path) || files.keys().any(|k| k.starts_with(&dir_prefix))
            }
        }
    }

    fn size(&self, path: &str) -> Result<u64, StorageError> {
        match &self.backend {
            Backend::Mounted { root } => {
                let full = Self::full_path(root, path)?;
                fs::metadata(&full).map(|m| m.len()).map_err(|e| map_io(&e))
            }
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(files) => files
                .borrow()
                .get(path)
                .map(|d| d.len() as u64)
                .ok_or(StorageError::NotFound),
        }
    }

    fn remove(&self, path: &str) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Mounted { root } => {
                let full = Self::full_path(root, path)?;
                fs::remove_file(&full).map_err(|e| map_io(&e))
            }
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(files) => files
                .borrow_mut()
                .remove(path)
                .map(|_| ())
                .ok_or(StorageError::NotFound),
        }
    }

    fn create_dir_all(&self, path: &str) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Mounted { root } => {
                let full = Self::full_path(root, path)?;
                fs::create_dir_all(&full).map_err(|e| map_io(&e))
            }
            // Directories are implicit in the simulated card.
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(_) => check_sim_path(path),
        }
    }

    fn list(&self, dir: &str) -> Result<Vec<String>, StorageError> {
        match &self.backend {
            Backend::Mounted { root } => {
                let full = Self::full_path(root, dir)?;
                let mut names = Vec::new();
                for entry in fs::read_dir(&full).map_err(|e| map_io(&e))? {
                    let entry = entry.map_err(|e| map_io(&e))?;
                    if entry.file_type().is_ok_and(|t| t.is_file()) {
                        if let Some(name) = entry.file_name().to_str() {
                            names.push(name.to_string());
                        }
                    }
                }
                Ok(names)
            }
            #[cfg(not(target_os = "espidf"))]
            Backend::Simulated(files) => {
                check_sim_path(dir)?;
                let dir = dir.trim_end_matches('/');
                let dir = if dir.is_empty() { "/" } else { dir };
                Ok(files
                    .borrow()
                    .keys()
                    .filter(|k| sim_parent(k) == dir)
                    .filter_map(|k| k.rsplit('/').next().map(str::to_string))
                    .collect())
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
