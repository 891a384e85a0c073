use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::path::{is_excluded_dir, normalize_relative_path};
use crate::error::{Error, Result};

/// Supplies the files of a tree being committed as `relative path -> bytes`.
pub trait FileSource {
    fn files(&self) -> Result<BTreeMap<String, Vec<u8>>>;
}

/// Reads a directory tree from disk, skipping excluded directories at any depth.
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn walk(&self, dir: &Path, prefix: &str, out: &mut BTreeMap<String, Vec<u8>>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_str().ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("non UTF-8 file name under {}", dir.display()),
                ))
            })?;
            let rel = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}/{name}")
            };

            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if is_excluded_dir(name) {
                    continue;
                }
                self.walk(&entry.path(), &rel, out)?;
            } else if file_type.is_file() {
                out.insert(rel, fs::read(entry.path())?);
            } else if file_type.is_symlink() {
                // symlinked directories are not followed
                match fs::metadata(entry.path()) {
                    Ok(meta) if meta.is_file() => {
                        out.insert(rel, fs::read(entry.path())?);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Skipping dangling symlink {}: {e}", entry.path().display());
                    }
                }
            }
        }
        Ok(())
    }
}

impl FileSource for DirectorySource {
    fn files(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        if !self.root.is_dir() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("not a directory: {}", self.root.display()),
            )));
        }
        let mut files = BTreeMap::new();
        self.walk(&self.root, "", &mut files)?;
        Ok(files)
    }
}

/// In-memory trees, keyed by path as the caller spelled it.
impl FileSource for BTreeMap<String, Vec<u8>> {
    fn files(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut files = BTreeMap::new();
        for (path, bytes) in self {
            files.insert(normalize_relative_path(path)?, bytes.clone());
        }
        Ok(files)
    }
}
