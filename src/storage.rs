//! Storage abstraction for index directories.
//!
//! Every logical index lives in its own [`Directory`]: a flat namespace of
//! files. Committed indexes use [`FsDirectory`] on disk, while transaction
//! overlays use the ephemeral [`RamDirectory`].

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::error::Result;

/// A flat, named-file storage backend for one index.
///
/// Files are read and written whole; the index core never seeks inside them.
pub trait Directory: Send + Sync + fmt::Debug {
    /// Read the entire contents of a file, or `None` if it does not exist.
    fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Create or replace a file with the given contents.
    fn write_file(&self, name: &str, data: &[u8]) -> Result<()>;

    /// Delete a file. Deleting a missing file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files in this directory.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Check whether a file exists.
    fn file_exists(&self, name: &str) -> bool {
        matches!(self.read_file(name), Ok(Some(_)))
    }
}

/// An in-memory directory backing transaction-scoped overlay indexes.
#[derive(Debug, Default)]
pub struct RamDirectory {
    files: RwLock<AHashMap<String, Vec<u8>>>,
}

impl RamDirectory {
    /// Create a new, empty in-memory directory.
    pub fn new() -> Self {
        RamDirectory::default()
    }
}

impl Directory for RamDirectory {
    fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.files.read().get(name).cloned())
    }

    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        self.files.write().insert(name.to_string(), data.to_vec());
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.write().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        Ok(self.files.read().keys().cloned().collect())
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.read().contains_key(name)
    }
}

/// A directory on the local filesystem.
///
/// The path is created on first construction so that a freshly-created index
/// can be written without any extra setup step.
#[derive(Debug)]
pub struct FsDirectory {
    path: PathBuf,
}

impl FsDirectory {
    /// Open (and create if missing) a filesystem directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Ok(FsDirectory { path })
    }

    /// The filesystem path of this directory.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Directory for FsDirectory {
    fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path.join(name)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write_file(&self, name: &str, data: &[u8]) -> Result<()> {
        fs::write(self.path.join(name), data)?;
        Ok(())
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        match fs::remove_file(self.path.join(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(files)
    }

    fn file_exists(&self, name: &str) -> bool {
        self.path.join(name).is_file()
    }
}
