//! Lazy payload entry sources.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{HarnessError, Result};

/// One named file destined for the payload archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadEntry {
    /// `/`-separated archive path.
    pub name: String,
    /// File contents.
    pub data: Vec<u8>,
}

impl PayloadEntry {
    /// Create an entry.
    #[must_use]
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }
}

/// Lazily walk `root`, yielding every regular file as an entry named by its
/// path relative to `root`.
///
/// Directories are visited in sorted order so archives are reproducible.
/// Files are read only when the iterator reaches them.
#[must_use]
pub fn directory_entries(root: impl Into<PathBuf>) -> DirectoryEntries {
    let root = root.into();
    DirectoryEntries {
        pending: vec![root.clone()],
        files: Vec::new(),
        root,
    }
}

/// Iterator returned by [`directory_entries`].
#[derive(Debug)]
pub struct DirectoryEntries {
    root: PathBuf,
    pending: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

impl DirectoryEntries {
    fn expand(&mut self, dir: &Path) -> Result<()> {
        let mut children = fs::read_dir(dir)
            .map_err(|err| HarnessError::Payload(format!("cannot read {}: {err}", dir.display())))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()
            .map_err(|err| HarnessError::Payload(format!("cannot list {}: {err}", dir.display())))?;
        children.sort();

        // Both stacks pop from the back, so push in reverse to visit in order.
        for child in children.into_iter().rev() {
            if child.is_dir() {
                self.pending.push(child);
            } else {
                self.files.push(child);
            }
        }
        Ok(())
    }

    fn entry_for(&self, path: &Path) -> Result<PayloadEntry> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|err| HarnessError::Payload(format!("{}: {err}", path.display())))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let data = fs::read(path)
            .map_err(|err| HarnessError::Payload(format!("cannot read {}: {err}", path.display())))?;
        Ok(PayloadEntry { name, data })
    }
}

impl Iterator for DirectoryEntries {
    type Item = Result<PayloadEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(file) = self.files.pop() {
                return Some(self.entry_for(&file));
            }
            let dir = self.pending.pop()?;
            if let Err(err) = self.expand(&dir) {
                return Some(Err(err));
            }
        }
    }
}
