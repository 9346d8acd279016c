//! A remote store mounted into the local filesystem (NFS, SMB, sshfs, ...).

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use jiff::Timestamp;

use crate::ledger::encode_records;
use crate::model::DiagnosticsRecord;

use super::{RemoteStore, Result, StoreError};

/// A store rooted at a mounted directory.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    current: PathBuf,
}

impl DirectoryStore {
    /// Open a store at `root`. The mount must already exist.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(StoreError::Unavailable(format!(
                "{} is not mounted",
                root.display()
            )));
        }
        Ok(Self {
            current: root.clone(),
            root,
        })
    }

    /// Resolve a file name in the current directory.
    fn file(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.current.join(name)),
            _ => Err(StoreError::InvalidPath(name.to_string())),
        }
    }

    fn not_found(name: &str) -> impl FnOnce(io::Error) -> StoreError + '_ {
        move |e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(name.to_string())
            } else {
                StoreError::Io(e)
            }
        }
    }
}

impl RemoteStore for DirectoryStore {
    fn change_directory(&mut self, path: &str, create_if_missing: bool) -> Result<()> {
        let relative = Path::new(path);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StoreError::InvalidPath(path.to_string()));
        }

        let target = self.root.join(relative);
        if !target.is_dir() {
            if !create_if_missing {
                return Err(StoreError::DirectoryNotFound(path.to_string()));
            }
            fs::create_dir_all(&target)?;
            tracing::info!(path, "created remote directory");
        }
        self.current = target;
        Ok(())
    }

    fn list_files(&mut self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.current)? {
            let entry = entry?;
            if entry.file_type()?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn download_file(&mut self, name: &str) -> Result<Vec<u8>> {
        let path = self.file(name)?;
        fs::read(path).map_err(Self::not_found(name))
    }

    fn upload_file(&mut self, name: &str, contents: &[u8]) -> Result<()> {
        let path = self.file(name)?;
        // Write beside the target, then rename over it.
        let partial = self.file(&format!(".{name}.partial"))?;
        fs::write(&partial, contents)?;
        fs::rename(&partial, &path)?;
        Ok(())
    }

    fn append_records(&mut self, name: &str, records: &[DiagnosticsRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.file(name)?;
        let yaml = encode_records(records)?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        file.write_all(yaml.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn last_modified(&mut self, name: &str) -> Result<Timestamp> {
        let path = self.file(name)?;
        let modified = fs::metadata(path)
            .map_err(Self::not_found(name))?
            .modified()?;
        Ok(Timestamp::try_from(modified)?)
    }
}
