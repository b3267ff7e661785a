use std::fs;
use std::io;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::SleuthError;

/// The slice of an object store the dispatcher needs. Keys are
/// `/`-separated; "folders" are common prefixes under delimiter `/`.
pub trait ObjectStore {
    /// Folder names directly under `prefix` (delimiter `/`), without the
    /// trailing slash.
    fn list_folders(&self, prefix: &str) -> Result<Vec<String>, SleuthError>;

    /// `Ok(false)` when the object does not exist.
    fn object_exists(&self, key: &str) -> Result<bool, SleuthError>;

    /// Every key starting with `prefix`, across all pages.
    fn list_objects(&self, prefix: &str) -> Result<Vec<String>, SleuthError>;

    fn download(&self, key: &str, destination: &Path) -> Result<(), SleuthError>;
}

/// A directory tree used as a bucket, e.g. an rclone/s3fs mount.
#[derive(Debug, Clone)]
pub struct LocalBucket {
    root: Utf8PathBuf,
}

impl LocalBucket {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn key_path(&self, key: &str) -> Utf8PathBuf {
        self.root.join(key.trim_start_matches('/'))
    }
}

impl ObjectStore for LocalBucket {
    fn list_folders(&self, prefix: &str) -> Result<Vec<String>, SleuthError> {
        let (dir_part, name_part) = match prefix.rfind('/') {
            Some(index) => (&prefix[..=index], &prefix[index + 1..]),
            None => ("", prefix),
        };
        let dir = self.key_path(dir_part);
        let entries = match fs::read_dir(dir.as_std_path()) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(SleuthError::Filesystem(format!("list {dir}: {err}"))),
        };

        let mut folders = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| SleuthError::Filesystem(err.to_string()))?;
            if !entry.path().is_dir() {
                continue;
            }
            let Ok(name) = entry.file_name().into_string() else {
                tracing::debug!(dir = %dir, "skipping non-utf8 folder name");
                continue;
            };
            if name.starts_with(name_part) {
                folders.push(format!("{dir_part}{name}"));
            }
        }
        folders.sort();
        Ok(folders)
    }

    fn object_exists(&self, key: &str) -> Result<bool, SleuthError> {
        Ok(self.key_path(key).as_std_path().is_file())
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>, SleuthError> {
        let (dir_part, _) = match prefix.rfind('/') {
            Some(index) => (&prefix[..=index], &prefix[index + 1..]),
            None => ("", prefix),
        };
        let start = self.key_path(dir_part);
        if !start.as_std_path().is_dir() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            let entries = fs::read_dir(dir.as_std_path())
                .map_err(|err| SleuthError::Filesystem(format!("list {dir}: {err}")))?;
            for entry in entries {
                let entry = entry.map_err(|err| SleuthError::Filesystem(err.to_string()))?;
                let path = Utf8PathBuf::from_path_buf(entry.path()).map_err(|path| {
                    SleuthError::Filesystem(format!("non-utf8 path in bucket: {}", path.display()))
                })?;
                if path.as_std_path().is_dir() {
                    stack.push(path);
                    continue;
                }
                let relative = path
                    .strip_prefix(&self.root)
                    .map_err(|err| SleuthError::Filesystem(err.to_string()))?;
                let key = relative
                    .components()
                    .map(|component| component.as_str())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn download(&self, key: &str, destination: &Path) -> Result<(), SleuthError> {
        let source = self.key_path(key);
        fs::copy(source.as_std_path(), destination)
            .map_err(|err| SleuthError::Filesystem(format!("copy {source}: {err}")))?;
        Ok(())
    }
}
