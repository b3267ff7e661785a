use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::domain::JobId;
use crate::error::SleuthError;

/// Durable append-only set of claimed job identities.
pub trait Ledger {
    /// Everything claimed so far. Empty when nothing was ever recorded.
    fn load_claimed(&self) -> Result<HashSet<JobId>, SleuthError>;

    /// Must not return `Ok` before the identities are durable.
    fn claim(&mut self, ids: &[JobId]) -> Result<(), SleuthError>;
}

/// Newline-delimited UTF-8 file, one identity per line.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: Utf8PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Ledger for FileLedger {
    fn load_claimed(&self) -> Result<HashSet<JobId>, SleuthError> {
        let content = match fs::read_to_string(self.path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(err) => return Err(SleuthError::Ledger(format!("read {}: {err}", self.path))),
        };

        let mut claimed = HashSet::new();
        // Identities are exact folder names, so only the line terminator goes.
        for (index, line) in content.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match line.parse::<JobId>() {
                Ok(id) => {
                    claimed.insert(id);
                }
                Err(err) => {
                    tracing::warn!(
                        path = %self.path,
                        line = index + 1,
                        error = %err,
                        "ignoring unreadable ledger entry"
                    );
                }
            }
        }
        Ok(claimed)
    }

    fn claim(&mut self, ids: &[JobId]) -> Result<(), SleuthError> {
        if ids.is_empty() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| SleuthError::Ledger(format!("create {parent}: {err}")))?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.path.as_std_path())
            .map_err(|err| SleuthError::Ledger(format!("open {}: {err}", self.path)))?;

        let mut batch = String::new();
        if !ends_with_newline(&mut file)
            .map_err(|err| SleuthError::Ledger(format!("read {}: {err}", self.path)))?
        {
            batch.push('\n');
        }
        for id in ids {
            batch.push_str(id.as_str());
            batch.push('\n');
        }
        file.write_all(batch.as_bytes())
            .map_err(|err| SleuthError::Ledger(format!("append {}: {err}", self.path)))?;
        file.sync_all()
            .map_err(|err| SleuthError::Ledger(format!("sync {}: {err}", self.path)))?;
        Ok(())
    }
}

fn ends_with_newline(file: &mut fs::File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}
