use std::fs;

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::bucket::ObjectStore;
use crate::domain::JobId;
use crate::error::SleuthError;

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub directory: Utf8PathBuf,
    pub downloaded: usize,
    pub failed: usize,
}

impl StageReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

/// Mirrors a job folder into `<staging_root>/<job>/`.
#[derive(Debug, Clone)]
pub struct Stager {
    staging_root: Utf8PathBuf,
}

impl Stager {
    pub fn new(staging_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
        }
    }

    pub fn staging_root(&self) -> &Utf8Path {
        &self.staging_root
    }

    pub fn job_dir(&self, job: &JobId) -> Utf8PathBuf {
        self.staging_root.join(job.as_str())
    }

    /// Per-object failures are counted, not returned. Only credential
    /// failures come back as `Err`, since they doom the whole run.
    pub fn stage<S: ObjectStore>(
        &self,
        store: &S,
        job: &JobId,
    ) -> Result<StageReport, SleuthError> {
        let directory = self.job_dir(job);
        let mut report = StageReport {
            directory: directory.clone(),
            downloaded: 0,
            failed: 0,
        };

        let folder = format!("{job}/");
        let keys = match store.list_objects(&folder) {
            Ok(keys) => keys,
            Err(err) if err.is_credential() => return Err(err),
            Err(err) => {
                tracing::error!(job = %job, error = %err, "failed to list job objects");
                report.failed += 1;
                return Ok(report);
            }
        };
        if keys.is_empty() {
            tracing::warn!(job = %job, "no objects found in job folder");
        }

        if let Err(err) = fs::create_dir_all(directory.as_std_path()) {
            tracing::error!(job = %job, path = %directory, error = %err, "failed to create staging directory");
            report.failed += keys.len().max(1);
            return Ok(report);
        }

        for key in &keys {
            let Some(relative) = key.strip_prefix(&folder) else {
                continue;
            };
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            match self.fetch_object(store, key, relative, &directory) {
                Ok(target) => {
                    report.downloaded += 1;
                    tracing::info!(job = %job, key = %key, path = %target, "downloaded object");
                }
                Err(err) if err.is_credential() => return Err(err),
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(job = %job, key = %key, error = %err, "failed to download object");
                }
            }
        }

        Ok(report)
    }

    fn fetch_object<S: ObjectStore>(
        &self,
        store: &S,
        key: &str,
        relative: &str,
        directory: &Utf8Path,
    ) -> Result<Utf8PathBuf, SleuthError> {
        let relative = safe_relative_path(relative)
            .ok_or_else(|| SleuthError::UnsafeObjectKey(key.to_string()))?;
        let target = directory.join(relative);
        let parent = target
            .parent()
            .ok_or_else(|| SleuthError::Filesystem(format!("invalid staging path {target}")))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| SleuthError::Filesystem(format!("create {parent}: {err}")))?;

        let temp = tempfile::Builder::new()
            .prefix(".houndsleuth-part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| SleuthError::Filesystem(err.to_string()))?;
        store.download(key, temp.path())?;
        temp.persist(target.as_std_path())
            .map_err(|err| SleuthError::Filesystem(format!("persist {target}: {err}")))?;
        Ok(target)
    }
}

fn safe_relative_path(relative: &str) -> Option<Utf8PathBuf> {
    let mut clean = Utf8PathBuf::new();
    for component in Utf8Path::new(relative).components() {
        match component {
            Utf8Component::Normal(part) => clean.push(part),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir | Utf8Component::RootDir | Utf8Component::Prefix(_) => {
                return None;
            }
        }
    }
    if clean.as_str().is_empty() {
        None
    } else {
        Some(clean)
    }
}
