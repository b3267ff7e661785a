use std::collections::HashSet;

use chrono::Utc;
use serde::Serialize;

use crate::bucket::ObjectStore;
use crate::domain::{Job, JobId, RoutingTable};
use crate::error::SleuthError;

/// A prefix whose listing failed; the rest of the scan went on without it.
#[derive(Debug, Clone, Serialize)]
pub struct PrefixFailure {
    pub prefix: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Discovery {
    pub jobs: Vec<Job>,
    pub failures: Vec<PrefixFailure>,
}

pub struct Discoverer<'a> {
    routing: &'a RoutingTable,
    marker: &'a str,
}

impl<'a> Discoverer<'a> {
    pub fn new(routing: &'a RoutingTable, marker: &'a str) -> Self {
        Self { routing, marker }
    }

    pub fn marker_key(&self, folder: &str) -> String {
        format!("{folder}/{}", self.marker)
    }

    /// Scans every configured prefix in routing order. Folders already in
    /// `claimed`, or still missing their completion marker, are left out.
    pub fn discover<S: ObjectStore>(
        &self,
        store: &S,
        claimed: &HashSet<JobId>,
    ) -> Result<Discovery, SleuthError> {
        let mut discovery = Discovery::default();
        let mut seen = HashSet::new();

        for prefix in self.routing.prefixes() {
            let folders = match store.list_folders(prefix) {
                Ok(folders) => folders,
                Err(err) if err.is_credential() => return Err(err),
                Err(err) => {
                    tracing::warn!(prefix, error = %err, "listing failed, skipping prefix");
                    discovery.failures.push(PrefixFailure {
                        prefix: prefix.to_string(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            tracing::debug!(prefix, folders = folders.len(), "listed prefix");

            for folder in folders {
                let id = match folder.parse::<JobId>() {
                    Ok(id) => id,
                    Err(err) => {
                        tracing::debug!(prefix, folder = %folder, error = %err, "skipping folder");
                        continue;
                    }
                };
                if claimed.contains(&id) || seen.contains(&id) {
                    continue;
                }
                match self.is_complete(store, &id) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) if err.is_credential() => return Err(err),
                    Err(err) => {
                        tracing::warn!(job = %id, error = %err, "marker check failed, will retry next run");
                        continue;
                    }
                }

                let job_prefix = self
                    .routing
                    .longest_prefix(&id)
                    .unwrap_or(prefix)
                    .to_string();
                tracing::info!(job = %id, prefix = %job_prefix, "found new folder ready for processing");
                seen.insert(id.clone());
                discovery.jobs.push(Job {
                    id,
                    prefix: job_prefix,
                    discovered_at: Utc::now(),
                });
            }
        }

        Ok(discovery)
    }

    fn is_complete<S: ObjectStore>(&self, store: &S, id: &JobId) -> Result<bool, SleuthError> {
        store.object_exists(&self.marker_key(id.as_str()))
    }
}
