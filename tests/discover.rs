use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use houndsleuth::bucket::ObjectStore;
use houndsleuth::discover::Discoverer;
use houndsleuth::domain::{JobId, Route, RoutingTable};
use houndsleuth::error::SleuthError;

#[derive(Default)]
struct ScriptedStore {
    folders: HashMap<String, Vec<String>>,
    failing_prefixes: HashMap<String, fn() -> SleuthError>,
    objects: HashSet<String>,
    exists_calls: RefCell<Vec<String>>,
}

impl ScriptedStore {
    fn folder(mut self, prefix: &str, name: &str, with_marker: bool) -> Self {
        self.folders
            .entry(prefix.to_string())
            .or_default()
            .push(name.to_string());
        self.objects.insert(format!("{name}/reads.fq"));
        if with_marker {
            self.objects.insert(format!("{name}/form-data.txt"));
        }
        self
    }

    fn failing(mut self, prefix: &str, error: fn() -> SleuthError) -> Self {
        self.failing_prefixes.insert(prefix.to_string(), error);
        self
    }
}

impl ObjectStore for ScriptedStore {
    fn list_folders(&self, prefix: &str) -> Result<Vec<String>, SleuthError> {
        if let Some(error) = self.failing_prefixes.get(prefix) {
            return Err(error());
        }
        Ok(self.folders.get(prefix).cloned().unwrap_or_default())
    }

    fn object_exists(&self, key: &str) -> Result<bool, SleuthError> {
        self.exists_calls.borrow_mut().push(key.to_string());
        Ok(self.objects.contains(key))
    }

    fn list_objects(&self, _prefix: &str) -> Result<Vec<String>, SleuthError> {
        Ok(Vec::new())
    }

    fn download(&self, _key: &str, _destination: &Path) -> Result<(), SleuthError> {
        Ok(())
    }
}

fn routing(prefixes: &[&str]) -> RoutingTable {
    RoutingTable::new(
        prefixes
            .iter()
            .map(|prefix| Route {
                prefix: prefix.to_string(),
                handler: Utf8PathBuf::from(format!("/opt/{prefix}sh")),
            })
            .collect(),
    )
    .unwrap()
}

fn names(discovered: &houndsleuth::discover::Discovery) -> Vec<&str> {
    discovered.jobs.iter().map(|job| job.id.as_str()).collect()
}

#[test]
fn folders_without_marker_are_skipped() {
    let table = routing(&["megahit-"]);
    let store = ScriptedStore::default()
        .folder("megahit-", "megahit-done", true)
        .folder("megahit-", "megahit-uploading", false);

    let discovery = Discoverer::new(&table, "form-data.txt")
        .discover(&store, &HashSet::new())
        .unwrap();

    assert_eq!(names(&discovery), vec!["megahit-done"]);
    assert!(discovery.failures.is_empty());
}

#[test]
fn claimed_folders_are_not_rechecked() {
    let table = routing(&["spraynpray-"]);
    let store = ScriptedStore::default()
        .folder("spraynpray-", "spraynpray-old", true)
        .folder("spraynpray-", "spraynpray-new", true);
    let claimed: HashSet<JobId> = ["spraynpray-old".parse().unwrap()].into_iter().collect();

    let discovery = Discoverer::new(&table, "form-data.txt")
        .discover(&store, &claimed)
        .unwrap();

    assert_eq!(names(&discovery), vec!["spraynpray-new"]);
    assert_eq!(
        *store.exists_calls.borrow(),
        vec!["spraynpray-new/form-data.txt".to_string()]
    );
}

#[test]
fn failing_prefix_does_not_starve_others() {
    let table = routing(&["gtotree-", "fegenie-"]);
    let store = ScriptedStore::default()
        .failing("gtotree-", || SleuthError::BucketStatus {
            status: 500,
            message: "InternalError".to_string(),
        })
        .folder("fegenie-", "fegenie-s1", true);

    let discovery = Discoverer::new(&table, "form-data.txt")
        .discover(&store, &HashSet::new())
        .unwrap();

    assert_eq!(names(&discovery), vec!["fegenie-s1"]);
    assert_eq!(discovery.failures.len(), 1);
    assert_eq!(discovery.failures[0].prefix, "gtotree-");
}

#[test]
fn credential_failure_aborts_discovery() {
    let table = routing(&["gtotree-", "fegenie-"]);
    let store = ScriptedStore::default()
        .failing("gtotree-", || SleuthError::Credentials("status 403".to_string()))
        .folder("fegenie-", "fegenie-s1", true);

    let result = Discoverer::new(&table, "form-data.txt").discover(&store, &HashSet::new());
    assert_matches!(result, Err(SleuthError::Credentials(_)));
}

#[test]
fn overlapping_prefixes_yield_one_job_with_longest_prefix() {
    let table = routing(&["megahit-", "megahit-long-"]);
    let store = ScriptedStore::default()
        .folder("megahit-", "megahit-long-s1", true)
        .folder("megahit-long-", "megahit-long-s1", true);

    let discovery = Discoverer::new(&table, "form-data.txt")
        .discover(&store, &HashSet::new())
        .unwrap();

    assert_eq!(names(&discovery), vec!["megahit-long-s1"]);
    assert_eq!(discovery.jobs[0].prefix, "megahit-long-");
}

#[test]
fn custom_marker_name() {
    let table = routing(&["mhcscan-"]);
    let store = ScriptedStore::default().folder("mhcscan-", "mhcscan-a", false);

    let discovery = Discoverer::new(&table, "reads.fq")
        .discover(&store, &HashSet::new())
        .unwrap();

    assert_eq!(names(&discovery), vec!["mhcscan-a"]);
}
