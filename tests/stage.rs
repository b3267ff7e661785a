use std::fs;
use std::path::Path;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use houndsleuth::bucket::{LocalBucket, ObjectStore};
use houndsleuth::domain::JobId;
use houndsleuth::error::SleuthError;
use houndsleuth::stage::Stager;

fn seed(root: &Utf8PathBuf, files: &[(&str, &str)]) {
    for (key, body) in files {
        let path = root.join(key);
        fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
        fs::write(path.as_std_path(), body).unwrap();
    }
}

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

/// Serves a fixed key list and fails downloads for keys containing `bad`.
struct FlakyStore {
    keys: Vec<String>,
    credential_failure: bool,
}

impl ObjectStore for FlakyStore {
    fn list_folders(&self, _prefix: &str) -> Result<Vec<String>, SleuthError> {
        Ok(Vec::new())
    }

    fn object_exists(&self, _key: &str) -> Result<bool, SleuthError> {
        Ok(true)
    }

    fn list_objects(&self, prefix: &str) -> Result<Vec<String>, SleuthError> {
        Ok(self
            .keys
            .iter()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn download(&self, key: &str, destination: &Path) -> Result<(), SleuthError> {
        if key.contains("bad") {
            if self.credential_failure {
                return Err(SleuthError::Credentials("status 403: AccessDenied".to_string()));
            }
            return Err(SleuthError::BucketStatus {
                status: 500,
                message: "InternalError".to_string(),
            });
        }
        fs::write(destination, key).map_err(|err| SleuthError::Filesystem(err.to_string()))
    }
}

#[test]
fn stage_mirrors_relative_paths() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(&temp.path().join("bucket"));
    seed(
        &root,
        &[
            ("megahit-sampleA/form-data.txt", "email=a@b"),
            ("megahit-sampleA/reads.fq", "@r1\nACGT\n+\nIIII\n"),
            ("megahit-sampleA/lanes/l2.fq", "@r2\n"),
            ("megahit-sampleAB/other.fq", "not mine"),
        ],
    );
    let stager = Stager::new(utf8(&temp.path().join("staging")));
    let job: JobId = "megahit-sampleA".parse().unwrap();

    let report = stager.stage(&LocalBucket::new(root), &job).unwrap();

    assert!(report.is_complete());
    assert_eq!(report.downloaded, 3);
    let dir = stager.job_dir(&job);
    assert_eq!(report.directory, dir);
    assert_eq!(
        fs::read_to_string(dir.join("reads.fq").as_std_path()).unwrap(),
        "@r1\nACGT\n+\nIIII\n"
    );
    assert!(dir.join("lanes").join("l2.fq").as_std_path().exists());
    assert!(!dir.join("other.fq").as_std_path().exists());
}

#[test]
fn failed_object_is_counted_not_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let store = FlakyStore {
        keys: vec![
            "spraynpray-r/form-data.txt".to_string(),
            "spraynpray-r/bad.fa".to_string(),
            "spraynpray-r/contigs.fa".to_string(),
        ],
        credential_failure: false,
    };
    let stager = Stager::new(utf8(temp.path()));
    let job: JobId = "spraynpray-r".parse().unwrap();

    let report = stager.stage(&store, &job).unwrap();

    assert_eq!(report.downloaded, 2);
    assert_eq!(report.failed, 1);
    assert!(!report.is_complete());
    assert!(!stager.job_dir(&job).join("bad.fa").as_std_path().exists());
}

#[test]
fn unsafe_keys_are_refused() {
    let temp = tempfile::tempdir().unwrap();
    let store = FlakyStore {
        keys: vec![
            "gtotree-q/../../escape.txt".to_string(),
            "gtotree-q/".to_string(),
            "gtotree-q/genomes.txt".to_string(),
        ],
        credential_failure: false,
    };
    let stager = Stager::new(utf8(&temp.path().join("staging")));
    let job: JobId = "gtotree-q".parse().unwrap();

    let report = stager.stage(&store, &job).unwrap();

    assert_eq!(report.downloaded, 1);
    assert_eq!(report.failed, 1);
    assert!(!temp.path().join("escape.txt").exists());
}

#[test]
fn credential_failure_propagates() {
    let temp = tempfile::tempdir().unwrap();
    let store = FlakyStore {
        keys: vec!["fegenie-z/bad.fa".to_string()],
        credential_failure: true,
    };
    let stager = Stager::new(utf8(temp.path()));
    let job: JobId = "fegenie-z".parse().unwrap();

    assert_matches!(stager.stage(&store, &job), Err(SleuthError::Credentials(_)));
}

#[test]
fn unwritable_job_directory_is_counted_not_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let root = utf8(&temp.path().join("bucket"));
    seed(
        &root,
        &[
            ("fegenie-a/form-data.txt", "x"),
            ("fegenie-a/genome.fna", ">c1\nACGT\n"),
        ],
    );
    let staging = utf8(&temp.path().join("staging"));
    fs::create_dir_all(staging.as_std_path()).unwrap();
    fs::write(staging.join("fegenie-a").as_std_path(), "in the way").unwrap();
    let stager = Stager::new(staging.clone());
    let job: JobId = "fegenie-a".parse().unwrap();

    let report = stager.stage(&LocalBucket::new(root), &job).unwrap();

    assert!(!report.is_complete());
    assert_eq!(report.downloaded, 0);
    assert_eq!(report.failed, 2);
    assert!(staging.join("fegenie-a").as_std_path().is_file());
}
