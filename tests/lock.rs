use camino::Utf8PathBuf;

use houndsleuth::lock::LockGuard;

fn lock_path(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().join("run").join("houndsleuth.lock")).unwrap()
}

#[test]
fn acquire_creates_token() {
    let temp = tempfile::tempdir().unwrap();
    let path = lock_path(&temp);
    let guard = LockGuard::acquire(&path).unwrap().unwrap();
    assert!(path.as_std_path().exists());
    assert_eq!(guard.path(), path.as_path());
}

#[test]
fn second_acquire_is_contended() {
    let temp = tempfile::tempdir().unwrap();
    let path = lock_path(&temp);
    let _held = LockGuard::acquire(&path).unwrap().unwrap();
    assert!(LockGuard::acquire(&path).unwrap().is_none());
}

#[test]
fn release_removes_token_and_frees_lock() {
    let temp = tempfile::tempdir().unwrap();
    let path = lock_path(&temp);
    let guard = LockGuard::acquire(&path).unwrap().unwrap();
    guard.release();
    assert!(!path.as_std_path().exists());
    assert!(LockGuard::acquire(&path).unwrap().is_some());
}

#[test]
fn drop_releases_on_early_return() {
    fn failing_run(path: &Utf8PathBuf) -> Result<(), String> {
        let _guard = LockGuard::acquire(path)
            .map_err(|err| err.to_string())?
            .ok_or("contended")?;
        Err("handler exploded".to_string())
    }

    let temp = tempfile::tempdir().unwrap();
    let path = lock_path(&temp);
    assert!(failing_run(&path).is_err());
    assert!(!path.as_std_path().exists());
    assert!(LockGuard::acquire(&path).unwrap().is_some());
}

#[test]
fn stale_lock_file_without_holder_is_available() {
    let temp = tempfile::tempdir().unwrap();
    let path = lock_path(&temp);
    std::fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    std::fs::write(path.as_std_path(), "12345\n").unwrap();
    assert!(LockGuard::acquire(&path).unwrap().is_some());
}
