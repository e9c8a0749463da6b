//! Custom test assertions for cache directories

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Lock files and temporary directories anywhere below `root`
pub fn protocol_artifacts(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.ends_with(".lock") || (entry.file_type().is_dir() && name.ends_with(".tmp"))
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Assert that no lock file or temporary directory remains below `root`
pub fn assert_no_artifacts(root: &Path) {
    let leftovers = protocol_artifacts(root);
    assert!(
        leftovers.is_empty(),
        "expected a clean cache, found: {:?}",
        leftovers
    );
}

/// Assert that `dir` holds exactly `files` with the given contents
pub fn assert_module_contents(dir: &Path, files: &[(&str, &[u8])]) {
    for (name, data) in files {
        let path = dir.join(name);
        let actual = std::fs::read(&path)
            .unwrap_or_else(|e| panic!("missing module file {}: {}", path.display(), e));
        assert_eq!(&actual, data, "content mismatch in {}", path.display());
    }
    let file_count = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .count();
    assert_eq!(file_count, files.len(), "unexpected extra files in {}", dir.display());
}

/// Wait up to `within` for background cleanup to leave `root` free of protocol artifacts
pub async fn wait_for_no_artifacts(root: &Path, within: std::time::Duration) {
    let deadline = tokio::time::Instant::now() + within;
    while !protocol_artifacts(root).is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert_no_artifacts(root);
}
