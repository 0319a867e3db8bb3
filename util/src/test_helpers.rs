use crate::config::AppConfig;
use tempfile::TempDir;

/// Creates a unique temporary directory and points the result store at it
/// for the duration of the test. The directory is removed when the returned
/// `TempDir` is dropped.
///
/// Keep the returned `TempDir` in scope for as long as you need the files.
pub fn setup_test_results_root() -> TempDir {
    let tmp = TempDir::new().unwrap_or_else(|e| panic!("failed to create tempdir: {e}"));
    let abs = tmp
        .path()
        .canonicalize()
        .unwrap_or_else(|_| tmp.path().to_path_buf());
    AppConfig::set_results_root(abs.to_string_lossy());
    tmp
}
