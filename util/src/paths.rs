use crate::config::AppConfig;
use std::{
    fs, io,
    path::{Path, PathBuf},
};

/// Create a directory (and all parents) if it doesn't exist, and return the path.
pub fn ensure_dir<P: AsRef<Path>>(path: P) -> io::Result<PathBuf> {
    let p = path.as_ref();
    fs::create_dir_all(p)?;
    Ok(p.to_path_buf())
}

/// Ensure the parent directory of a *file path* exists (no-op if none).
pub fn ensure_parent_dir<P: AsRef<Path>>(file_path: P) -> io::Result<()> {
    if let Some(parent) = file_path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Result store root (absolute), from `RESULTS_ROOT`.
/// If relative in env, resolve against current_dir().
pub fn results_root() -> PathBuf {
    let root = AppConfig::global().results_root.clone();
    let p = PathBuf::from(root);
    if p.is_absolute() {
        p
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    }
}

/// Makes an identifier safe to use as a single path component.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `_`, and the result never
/// starts with a dot so `..` cannot escape the store.
pub fn sanitize_component(raw: &str) -> String {
    let mut out: String = raw
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    while out.starts_with('.') {
        out.replace_range(0..1, "_");
    }
    if out.is_empty() { "_".to_string() } else { out }
}

/// {root}/{task}
pub fn task_dir(root: &Path, task_id: &str) -> PathBuf {
    root.join(sanitize_component(task_id))
}

/// {root}/{task}/{student}
pub fn student_dir(root: &Path, task_id: &str, student_id: &str) -> PathBuf {
    task_dir(root, task_id).join(sanitize_component(student_id))
}

/// Append-only event log for one (student, module) unit: .../{module}.jsonl
pub fn unit_log_path(root: &Path, task_id: &str, student_id: &str, module_id: &str) -> PathBuf {
    student_dir(root, task_id, student_id).join(format!("{}.jsonl", sanitize_component(module_id)))
}

/// Writer lock for a unit: .../{module}.lock
pub fn unit_lock_path(root: &Path, task_id: &str, student_id: &str, module_id: &str) -> PathBuf {
    student_dir(root, task_id, student_id).join(format!("{}.lock", sanitize_component(module_id)))
}

/// Final assessment for a student: .../assessment.json
pub fn assessment_path(root: &Path, task_id: &str, student_id: &str) -> PathBuf {
    student_dir(root, task_id, student_id).join("assessment.json")
}
