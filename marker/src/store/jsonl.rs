use crate::error::MarkerError;
use crate::store::lock::UnitLock;
use crate::traits::response_log::ResponseLog;
use crate::types::{UnitEvent, UnitKey};
use async_trait::async_trait;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{trace, warn};
use util::paths;

/// One JSON-lines file per unit under the results root:
/// `{root}/{task}/{student}/{module}.jsonl`.
#[derive(Debug, Clone)]
pub struct JsonlResponseLog {
    root: PathBuf,
}

impl JsonlResponseLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Rooted at the configured `RESULTS_ROOT`.
    pub fn from_config() -> Self {
        Self::new(paths::results_root())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_path(&self, key: &UnitKey) -> PathBuf {
        paths::unit_log_path(&self.root, &key.task_id, &key.student_id, &key.module_id)
    }

    fn lock_path(&self, key: &UnitKey) -> PathBuf {
        paths::unit_lock_path(&self.root, &key.task_id, &key.student_id, &key.module_id)
    }
}

#[async_trait]
impl ResponseLog for JsonlResponseLog {
    async fn append(&self, key: &UnitKey, event: &UnitEvent) -> Result<(), MarkerError> {
        let path = self.log_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .await?;
        let len = file.metadata().await?.len();
        let end = complete_len(&mut file, len).await?;
        if end < len {
            warn!(unit = %key, bytes = len - end, "dropped torn final log line before appending");
            file.set_len(end).await?;
        }
        file.seek(SeekFrom::Start(end)).await?;
        file.write_all(&line).await?;
        file.flush().await?;
        file.sync_data().await?;
        trace!(unit = %key, bytes = line.len(), "event appended");
        Ok(())
    }

    async fn events(&self, key: &UnitKey) -> Result<Vec<UnitEvent>, MarkerError> {
        let path = self.log_path(key);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        parse_lines(key, &content)
    }

    fn lock(&self, key: &UnitKey) -> Result<UnitLock, MarkerError> {
        UnitLock::acquire_file(&self.lock_path(key), key)
    }
}

/// Offset just past the last complete line.
///
/// A crash mid-append leaves a final line without its newline; appending after
/// it would glue two events together, so the next writer cuts it off first.
async fn complete_len(file: &mut File, len: u64) -> Result<u64, MarkerError> {
    if len == 0 {
        return Ok(0);
    }
    let mut last = [0u8; 1];
    file.seek(SeekFrom::Start(len - 1)).await?;
    file.read_exact(&mut last).await?;
    if last[0] == b'\n' {
        return Ok(len);
    }

    let mut content = Vec::with_capacity(len as usize);
    file.seek(SeekFrom::Start(0)).await?;
    file.read_to_end(&mut content).await?;
    Ok(content
        .iter()
        .rposition(|b| *b == b'\n')
        .map_or(0, |i| i as u64 + 1))
}

/// A final line without its newline is a write torn by a crash and is dropped.
fn parse_lines(key: &UnitKey, content: &str) -> Result<Vec<UnitEvent>, MarkerError> {
    let complete = content.ends_with('\n');
    let lines: Vec<&str> = content.lines().collect();
    let mut events = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<UnitEvent>(line) {
            Ok(event) => events.push(event),
            Err(e) if !complete && i + 1 == lines.len() => {
                warn!(unit = %key, error = %e, "ignoring torn final log line");
            }
            Err(e) => {
                return Err(MarkerError::InvalidJson(format!(
                    "{key} line {}: {e}",
                    i + 1
                )));
            }
        }
    }
    Ok(events)
}
