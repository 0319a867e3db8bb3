use crate::error::MarkerError;
use crate::report::FinalAssessment;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;
use util::paths;

/// Writes `{root}/{task}/{student}/assessment.json` via a temp file and rename,
/// so readers never see a half-written record.
pub async fn save_assessment(
    root: &Path,
    assessment: &FinalAssessment,
) -> Result<PathBuf, MarkerError> {
    let path = paths::assessment_path(root, &assessment.task_id, &assessment.student_id);
    let bytes = serde_json::to_vec_pretty(assessment)?;
    let target = path.clone();

    tokio::task::spawn_blocking(move || -> Result<(), MarkerError> {
        let dir = target
            .parent()
            .ok_or_else(|| MarkerError::Io(format!("{} has no parent", target.display())))?;
        paths::ensure_dir(dir)?;
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| MarkerError::Io(e.error.to_string()))?;
        Ok(())
    })
    .await
    .map_err(|e| MarkerError::Io(format!("assessment writer panicked: {e}")))??;

    info!(path = ?path, "assessment saved");
    Ok(path)
}

pub async fn load_assessment(
    root: &Path,
    task_id: &str,
    student_id: &str,
) -> Result<FinalAssessment, MarkerError> {
    let path = paths::assessment_path(root, task_id, student_id);
    let content = tokio::fs::read_to_string(&path).await?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feedback::Feedback;
    use crate::flags::FlagReport;
    use crate::report::{Evidence, compose};
    use crate::scorer::ScoreSummary;
    use crate::types::Submission;
    use tempfile::TempDir;
    use util::task_config::FeedbackFormat;

    #[tokio::test]
    async fn saved_assessment_loads_back() {
        let dir = TempDir::new().unwrap();
        let assessment = compose(
            &Submission::new("u1", "prac1"),
            ScoreSummary::from_scores(Vec::new()),
            Feedback::new("Feedback", FeedbackFormat::Markdown),
            FlagReport {
                flags: Vec::new(),
                summary_message: "No submission problems detected".into(),
            },
            Evidence::default(),
        );

        let path = save_assessment(dir.path(), &assessment).await.unwrap();
        assert_eq!(path, dir.path().join("prac1/u1/assessment.json"));
        // overwrite in place
        save_assessment(dir.path(), &assessment).await.unwrap();

        let back = load_assessment(dir.path(), "prac1", "u1").await.unwrap();
        assert_eq!(back, assessment);
        let leftovers = std::fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
