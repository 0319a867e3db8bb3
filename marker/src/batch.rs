//! Marking many submissions with bounded concurrency.
//!
//! Each job gets its own cancellation token, a child of the batch token, so a
//! single student can be stopped without touching the others in flight.

use crate::MarkingJob;
use crate::error::MarkerError;
use crate::report::FinalAssessment;
use futures::StreamExt;
use futures::stream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use util::config::AppConfig;

pub type BatchResult = Vec<(String, Result<FinalAssessment, MarkerError>)>;

pub struct MarkingBatch {
    jobs: Vec<(MarkingJob, CancellationToken)>,
    max_concurrent: usize,
    shutdown: CancellationToken,
}

impl MarkingBatch {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            jobs: Vec::new(),
            max_concurrent: max_concurrent.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Concurrency from `MAX_CONCURRENT_STUDENTS`.
    pub fn from_config() -> Self {
        Self::new(AppConfig::global().max_concurrent_students)
    }

    pub fn add(&mut self, job: MarkingJob) {
        let token = self.shutdown.child_token();
        self.jobs.push((job, token));
    }

    pub fn with_job(mut self, job: MarkingJob) -> Self {
        self.add(job);
        self
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Cancels every job for `student_id`. Returns false if there is none.
    pub fn cancel(&self, student_id: &str) -> bool {
        let mut found = false;
        for (job, token) in &self.jobs {
            if job.submission().student_id == student_id {
                token.cancel();
                found = true;
            }
        }
        if found {
            info!(student = student_id, "marking cancelled");
        }
        found
    }

    pub fn cancel_all(&self) {
        info!(jobs = self.jobs.len(), "cancelling all marking jobs");
        self.shutdown.cancel();
    }

    /// Marks every job, at most `max_concurrent` at a time.
    ///
    /// Results come back in the order the jobs were added.
    pub async fn run(&self) -> BatchResult {
        info!(
            jobs = self.jobs.len(),
            max_concurrent = self.max_concurrent,
            "starting marking batch"
        );
        let mut results: Vec<(usize, String, Result<FinalAssessment, MarkerError>)> =
            stream::iter(self.jobs.iter().enumerate())
                .map(|(index, (job, token))| async move {
                    let student_id = job.submission().student_id.clone();
                    let result = job.mark(token).await;
                    if let Err(e) = &result {
                        warn!(student = %student_id, error = %e, "submission not marked");
                    }
                    (index, student_id, result)
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;

        results.sort_by_key(|(index, _, _)| *index);
        results
            .into_iter()
            .map(|(_, student_id, result)| (student_id, result))
            .collect()
    }
}
