//! In-memory state for the multi-step flow: uploaded tables waiting for a
//! mapping, and background generation jobs with their progress and result.
//!
//! Nothing here survives a restart. Finished entries are evicted by the
//! sweeper in `runner` once they are older than the configured TTL.

pub mod handlers;
pub mod runner;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::AbortHandle;
use uuid::Uuid;

use crate::outreach::pipeline::GatePolicy;
use crate::outreach::resolver::FieldMapping;
use crate::table::TableFormat;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Polling view of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub progress: usize,
    pub total: usize,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// A table accepted by the upload step.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub format: TableFormat,
    pub bytes: Bytes,
    pub columns: Vec<String>,
    pub total_rows: usize,
    pub mapping: FieldMapping,
    pub gate: Option<GatePolicy>,
    pub created_at: DateTime<Utc>,
}

struct JobEntry {
    status: JobStatus,
    progress: Arc<AtomicUsize>,
    total: usize,
    error: Option<String>,
    output: Option<Bytes>,
    filename: String,
    abort: Option<AbortHandle>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl JobEntry {
    fn snapshot(&self, job_id: Uuid) -> JobSnapshot {
        JobSnapshot {
            job_id,
            status: self.status,
            progress: self.progress.load(Ordering::Relaxed),
            total: self.total,
            error: self.error.clone(),
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }

    fn finish(&mut self, status: JobStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
        self.abort = None;
    }
}

/// Why a job's output cannot be downloaded.
#[derive(Debug, PartialEq, Eq)]
pub enum OutputUnavailable {
    NotFound,
    NotReady(JobStatus),
}

/// Clonable handle to all uploads and jobs, shared through `AppState`.
#[derive(Clone, Default)]
pub struct JobStore {
    uploads: Arc<RwLock<HashMap<Uuid, Upload>>>,
    jobs: Arc<RwLock<HashMap<Uuid, JobEntry>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_upload(&self, upload: Upload) -> Uuid {
        let id = Uuid::new_v4();
        self.uploads.write().await.insert(id, upload);
        id
    }

    pub async fn upload(&self, id: Uuid) -> Option<Upload> {
        self.uploads.read().await.get(&id).cloned()
    }

    /// Replaces the mapping of an upload. Returns `false` if it does not exist.
    pub async fn set_mapping(&self, id: Uuid, mapping: FieldMapping) -> bool {
        match self.uploads.write().await.get_mut(&id) {
            Some(upload) => {
                upload.mapping = mapping;
                true
            }
            None => false,
        }
    }

    /// Registers a pending job and returns its id and progress counter.
    pub async fn create_job(&self, total: usize, filename: String) -> (Uuid, Arc<AtomicUsize>) {
        let id = Uuid::new_v4();
        let progress = Arc::new(AtomicUsize::new(0));
        let entry = JobEntry {
            status: JobStatus::Pending,
            progress: progress.clone(),
            total,
            error: None,
            output: None,
            filename,
            abort: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.jobs.write().await.insert(id, entry);
        (id, progress)
    }

    pub async fn attach_abort(&self, id: Uuid, handle: AbortHandle) {
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            if job.status.is_finished() {
                return;
            }
            job.abort = Some(handle);
        }
    }

    pub async fn mark_processing(&self, id: Uuid) {
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Processing;
            }
        }
    }

    pub async fn complete(&self, id: Uuid, output: Bytes) {
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            if job.status.is_finished() {
                return;
            }
            job.output = Some(output);
            job.finish(JobStatus::Completed);
        }
    }

    pub async fn fail(&self, id: Uuid, error: String) {
        if let Some(job) = self.jobs.write().await.get_mut(&id) {
            if job.status.is_finished() {
                return;
            }
            job.error = Some(error);
            job.finish(JobStatus::Failed);
        }
    }

    /// Aborts a running job. Finished jobs keep their status.
    pub async fn cancel(&self, id: Uuid) -> Option<JobSnapshot> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id)?;
        if !job.status.is_finished() {
            if let Some(handle) = job.abort.take() {
                handle.abort();
            }
            job.finish(JobStatus::Cancelled);
        }
        Some(job.snapshot(id))
    }

    pub async fn snapshot(&self, id: Uuid) -> Option<JobSnapshot> {
        self.jobs.read().await.get(&id).map(|job| job.snapshot(id))
    }

    /// The finished workbook and the download name.
    pub async fn output(&self, id: Uuid) -> Result<(Bytes, String), OutputUnavailable> {
        let jobs = self.jobs.read().await;
        let job = jobs.get(&id).ok_or(OutputUnavailable::NotFound)?;
        match (&job.output, job.status) {
            (Some(bytes), JobStatus::Completed) => Ok((bytes.clone(), job.filename.clone())),
            (_, status) => Err(OutputUnavailable::NotReady(status)),
        }
    }

    /// Drops jobs finished more than `ttl` ago and uploads older than `ttl`.
    /// Running jobs stay.
    pub async fn evict_expired(&self, ttl: Duration) -> usize {
        let cutoff = match chrono::Duration::from_std(ttl) {
            Ok(ttl) => Utc::now() - ttl,
            Err(_) => return 0,
        };

        let mut jobs = self.jobs.write().await;
        let jobs_before = jobs.len();
        // Job TTL counts from `finished_at`, not `created_at`.
        jobs.retain(|_, job| match job.finished_at {
            Some(finished_at) => finished_at > cutoff,
            None => true,
        });
        let mut evicted = jobs_before - jobs.len();
        drop(jobs);

        let mut uploads = self.uploads.write().await;
        let uploads_before = uploads.len();
        uploads.retain(|_, upload| upload.created_at > cutoff);
        evicted += uploads_before - uploads.len();

        evicted
    }
}
