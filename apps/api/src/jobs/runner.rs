use std::sync::atomic::Ordering;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::jobs::{JobStore, Upload};
use crate::outreach::pipeline::RowPipeline;
use crate::table::reader::TableReader;
use crate::table::TableError;

/// Starts a background generation job for `upload` and returns its id.
/// Progress is published after every chunk; the result stays in the store
/// until downloaded or evicted.
pub async fn start_job(store: &JobStore, pipeline: RowPipeline, upload: Upload) -> Uuid {
    let download_name = output_filename(&upload.filename);
    let (job_id, progress) = store.create_job(upload.total_rows, download_name).await;

    let task_store = store.clone();
    let handle = tokio::spawn(async move {
        task_store.mark_processing(job_id).await;
        info!(%job_id, rows = upload.total_rows, "Job started");

        let result = render(&pipeline, &upload, |done| {
            progress.store(done, Ordering::Relaxed);
        })
        .await;

        match result {
            Ok(buffer) => {
                info!(%job_id, "Job completed");
                task_store.complete(job_id, Bytes::from(buffer)).await;
            }
            Err(e) => {
                error!(%job_id, "Job failed: {e}");
                task_store.fail(job_id, e.to_string()).await;
            }
        }
    });
    store.attach_abort(job_id, handle.abort_handle()).await;

    job_id
}

async fn render(
    pipeline: &RowPipeline,
    upload: &Upload,
    on_progress: impl FnMut(usize),
) -> Result<Vec<u8>, TableError> {
    let pipeline = match upload.gate {
        Some(gate) => pipeline.with_gate(gate),
        None => pipeline.clone(),
    };
    let mut reader = TableReader::open(upload.bytes.clone(), upload.format)?;
    pipeline
        .render_workbook(&mut reader, &upload.mapping, on_progress)
        .await
}

/// Periodically evicts finished jobs and stale uploads older than `ttl`.
pub fn spawn_sweeper(store: JobStore, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 4).clamp(Duration::from_secs(1), Duration::from_secs(300));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = store.evict_expired(ttl).await;
            if evicted > 0 {
                info!("Evicted {evicted} expired uploads and jobs");
            }
        }
    })
}

/// `leads.csv` → `leads_outreach.xlsx`.
pub fn output_filename(input: &str) -> String {
    let stem = std::path::Path::new(input)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.trim().is_empty())
        .unwrap_or("contacts");
    format!("{stem}_outreach.xlsx")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::jobs::{JobStatus, OutputUnavailable};
    use crate::llm_client::fake::FakeCompletion;
    use crate::llm_client::retry::RetryPolicy;
    use crate::outreach::pipeline::{GatePolicy, PipelineSettings};
    use crate::outreach::resolver::FieldMapping;
    use crate::table::TableFormat;

    fn upload(text: &str) -> Upload {
        let bytes = Bytes::from(text.to_string());
        let reader = TableReader::open(bytes.clone(), TableFormat::Csv).unwrap();
        let columns = reader.columns().to_vec();
        Upload {
            filename: "leads.csv".to_string(),
            format: TableFormat::Csv,
            bytes,
            mapping: FieldMapping::infer(&columns),
            columns,
            total_rows: text.lines().count() - 1,
            gate: None,
            created_at: Utc::now(),
        }
    }

    fn pipeline(fake: Arc<FakeCompletion>) -> RowPipeline {
        RowPipeline::new(
            fake,
            PipelineSettings {
                retry: RetryPolicy::single_attempt(),
                chunk_size: 2,
                ..PipelineSettings::default()
            },
        )
    }

    async fn wait_until_finished(store: &JobStore, id: Uuid) -> JobStatus {
        for _ in 0..200 {
            let status = store.snapshot(id).await.unwrap().status;
            if status.is_finished() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} did not finish");
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let store = JobStore::new();
        let fake = Arc::new(FakeCompletion::canned("Hi!"));
        let upload = upload("First Name,Company\nAnn,Acme\nBob,Initech\nCy,\n");

        let id = start_job(&store, pipeline(fake.clone()), upload).await;

        assert_eq!(wait_until_finished(&store, id).await, JobStatus::Completed);
        let snapshot = store.snapshot(id).await.unwrap();
        assert_eq!((snapshot.progress, snapshot.total), (3, 3));
        assert_eq!(fake.calls(), 2);

        let (bytes, name) = store.output(id).await.unwrap();
        assert_eq!(name, "leads_outreach.xlsx");
        let mut reader = TableReader::open(bytes, TableFormat::Workbook).unwrap();
        assert_eq!(reader.next_chunk(10).unwrap().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_upload_gate_overrides_pipeline_default() {
        let store = JobStore::new();
        let fake = Arc::new(FakeCompletion::canned("Hi!"));
        let mut upload = upload("First Name,Company\nAnn,\n");
        upload.gate = Some(GatePolicy::RequireEither);

        let id = start_job(&store, pipeline(fake.clone()), upload).await;

        assert_eq!(wait_until_finished(&store, id).await, JobStatus::Completed);
        assert_eq!(fake.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_a_running_job() {
        let store = JobStore::new();
        let fake = Arc::new(FakeCompletion::canned("Hi!").with_delay(Duration::from_secs(30)));
        let upload = upload("First Name,Company\nAnn,Acme\n");

        let id = start_job(&store, pipeline(fake), upload).await;
        let snapshot = store.cancel(id).await.unwrap();

        assert_eq!(snapshot.status, JobStatus::Cancelled);
        assert_eq!(
            store.output(id).await,
            Err(OutputUnavailable::NotReady(JobStatus::Cancelled))
        );
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(output_filename("leads.csv"), "leads_outreach.xlsx");
        assert_eq!(output_filename("Q3 list.xlsx"), "Q3 list_outreach.xlsx");
        assert_eq!(output_filename(""), "contacts_outreach.xlsx");
    }
}
