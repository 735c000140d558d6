use std::collections::BTreeMap;

use axum::{
    extract::{Multipart, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::jobs::runner::output_filename;
use crate::jobs::Upload;
use crate::outreach::pipeline::GatePolicy;
use crate::outreach::resolver::{FieldMapping, MappingOverrides};
use crate::outreach::roles::SemanticRole;
use crate::state::AppState;
use crate::table::reader::{count_rows, detect_format, TableReader};
use crate::table::TableFormat;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Parts of an upload form: `file` (required), `mapping` (JSON object of
/// role → column or null) and `gate_policy` (`both` / `either`).
pub struct UploadForm {
    pub filename: String,
    pub bytes: Bytes,
    pub overrides: MappingOverrides,
    pub gate: Option<GatePolicy>,
}

impl UploadForm {
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut file: Option<(String, Bytes)> = None;
        let mut overrides = MappingOverrides::new();
        let mut gate = None;

        while let Some(field) = multipart.next_field().await? {
            let name = field.name().map(str::to_string);
            match name.as_deref() {
                Some("file") => {
                    let filename = field.file_name().unwrap_or("contacts.csv").to_string();
                    let bytes = field.bytes().await?;
                    file = Some((filename, bytes));
                }
                Some("mapping") => {
                    let raw = field.text().await?;
                    if !raw.trim().is_empty() {
                        overrides = serde_json::from_str(&raw).map_err(|e| {
                            AppError::Validation(format!("Invalid mapping JSON: {e}"))
                        })?;
                    }
                }
                Some("gate_policy") => {
                    let raw = field.text().await?;
                    gate = Some(raw.parse::<GatePolicy>().map_err(AppError::Validation)?);
                }
                _ => {}
            }
        }

        let (filename, bytes) =
            file.ok_or_else(|| AppError::Validation("Missing 'file' field".to_string()))?;

        Ok(Self {
            filename,
            bytes,
            overrides,
            gate,
        })
    }

    fn format(&self) -> TableFormat {
        detect_format(Some(&self.filename), &self.bytes)
    }
}

/// An `.xlsx` attachment response.
pub fn xlsx_attachment(bytes: impl Into<Bytes>, filename: &str) -> Response {
    let disposition = format!(
        "attachment; filename=\"{}\"",
        filename.replace(['"', '\\'], "")
    );
    let body: Bytes = bytes.into();
    (
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

/// POST /api/v1/outreach/generate
/// Runs the whole table in the request and returns the workbook.
pub async fn handle_generate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let form = UploadForm::read(multipart).await?;
    let format = form.format();
    info!(filename = %form.filename, ?format, "Synchronous generation requested");

    let mut reader = TableReader::open(form.bytes.clone(), format)?;
    let mapping = FieldMapping::with_overrides(reader.columns(), &form.overrides)?;
    let pipeline = match form.gate {
        Some(gate) => state.pipeline.with_gate(gate),
        None => state.pipeline.clone(),
    };

    let buffer = pipeline
        .render_workbook(&mut reader, &mapping, |_| {})
        .await?;

    Ok(xlsx_attachment(buffer, &output_filename(&form.filename)))
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub upload_id: Uuid,
    pub filename: String,
    pub format: TableFormat,
    pub columns: Vec<String>,
    pub total_rows: usize,
    pub mapping: BTreeMap<SemanticRole, String>,
}

/// POST /api/v1/uploads
/// Validates and stores the table, returning the inferred mapping for review.
pub async fn handle_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let form = UploadForm::read(multipart).await?;
    let format = form.format();

    let columns = TableReader::open(form.bytes.clone(), format)?
        .columns()
        .to_vec();
    let total_rows = count_rows(form.bytes.clone(), format)?;
    let mapping = FieldMapping::with_overrides(&columns, &form.overrides)?;
    let preview = mapping.preview(&columns);

    let upload_id = state
        .jobs
        .insert_upload(Upload {
            filename: form.filename.clone(),
            format,
            bytes: form.bytes,
            columns: columns.clone(),
            total_rows,
            mapping,
            gate: form.gate,
            created_at: Utc::now(),
        })
        .await;
    info!(%upload_id, total_rows, "Upload stored");

    Ok(Json(UploadResponse {
        upload_id,
        filename: form.filename,
        format,
        columns,
        total_rows,
        mapping: preview,
    }))
}

#[derive(Serialize)]
pub struct MappingResponse {
    pub upload_id: Uuid,
    pub mapping: BTreeMap<SemanticRole, String>,
}

/// PUT /api/v1/uploads/:id/mapping
/// Body: `{"first_name": "Given", "title": null}`. Roles left out keep
/// their inferred columns.
pub async fn handle_set_mapping(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(overrides): Json<MappingOverrides>,
) -> Result<Json<MappingResponse>, AppError> {
    let upload = state
        .jobs
        .upload(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Upload {id} not found")))?;

    let mapping = FieldMapping::with_overrides(&upload.columns, &overrides)?;
    let preview = mapping.preview(&upload.columns);

    if !state.jobs.set_mapping(id, mapping).await {
        return Err(AppError::NotFound(format!("Upload {id} not found")));
    }

    Ok(Json(MappingResponse {
        upload_id: id,
        mapping: preview,
    }))
}
