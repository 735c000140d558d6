//! Row Pipeline — turns a contact table into one outreach draft per row.
//!
//! Flow per row: resolve roles → gate → render prompt → completion call
//! (bounded by a timeout, retried on transient failures) → record.
//!
//! Rows are read in chunks of `chunk_size`; inside a chunk up to
//! `max_concurrency` completion calls run at once. Results are emitted in
//! input order regardless of completion order, so chunk size and concurrency
//! never change the output. Per-row failures are captured into the record;
//! only table parse and serialization errors abort a run.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::llm_client::retry::RetryPolicy;
use crate::llm_client::{CompletionClient, GenerationError};
use crate::outreach::prompts::{render_prompt, LengthLimit};
use crate::outreach::record::{GeneratedRecord, Outcome};
use crate::outreach::resolver::{FieldMapping, ResolvedRoles};
use crate::outreach::roles::SemanticRole;
use crate::table::reader::TableReader;
use crate::table::writer::SheetWriter;
use crate::table::{Row, TableError};

/// Which of first name / company a row needs before a completion is spent on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePolicy {
    #[default]
    #[serde(alias = "both")]
    RequireBoth,
    #[serde(alias = "either")]
    RequireEither,
}

impl GatePolicy {
    /// `Err` carries the missing required roles, for the skip marker.
    pub fn check(self, roles: &ResolvedRoles) -> Result<(), Vec<SemanticRole>> {
        let missing: Vec<SemanticRole> = [SemanticRole::FirstName, SemanticRole::Company]
            .into_iter()
            .filter(|role| !roles.has(*role))
            .collect();

        let passes = match self {
            GatePolicy::RequireBoth => missing.is_empty(),
            GatePolicy::RequireEither => missing.len() < 2,
        };
        if passes {
            Ok(())
        } else {
            Err(missing)
        }
    }
}

impl FromStr for GatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "both" | "require_both" => Ok(GatePolicy::RequireBoth),
            "either" | "require_either" => Ok(GatePolicy::RequireEither),
            other => Err(format!("unknown gate policy '{other}' (expected 'both' or 'either')")),
        }
    }
}

/// Everything the pipeline needs to know, fixed at construction.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub gate: GatePolicy,
    pub chunk_size: usize,
    pub max_concurrency: usize,
    pub row_timeout: Duration,
    pub retry: RetryPolicy,
    pub length: LengthLimit,
    pub temperature: f32,
    pub output_column: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            gate: GatePolicy::default(),
            chunk_size: 100,
            max_concurrency: 4,
            row_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            length: LengthLimit::default(),
            temperature: 0.7,
            output_column: "GeneratedEmail".to_string(),
        }
    }
}

/// Destination for finished records, fed one chunk at a time in input order.
pub trait RecordSink {
    fn accept(&mut self, records: Vec<GeneratedRecord>) -> Result<(), TableError>;
}

impl RecordSink for SheetWriter {
    fn accept(&mut self, records: Vec<GeneratedRecord>) -> Result<(), TableError> {
        for record in &records {
            self.write_row(&record.row, &record.outcome.cell_text())?;
        }
        Ok(())
    }
}

impl RecordSink for Vec<GeneratedRecord> {
    fn accept(&mut self, records: Vec<GeneratedRecord>) -> Result<(), TableError> {
        self.extend(records);
        Ok(())
    }
}

#[derive(Clone)]
pub struct RowPipeline {
    client: Arc<dyn CompletionClient>,
    settings: PipelineSettings,
}

impl RowPipeline {
    pub fn new(client: Arc<dyn CompletionClient>, settings: PipelineSettings) -> Self {
        Self { client, settings }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Same pipeline with a different gate, for per-request overrides.
    pub fn with_gate(&self, gate: GatePolicy) -> Self {
        let mut pipeline = self.clone();
        pipeline.settings.gate = gate;
        pipeline
    }

    pub async fn process_row(
        &self,
        mapping: &FieldMapping,
        index: usize,
        row: Row,
    ) -> GeneratedRecord {
        let roles = mapping.resolve(&row);

        if let Err(missing) = self.settings.gate.check(&roles) {
            debug!(row = index, ?missing, "Row skipped by gate");
            return GeneratedRecord {
                index,
                row,
                outcome: Outcome::Skipped { missing },
            };
        }

        let prompt = render_prompt(&roles, self.settings.length);
        let outcome = match self.complete(&prompt).await {
            Ok(text) => {
                debug!(row = index, chars = text.chars().count(), "Draft generated");
                Outcome::Generated(text)
            }
            Err(e) => {
                warn!(row = index, "Generation failed: {e}");
                Outcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        GeneratedRecord {
            index,
            row,
            outcome,
        }
    }

    /// Processes one window of rows; `start` is the index of the first row.
    pub async fn process_chunk(
        &self,
        mapping: &FieldMapping,
        start: usize,
        rows: Vec<Row>,
    ) -> Vec<GeneratedRecord> {
        stream::iter(rows.into_iter().enumerate())
            .map(|(offset, row)| self.process_row(mapping, start + offset, row))
            .buffered(self.settings.max_concurrency.max(1))
            .collect()
            .await
    }

    /// Drains `reader` chunk by chunk into `sink`. `on_progress` receives the
    /// number of rows finished so far after every chunk.
    pub async fn run<S: RecordSink>(
        &self,
        reader: &mut TableReader,
        mapping: &FieldMapping,
        sink: &mut S,
        mut on_progress: impl FnMut(usize),
    ) -> Result<usize, TableError> {
        let mut processed = 0;

        while let Some(rows) = reader.next_chunk(self.settings.chunk_size)? {
            let records = self.process_chunk(mapping, processed, rows).await;
            processed += records.len();
            sink.accept(records)?;
            on_progress(processed);
        }

        Ok(processed)
    }

    /// Runs the whole table and returns the finished `.xlsx` bytes.
    pub async fn render_workbook(
        &self,
        reader: &mut TableReader,
        mapping: &FieldMapping,
        on_progress: impl FnMut(usize),
    ) -> Result<Vec<u8>, TableError> {
        let mut writer = SheetWriter::new(reader.columns(), &self.settings.output_column)?;
        let processed = self.run(reader, mapping, &mut writer, on_progress).await?;
        info!(
            "Processed {} rows ({} written)",
            processed,
            writer.rows_written()
        );
        writer.finish()
    }

    /// One completion with timeout and retry. Returns trimmed, non-empty text.
    async fn complete(&self, prompt: &str) -> Result<String, GenerationError> {
        let settings = &self.settings;
        let client = &self.client;
        let max_tokens = settings.length.token_budget();

        let text = settings
            .retry
            .run(move || async move {
                match tokio::time::timeout(
                    settings.row_timeout,
                    client.generate(prompt, max_tokens, settings.temperature),
                )
                .await
                {
                    Ok(result) => result,
                    Err(_) => Err(GenerationError::Timeout(settings.row_timeout)),
                }
            })
            .await?;

        let text = text.trim();
        if text.is_empty() {
            return Err(GenerationError::MalformedResponse(
                "completion was empty".to_string(),
            ));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::llm_client::fake::FakeCompletion;
    use crate::table::{Cell, TableFormat};

    fn settings() -> PipelineSettings {
        PipelineSettings {
            retry: RetryPolicy::single_attempt(),
            ..PipelineSettings::default()
        }
    }

    fn pipeline(fake: &Arc<FakeCompletion>, settings: PipelineSettings) -> RowPipeline {
        RowPipeline::new(fake.clone(), settings)
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn csv(text: &str) -> TableReader {
        TableReader::open(Bytes::from(text.to_string()), TableFormat::Csv).unwrap()
    }

    #[tokio::test]
    async fn test_sarah_row_generates_and_keeps_fields() {
        let fake = Arc::new(FakeCompletion::echo());
        let names = cols(&["First Name", "Company", "Title"]);
        let row = Row::from_texts(&["Sarah", "Acme Corp", "CTO"]);

        let record = pipeline(&fake, settings())
            .process_row(&FieldMapping::infer(&names), 0, row.clone())
            .await;

        let prompt = &fake.prompts()[0];
        assert!(prompt.contains("Sarah"));
        assert!(prompt.contains("Acme Corp"));
        assert!(prompt.contains("CTO"));
        assert_eq!(record.row, row);
        match record.outcome {
            Outcome::Generated(text) => {
                assert!(text.starts_with("Draft for:"), "not trimmed: {text:?}");
                assert!(!text.ends_with('\n'));
            }
            other => panic!("expected generated outcome, got {other:?}"),
        }
        assert_eq!(fake.max_tokens(), vec![LengthLimit::default().token_budget()]);
    }

    #[tokio::test]
    async fn test_blank_first_name_is_skipped_without_a_call() {
        let fake = Arc::new(FakeCompletion::echo());
        let names = cols(&["first_name", "company_name"]);

        let record = pipeline(&fake, settings())
            .process_row(&FieldMapping::infer(&names), 0, Row::from_texts(&["", "Acme"]))
            .await;

        assert_eq!(
            record.outcome,
            Outcome::Skipped {
                missing: vec![SemanticRole::FirstName]
            }
        );
        assert_eq!(fake.calls(), 0);
    }

    #[tokio::test]
    async fn test_rows_missing_both_roles_never_call_under_any_gate() {
        let names = cols(&["Email", "First Name", "Company"]);
        let row = Row::from_texts(&["x@example.com", "nan", ""]);

        for gate in [GatePolicy::RequireBoth, GatePolicy::RequireEither] {
            let fake = Arc::new(FakeCompletion::echo());
            let record = pipeline(&fake, settings())
                .with_gate(gate)
                .process_row(&FieldMapping::infer(&names), 0, row.clone())
                .await;

            assert_eq!(
                record.outcome.cell_text(),
                "[SKIPPED] missing first name, company"
            );
            assert_eq!(fake.calls(), 0, "gate {gate:?} called the client");
        }
    }

    #[test]
    fn test_gate_policies() {
        let name_only = ResolvedRoles::from_pairs(&[(SemanticRole::FirstName, "Sam")]);
        let both = ResolvedRoles::from_pairs(&[
            (SemanticRole::FirstName, "Sam"),
            (SemanticRole::Company, "Acme"),
        ]);

        assert_eq!(
            GatePolicy::RequireBoth.check(&name_only),
            Err(vec![SemanticRole::Company])
        );
        assert_eq!(GatePolicy::RequireEither.check(&name_only), Ok(()));
        assert_eq!(GatePolicy::RequireBoth.check(&both), Ok(()));
    }

    #[test]
    fn test_gate_policy_parsing() {
        assert_eq!("both".parse::<GatePolicy>(), Ok(GatePolicy::RequireBoth));
        assert_eq!(" Either ".parse::<GatePolicy>(), Ok(GatePolicy::RequireEither));
        assert!("any".parse::<GatePolicy>().is_err());

        let gate: GatePolicy = serde_json::from_str("\"either\"").unwrap();
        assert_eq!(gate, GatePolicy::RequireEither);
    }

    #[tokio::test]
    async fn test_failed_row_does_not_stop_the_next() {
        let fake = Arc::new(FakeCompletion::new(|prompt| {
            if prompt.contains("Bob") {
                Err(GenerationError::Authentication("invalid x-api-key".to_string()))
            } else {
                Ok("Hello!".to_string())
            }
        }));
        let names = cols(&["Name", "Company"]);
        let rows = vec![
            Row::from_texts(&["Ann", "Acme"]),
            Row::from_texts(&["Bob", "Acme"]),
            Row::from_texts(&["Cy", "Acme"]),
        ];

        let records = pipeline(&fake, settings())
            .process_chunk(&FieldMapping::infer(&names), 0, rows)
            .await;

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].outcome, Outcome::Generated("Hello!".to_string()));
        assert_eq!(
            records[1].outcome.cell_text(),
            "[ERROR] authentication failed: invalid x-api-key"
        );
        assert_eq!(records[2].outcome, Outcome::Generated("Hello!".to_string()));
        assert_eq!(fake.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_call_times_out_as_row_failure() {
        let fake = Arc::new(FakeCompletion::canned("too late").with_delay(Duration::from_secs(600)));
        let settings = PipelineSettings {
            row_timeout: Duration::from_secs(5),
            ..settings()
        };
        let names = cols(&["First Name", "Company"]);

        let record = pipeline(&fake, settings)
            .process_row(&FieldMapping::infer(&names), 0, Row::from_texts(&["Sam", "Acme"]))
            .await;

        match record.outcome {
            Outcome::Failed { reason } => assert!(reason.contains("timed out"), "{reason}"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried_within_the_row() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let fake = Arc::new(FakeCompletion::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(GenerationError::RateLimited("slow down".to_string()))
            } else {
                Ok("Second time lucky".to_string())
            }
        }));
        let settings = PipelineSettings {
            retry: RetryPolicy::default(),
            ..PipelineSettings::default()
        };
        let names = cols(&["First Name", "Company"]);

        let record = pipeline(&fake, settings)
            .process_row(&FieldMapping::infer(&names), 0, Row::from_texts(&["Sam", "Acme"]))
            .await;

        assert_eq!(record.outcome, Outcome::Generated("Second time lucky".to_string()));
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_blank_completion_is_malformed() {
        let fake = Arc::new(FakeCompletion::canned("   \n"));
        let names = cols(&["First Name", "Company"]);

        let record = pipeline(&fake, settings())
            .process_row(&FieldMapping::infer(&names), 0, Row::from_texts(&["Sam", "Acme"]))
            .await;

        assert_eq!(
            record.outcome.cell_text(),
            "[ERROR] malformed response: completion was empty"
        );
    }

    #[tokio::test]
    async fn test_output_is_independent_of_chunk_size_and_concurrency() {
        let mut text = String::from("first_name,company,title\n");
        for i in 0..10 {
            // Every third row lacks a company and is skipped.
            let company = if i % 3 == 0 { String::new() } else { format!("Co{i}") };
            text.push_str(&format!("P{i},{company},T{i}\n"));
        }

        let mut outputs = Vec::new();
        for (chunk_size, max_concurrency) in [(10, 1), (3, 1), (3, 4), (1, 8)] {
            let fake = Arc::new(FakeCompletion::echo());
            let settings = PipelineSettings {
                chunk_size,
                max_concurrency,
                ..settings()
            };
            let mut reader = csv(&text);
            let mapping = FieldMapping::infer(reader.columns());
            let mut records: Vec<GeneratedRecord> = Vec::new();
            let mut progress = Vec::new();

            let processed = pipeline(&fake, settings)
                .run(&mut reader, &mapping, &mut records, |n| progress.push(n))
                .await
                .unwrap();

            assert_eq!(processed, 10);
            assert_eq!(progress.last(), Some(&10));
            assert_eq!(fake.calls(), 6);
            outputs.push(records);
        }

        let baseline = &outputs[0];
        assert_eq!(baseline.len(), 10);
        for (i, record) in baseline.iter().enumerate() {
            assert_eq!(record.index, i);
            assert_eq!(record.row.cells[0], Cell::Text(format!("P{i}")));
        }
        for other in &outputs[1..] {
            assert_eq!(other, baseline);
        }
    }

    #[tokio::test]
    async fn test_blank_workbook_row_gets_a_skip_record() {
        let mut input = rust_xlsxwriter::Workbook::new();
        let sheet = input.add_worksheet();
        let cells = [
            (0, ["First Name", "Company"]),
            (1, ["Ann", "Acme"]),
            (3, ["Bob", "Initech"]),
        ];
        for (row, values) in cells {
            for (col, value) in values.into_iter().enumerate() {
                sheet.write_string(row, col as u16, value).unwrap();
            }
        }
        let bytes = Bytes::from(input.save_to_buffer().unwrap());
        let fake = Arc::new(FakeCompletion::canned("Hello!"));
        let mut reader = TableReader::open(bytes, TableFormat::Workbook).unwrap();
        let mapping = FieldMapping::infer(reader.columns());

        let buffer = pipeline(&fake, settings())
            .render_workbook(&mut reader, &mapping, |_| {})
            .await
            .unwrap();

        let mut output = TableReader::open(Bytes::from(buffer), TableFormat::Workbook).unwrap();
        let rows = output.next_chunk(10).unwrap().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(
            rows[1].value(2).as_deref(),
            Some("[SKIPPED] missing first name, company")
        );
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn test_render_workbook_appends_one_column_per_row() {
        let fake = Arc::new(FakeCompletion::canned("Bonjour Zoë ✨"));
        let mut reader = csv("First Name,Company\nZoë,Acme\nnan,Initech\n");
        let mapping = FieldMapping::infer(reader.columns());

        let buffer = pipeline(&fake, settings())
            .render_workbook(&mut reader, &mapping, |_| {})
            .await
            .unwrap();

        let mut output = TableReader::open(Bytes::from(buffer), TableFormat::Workbook).unwrap();
        assert_eq!(output.columns(), &["First Name", "Company", "GeneratedEmail"]);
        let rows = output.next_chunk(10).unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value(2).as_deref(), Some("Bonjour Zoë ✨"));
        assert_eq!(
            rows[1].value(2).as_deref(),
            Some("[SKIPPED] missing first name")
        );
    }
}
