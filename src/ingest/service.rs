use std::io::Read;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{FeatureNormalizer, ValidationError};
use crate::config::IngestConfig;
use crate::playbooks::dispatcher::{DispatchReport, PlaybookDispatcher};
use crate::scoring::{ScoringEngine, ScoringOutcomeView};
use crate::store::{CustomerState, PersistenceError, RecordStore};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("could not read upload: {0}")]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Result of one ingestion event: the persisted scoring view plus what the
/// playbook pass did with it.
#[derive(Debug, Serialize)]
pub struct IngestOutcome {
    pub customer_id: String,
    #[serde(flatten)]
    pub view: ScoringOutcomeView,
    pub dispatch: DispatchReport,
}

/// Per-row accounting for a bulk upload, with a capped sample of row errors.
#[derive(Debug, Default, Serialize)]
pub struct BulkIngestReport {
    pub total_rows: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub actions_queued: usize,
    pub error_sample: Vec<String>,
}

/// Single pipeline shared by live tracking, bulk upload, and reprocessing:
/// normalize, score, persist, then run the playbook dispatch pass.
pub struct IngestService {
    engine: ScoringEngine,
    records: Arc<dyn RecordStore>,
    dispatcher: Arc<PlaybookDispatcher>,
    config: IngestConfig,
}

impl IngestService {
    pub fn new(
        engine: ScoringEngine,
        records: Arc<dyn RecordStore>,
        dispatcher: Arc<PlaybookDispatcher>,
        config: IngestConfig,
    ) -> Self {
        Self {
            engine,
            records,
            dispatcher,
            config,
        }
    }

    /// Process one customer event end to end. A `ValidationError` rejects
    /// only this event; persistence failures surface to the caller, who owns
    /// the retry decision.
    pub fn ingest_event(&self, raw: &Map<String, Value>) -> Result<IngestOutcome, IngestError> {
        let features = FeatureNormalizer::normalize(raw)?;
        let scored = self.engine.score(&features);
        let now = Utc::now();

        self.records.upsert(CustomerState {
            features: features.clone(),
            scored: scored.clone(),
            tags: Vec::new(),
            updated_at: now,
        })?;

        let dispatch = self.dispatcher.dispatch(&scored, &features, now)?;
        info!(
            customer_id = %features.customer_id,
            churn_score = scored.churn_score,
            risk_level = scored.risk_tier.label(),
            matched = dispatch.playbooks_matched,
            "customer scored"
        );

        Ok(IngestOutcome {
            customer_id: features.customer_id.clone(),
            view: scored.view(),
            dispatch,
        })
    }

    /// Bulk-ingest a delimited upload. Rows run in fixed-size concurrent
    /// groups with a pause between groups, a crude brake for the mail
    /// collaborator's rate limits. There is no cancellation: the job runs to
    /// completion and already-persisted rows stand as partial progress.
    pub async fn ingest_bulk<R: Read>(
        self: Arc<Self>,
        reader: R,
    ) -> Result<BulkIngestReport, IngestError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = csv_reader.headers()?.clone();
        let mut rows: Vec<Result<Map<String, Value>, String>> = Vec::new();
        for record in csv_reader.records() {
            match record {
                Ok(row) => {
                    let mut raw = Map::new();
                    for (header, cell) in headers.iter().zip(row.iter()) {
                        raw.insert(header.to_string(), Value::String(cell.to_string()));
                    }
                    rows.push(Ok(raw));
                }
                Err(err) => rows.push(Err(err.to_string())),
            }
        }

        let mut report = BulkIngestReport {
            total_rows: rows.len(),
            ..BulkIngestReport::default()
        };

        let batch_size = self.config.batch_size.max(1);
        let chunk_count = rows.len().div_ceil(batch_size);
        for (chunk_index, chunk) in rows.chunks(batch_size).enumerate() {
            let mut group: JoinSet<(usize, Result<IngestOutcome, IngestError>)> = JoinSet::new();
            let mut spawned = Vec::new();
            for (offset, row) in chunk.iter().enumerate() {
                let row_number = chunk_index * batch_size + offset + 1;
                match row {
                    Ok(raw) => {
                        let service = Arc::clone(&self);
                        let raw = raw.clone();
                        spawned.push(row_number);
                        group.spawn(async move { (row_number, service.ingest_event(&raw)) });
                    }
                    Err(message) => {
                        self.note_failure(&mut report, row_number, message);
                    }
                }
            }

            let mut outcomes = Vec::new();
            while let Some(joined) = group.join_next().await {
                match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => warn!(error = %err, "bulk ingestion task panicked"),
                }
            }
            // Deterministic accounting regardless of completion order; rows
            // whose task died still count against the upload.
            outcomes.sort_by_key(|(row_number, _)| *row_number);
            if outcomes.len() < spawned.len() {
                let completed: std::collections::HashSet<usize> =
                    outcomes.iter().map(|(row_number, _)| *row_number).collect();
                for row_number in spawned {
                    if !completed.contains(&row_number) {
                        self.note_failure(&mut report, row_number, "row processing task failed");
                    }
                }
            }
            for (row_number, outcome) in outcomes {
                match outcome {
                    Ok(outcome) => {
                        report.succeeded += 1;
                        report.actions_queued += outcome.dispatch.queued();
                    }
                    Err(err) => self.note_failure(&mut report, row_number, &err.to_string()),
                }
            }

            if chunk_index + 1 < chunk_count {
                tokio::time::sleep(self.config.batch_pause()).await;
            }
        }

        info!(
            total = report.total_rows,
            succeeded = report.succeeded,
            failed = report.failed,
            "bulk ingestion finished"
        );
        Ok(report)
    }

    fn note_failure(&self, report: &mut BulkIngestReport, row_number: usize, message: &str) {
        report.failed += 1;
        if report.error_sample.len() < self.config.error_sample_limit {
            report.error_sample.push(format!("row {row_number}: {message}"));
        }
    }
}
