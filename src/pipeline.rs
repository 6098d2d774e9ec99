//! Batch Ingestion Pipeline
//!
//! Rows are streamed from delimited text into a channel and buffered until
//! end-of-stream, then folded one by one into certificates. A row that fails
//! to merge is kept as an error-annotated certificate; it never aborts the batch.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use chrono::{SecondsFormat, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::convert::{convert_cell, has_converter};
use crate::image::ImageResolver;
use crate::merge::{CertificateMerger, DefaultValues};
use crate::templates::{Certificate, CertificateDraft, Submission, Template, TITLE_COLUMN};

/// Columns dropped from every row
pub const STRIPPED_COLUMNS: [&str; 3] = ["template", "uid", "_id"];

/// One tabular record: column name and cell text, in header order
pub type Row = Vec<(String, String)>;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Error during parsing CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Row reader stopped unexpectedly")]
    ReaderPanicked,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchReport {
    pub certificates: Vec<Certificate>,
    pub failed: usize,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.certificates.len() - self.failed
    }

    pub fn failures(&self) -> impl Iterator<Item = &Certificate> {
        self.certificates.iter().filter(|c| c.is_failed())
    }
}

/// Read every row of a CSV stream. The parser runs on its own thread and
/// feeds a channel; this returns once the stream has ended.
pub fn read_rows<R: io::Read + Send>(reader: R) -> Result<Vec<Row>, IngestError> {
    let (tx, rx) = mpsc::channel::<Row>();

    thread::scope(|scope| -> Result<Vec<Row>, IngestError> {
        let producer = scope.spawn(move || -> Result<(), csv::Error> {
            let mut csv = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
            let headers = csv.headers()?.clone();
            for record in csv.records() {
                let record = record?;
                let row: Row = headers
                    .iter()
                    .zip(record.iter())
                    .map(|(h, v)| (h.to_string(), v.to_string()))
                    .collect();
                if tx.send(row).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let rows: Vec<Row> = rx.iter().collect();
        producer.join().map_err(|_| IngestError::ReaderPanicked)??;
        Ok(rows)
    })
}

pub struct BatchIngestor<'a> {
    template: &'a Template,
    merger: CertificateMerger<'a>,
}

impl<'a> BatchIngestor<'a> {
    pub fn new(template: &'a Template, resolver: &'a ImageResolver) -> Self {
        Self {
            template,
            merger: CertificateMerger::new(resolver),
        }
    }

    pub fn with_defaults(mut self, defaults: DefaultValues) -> Self {
        self.merger = self.merger.with_defaults(defaults);
        self
    }

    pub fn ingest_reader<R: io::Read + Send>(&self, reader: R) -> Result<BatchReport, IngestError> {
        let rows = read_rows(reader)?;
        debug!("Read {} rows", rows.len());
        Ok(self.ingest_rows(rows))
    }

    pub fn ingest_file(&self, path: &Path) -> Result<BatchReport, IngestError> {
        self.ingest_reader(File::open(path)?)
    }

    pub fn ingest_rows(&self, rows: impl IntoIterator<Item = Row>) -> BatchReport {
        let report = rows
            .into_iter()
            .enumerate()
            .fold(BatchReport::default(), |mut report, (idx, row)| {
                let certificate = self.ingest_row(row);
                if let Some(error) = &certificate.error {
                    warn!("Row {}: {}", idx + 1, error);
                    report.failed += 1;
                }
                report.certificates.push(certificate);
                report
            });

        info!(
            "Ingested {} certificates ({} failed)",
            report.certificates.len(),
            report.failed
        );
        report
    }

    pub fn ingest_row(&self, row: Row) -> Certificate {
        let draft = self.candidate(row);
        let certificate = self
            .merger
            .merge(draft.clone(), self.template)
            .unwrap_or_else(|e| Certificate::failed(draft, e.to_string()));
        settle(certificate)
    }

    /// Build the candidate certificate for a row, coercing typed columns.
    pub fn candidate(&self, row: Row) -> CertificateDraft {
        let mut title = None;
        let mut values = Vec::with_capacity(row.len());

        for (column, cell) in row {
            if STRIPPED_COLUMNS.contains(&column.as_str()) {
                continue;
            }
            if column == TITLE_COLUMN {
                if !cell.is_empty() {
                    title = Some(cell);
                }
                continue;
            }
            if cell.is_empty() {
                continue;
            }
            if let Some(submission) = self.coerce(column, cell) {
                values.push(submission);
            }
        }

        CertificateDraft {
            uid: Uuid::new_v4().to_string(),
            template: self.template.name.clone(),
            title: title.unwrap_or_else(|| self.template.title.clone()),
            date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            values,
        }
    }

    fn coerce(&self, column: String, cell: String) -> Option<Submission> {
        match self.template.field(&column) {
            Some(field) if !field.placeholder && has_converter(field.field_type()) => {
                match convert_cell(field.field_type(), &cell) {
                    Some(value) => Some(Submission::new(column, value)),
                    None => {
                        debug!("Dropping unusable {} value for '{}'", field.field_type(), column);
                        None
                    }
                }
            }
            _ => Some(Submission::new(column, cell)),
        }
    }
}

/// Deep copy through the wire format; anything that does not survive is reported.
fn settle(certificate: Certificate) -> Certificate {
    match serde_json::to_value(&certificate).and_then(serde_json::from_value::<Certificate>) {
        Ok(copy) => copy,
        Err(e) => Certificate {
            values: vec![],
            error: Some(e.to_string()),
            ..certificate
        },
    }
}
