use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use uuid::Uuid;

use crate::domain::{EntityId, PropertyId, TaxonId, WriteOutcome};
use crate::error::SyncError;

/// Run metadata written as the first line of the log so independent runs can
/// be told apart in a shared stream.
#[derive(Debug, Clone)]
pub struct RunHeader {
    pub run_id: String,
    pub started_at: String,
    pub task: String,
}

impl RunHeader {
    pub fn new(task: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: chrono::Utc::now().to_rfc3339(),
            task: task.to_string(),
        }
    }
}

/// One terminal outcome, correlated with its record and target property.
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub taxon: TaxonId,
    pub property: PropertyId,
    pub entity: Option<EntityId>,
    pub outcome: WriteOutcome,
}

/// Append-only audit stream: one self-describing line per outcome.
pub struct AuditLog<W: Write> {
    writer: W,
}

impl AuditLog<BufWriter<std::fs::File>> {
    /// Opens (or creates) a log file in append mode.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| SyncError::Audit(err.to_string()))?;
        Ok(AuditLog::new(BufWriter::new(file)))
    }
}

impl<W: Write> AuditLog<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn header(&mut self, header: &RunHeader) -> Result<(), SyncError> {
        writeln!(
            self.writer,
            "run {} started={} task={}",
            header.run_id, header.started_at, header.task
        )
        .map_err(|err| SyncError::Audit(err.to_string()))
    }

    pub fn record(&mut self, entry: &AuditEntry) -> Result<(), SyncError> {
        writeln!(self.writer, "{}", format_entry(entry))
            .map_err(|err| SyncError::Audit(err.to_string()))
    }

    pub fn flush(&mut self) -> Result<(), SyncError> {
        self.writer
            .flush()
            .map_err(|err| SyncError::Audit(err.to_string()))
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn format_entry(entry: &AuditEntry) -> String {
    let severity = entry.outcome.severity();
    let entity = entry
        .entity
        .as_ref()
        .map(EntityId::as_str)
        .unwrap_or("-");
    let detail = match &entry.outcome {
        WriteOutcome::Written { .. } => "written".to_string(),
        WriteOutcome::Skipped { reason } => {
            format!("skipped reason={:?}", reason.to_string())
        }
        WriteOutcome::Warning { reason } => format!("warning reason={reason:?}"),
        WriteOutcome::Error { detail } => format!("error detail={detail:?}"),
    };
    format!(
        "{severity} record={} property={} entity={entity} {detail}",
        entry.taxon, entry.property
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_lines_are_greppable() {
        let mut log = AuditLog::new(Vec::new());
        log.header(&RunHeader {
            run_id: "b2c6".to_string(),
            started_at: "2026-08-23T00:00:00Z".to_string(),
            task: "assembly-sync".to_string(),
        })
        .unwrap();
        log.record(&AuditEntry {
            taxon: "9".parse().unwrap(),
            property: "P17".parse().unwrap(),
            entity: Some("E100".parse().unwrap()),
            outcome: WriteOutcome::Written {
                entity: "E100".parse().unwrap(),
            },
        })
        .unwrap();
        log.record(&AuditEntry {
            taxon: "10".parse().unwrap(),
            property: "P17".parse().unwrap(),
            entity: None,
            outcome: WriteOutcome::Skipped {
                reason: crate::domain::SkipReason::NotFound,
            },
        })
        .unwrap();

        let text = String::from_utf8(log.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("run b2c6 started=2026-08-23T00:00:00Z"));
        assert_eq!(lines[1], "INFO record=9 property=P17 entity=E100 written");
        assert_eq!(
            lines[2],
            "WARNING record=10 property=P17 entity=- skipped reason=\"not found\""
        );
    }
}
