use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::Serialize;
use tracing::debug;

use crate::config::ColumnNames;
use crate::domain::SourceRecord;
use crate::error::SyncError;

/// One raw line of the genome report, projected onto the columns we use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRow {
    pub status: String,
    pub taxon: String,
    pub accession: String,
}

/// Reads a tab-separated genome report. The first line must be a header
/// containing the configured column names.
pub fn read_report(path: &Path, columns: &ColumnNames) -> Result<Vec<RawRow>, SyncError> {
    let content =
        fs::read_to_string(path).map_err(|_| SyncError::ReportRead(path.to_path_buf()))?;
    parse_report(&content, columns)
}

pub fn parse_report(content: &str, columns: &ColumnNames) -> Result<Vec<RawRow>, SyncError> {
    let mut lines = content.lines().enumerate();
    let (_, header) = lines.next().ok_or_else(|| SyncError::ReportRow {
        line: 1,
        message: "empty report".to_string(),
    })?;

    // Genome reports prefix the header with a comment marker.
    let header = header.trim_start_matches('#');
    let names: Vec<&str> = header.split('\t').map(str::trim).collect();
    let status_idx = column_index(&names, &columns.status)?;
    let taxon_idx = column_index(&names, &columns.taxon)?;
    let accession_idx = column_index(&names, &columns.accession)?;
    let width = status_idx.max(taxon_idx).max(accession_idx) + 1;

    let mut rows = Vec::new();
    for (index, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < width {
            return Err(SyncError::ReportRow {
                line: index + 1,
                message: format!("expected at least {width} columns, got {}", fields.len()),
            });
        }
        rows.push(RawRow {
            status: fields[status_idx].trim().to_string(),
            taxon: fields[taxon_idx].trim().to_string(),
            accession: fields[accession_idx].trim().to_string(),
        });
    }
    Ok(rows)
}

fn column_index(names: &[&str], wanted: &str) -> Result<usize, SyncError> {
    names
        .iter()
        .position(|name| *name == wanted)
        .ok_or_else(|| SyncError::ReportRow {
            line: 1,
            message: format!("missing column {wanted:?} in header"),
        })
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LoadStats {
    pub total_rows: usize,
    pub status_rejected: usize,
    pub ambiguous_keys: usize,
    pub invalid_values: usize,
    pub loaded: usize,
}

pub struct SourceRecordLoader;

impl SourceRecordLoader {
    /// Filters rows to the accepted status, groups by taxonomy id, and keeps
    /// only ids that map to exactly one accession. Ambiguous ids are dropped,
    /// not merged. Pure; first-seen input order is preserved.
    pub fn load(rows: &[RawRow], status_filter: &str) -> (Vec<SourceRecord>, LoadStats) {
        let mut stats = LoadStats {
            total_rows: rows.len(),
            ..LoadStats::default()
        };

        let mut order: Vec<&str> = Vec::new();
        let mut values: HashMap<&str, HashSet<&str>> = HashMap::new();
        for row in rows {
            if row.status != status_filter {
                stats.status_rejected += 1;
                continue;
            }
            let set = values.entry(row.taxon.as_str()).or_insert_with(|| {
                order.push(row.taxon.as_str());
                HashSet::new()
            });
            set.insert(row.accession.as_str());
        }

        let mut records = Vec::new();
        for taxon in order {
            let set = &values[taxon];
            if set.len() != 1 {
                debug!(taxon, candidates = set.len(), "dropping ambiguous taxon");
                stats.ambiguous_keys += 1;
                continue;
            }
            let accession: &str = set.iter().next().copied().unwrap_or("");
            match (taxon.parse(), accession.parse()) {
                (Ok(taxon), Ok(accession)) => records.push(SourceRecord { taxon, accession }),
                _ => {
                    debug!(taxon, accession, "dropping row with invalid identifiers");
                    stats.invalid_values += 1;
                }
            }
        }
        stats.loaded = records.len();
        (records, stats)
    }
}
