use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::audit::{AuditEntry, AuditLog, RunHeader};
use crate::config::ResolvedConfig;
use crate::domain::{Fact, SkipReason, SourceRecord, WriteOutcome};
use crate::error::SyncError;
use crate::executor::WriteExecutor;
use crate::kb::KbClient;
use crate::reconcile::{ExistingState, ReconciliationEngine};
use crate::resolver::{IdentityResolver, Resolution};

pub const TASK_NAME: &str = "assembly-accession-sync";

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Compute plans but issue no writes.
    pub dry_run: bool,
    /// Diff against a snapshot of existing remote claims before writing.
    pub fast_run: bool,
    /// With fast-run, also replace provenance older than the staleness window.
    pub check_references: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub records: usize,
    pub written: usize,
    pub skipped: usize,
    pub warnings: usize,
    pub errors: usize,
    pub cancelled: bool,
}

/// Cooperative cancellation, checked between records.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct SyncApp<'a, K: KbClient> {
    kb: &'a K,
    config: &'a ResolvedConfig,
}

impl<'a, K: KbClient> SyncApp<'a, K> {
    pub fn new(kb: &'a K, config: &'a ResolvedConfig) -> Self {
        Self { kb, config }
    }

    /// Processes `records` in input order: resolve, reconcile, write, audit.
    /// Per-record failures become outcomes; only authentication and index
    /// construction abort the run before the first record.
    pub fn run<W: Write>(
        &self,
        records: &[SourceRecord],
        options: RunOptions,
        audit: &mut AuditLog<W>,
        cancel: &CancelFlag,
    ) -> Result<RunSummary, SyncError> {
        self.run_on(records, options, audit, cancel, today())
    }

    /// Same as `run` with an explicit evaluation date for the staleness rule.
    pub fn run_on<W: Write>(
        &self,
        records: &[SourceRecord],
        options: RunOptions,
        audit: &mut AuditLog<W>,
        cancel: &CancelFlag,
        today: NaiveDate,
    ) -> Result<RunSummary, SyncError> {
        let header = RunHeader::new(TASK_NAME);
        audit.header(&header)?;

        if !options.dry_run {
            let user = self.kb.whoami().map_err(|err| match err {
                SyncError::Auth(_) => err,
                other => SyncError::Auth(other.to_string()),
            })?;
            info!(user = %user, "authenticated against knowledge base");
        }

        let mut resolver = IdentityResolver::new(
            self.kb,
            self.config.taxon_property.clone(),
            self.config.strategy,
            self.config.is_unique(&self.config.taxon_property),
        );
        resolver.prepare(records.len())?;

        let engine = ReconciliationEngine::new(
            self.config.reference.retrieved_property.clone(),
            self.config.staleness_days,
            options.check_references,
        );
        let executor = WriteExecutor::new(
            self.kb,
            self.config.max_retries,
            options.dry_run,
            self.config.is_unique(&self.config.target_property),
        );

        let mut summary = RunSummary {
            run_id: header.run_id.clone(),
            records: records.len(),
            written: 0,
            skipped: 0,
            warnings: 0,
            errors: 0,
            cancelled: false,
        };

        // Fast-run snapshot, built on first need and reused for the rest of
        // the run. Not re-validated after our own writes.
        let mut existing: Option<ExistingState> = None;
        let mut fast_run = options.fast_run;

        for record in records {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                warn!("run cancelled, flushing audit log");
                break;
            }

            let mut entity = None;
            let outcome = match resolver.resolve(&record.taxon) {
                Ok(Resolution::Resolved(id)) => {
                    entity = Some(id.clone());
                    if fast_run && existing.is_none() {
                        match self.kb.fetch_claims(&self.config.target_property) {
                            Ok(claims) => {
                                let state = ExistingState::new(claims);
                                info!(entities = state.entities(), "existing state snapshot built");
                                existing = Some(state);
                            }
                            Err(err) => {
                                warn!(error = %err, "snapshot unavailable, falling back to plain writes");
                                fast_run = false;
                            }
                        }
                    }

                    let fact = Fact {
                        property: self.config.target_property.clone(),
                        value: record.accession.as_str().to_string(),
                        references: vec![
                            self.config
                                .reference
                                .group_for(record.accession.as_str(), today),
                        ],
                    };
                    let plan = engine.plan(&id, &fact, existing.as_ref(), today);
                    executor.execute(&id, &fact, &plan)
                }
                Ok(Resolution::NotFound) => WriteOutcome::Skipped {
                    reason: SkipReason::NotFound,
                },
                Ok(Resolution::Ambiguous(count)) => WriteOutcome::Error {
                    detail: format!("{count} candidate entities, manual review required"),
                },
                Err(err) => WriteOutcome::Error {
                    detail: err.to_string(),
                },
            };

            match &outcome {
                WriteOutcome::Written { .. } => summary.written += 1,
                WriteOutcome::Skipped {
                    reason: SkipReason::NotFound,
                } => summary.warnings += 1,
                WriteOutcome::Skipped { .. } => summary.skipped += 1,
                WriteOutcome::Warning { .. } => summary.warnings += 1,
                WriteOutcome::Error { .. } => summary.errors += 1,
            }

            audit.record(&AuditEntry {
                taxon: record.taxon.clone(),
                property: self.config.target_property.clone(),
                entity,
                outcome,
            })?;
        }

        audit.flush()?;
        info!(
            written = summary.written,
            skipped = summary.skipped,
            warnings = summary.warnings,
            errors = summary.errors,
            "run finished"
        );
        Ok(summary)
    }
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}
