use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use taxref_sync::app::{CancelFlag, RunOptions, SyncApp};
use taxref_sync::audit::AuditLog;
use taxref_sync::config::{Config, ConfigLoader, ReferenceTemplateEntry, ResolvedConfig};
use taxref_sync::domain::{EntityId, Fact, PropertyId, SourceRecord};
use taxref_sync::error::SyncError;
use taxref_sync::kb::{ExistingClaim, KbClient};
use taxref_sync::resolver::ResolutionStrategy;

#[derive(Debug, Clone, Copy, PartialEq)]
enum WriteFailure {
    None,
    Conflict,
    /// Fail the first N attempts with a retryable status, then succeed.
    Transient(usize),
}

struct MockKb {
    index: HashMap<String, Vec<EntityId>>,
    claims: Mutex<HashMap<EntityId, Vec<ExistingClaim>>>,
    write_calls: Mutex<usize>,
    failure: WriteFailure,
    reject_auth: bool,
}

impl MockKb {
    fn new(index: &[(&str, &[&str])]) -> Self {
        let index = index
            .iter()
            .map(|(taxon, entities)| {
                let ids = entities.iter().map(|id| id.parse().unwrap()).collect();
                (taxon.to_string(), ids)
            })
            .collect();
        Self {
            index,
            claims: Mutex::new(HashMap::new()),
            write_calls: Mutex::new(0),
            failure: WriteFailure::None,
            reject_auth: false,
        }
    }

    fn write_calls(&self) -> usize {
        *self.write_calls.lock().unwrap()
    }

    fn claims_for(&self, entity: &str) -> Vec<ExistingClaim> {
        self.claims
            .lock()
            .unwrap()
            .get(&entity.parse::<EntityId>().unwrap())
            .cloned()
            .unwrap_or_default()
    }
}

impl KbClient for MockKb {
    fn query_by_value(
        &self,
        _property: &PropertyId,
        value: &str,
    ) -> Result<Vec<EntityId>, SyncError> {
        Ok(self.index.get(value).cloned().unwrap_or_default())
    }

    fn fetch_value_index(
        &self,
        _property: &PropertyId,
    ) -> Result<HashMap<String, Vec<EntityId>>, SyncError> {
        Ok(self.index.clone())
    }

    fn fetch_claims(
        &self,
        _property: &PropertyId,
    ) -> Result<HashMap<EntityId, Vec<ExistingClaim>>, SyncError> {
        Ok(self.claims.lock().unwrap().clone())
    }

    fn write_claim(
        &self,
        entity: &EntityId,
        fact: &Fact,
        replace_references: bool,
    ) -> Result<(), SyncError> {
        let mut calls = self.write_calls.lock().unwrap();
        *calls += 1;
        match self.failure {
            WriteFailure::Conflict => {
                return Err(SyncError::WriteConflict {
                    entity: entity.as_str().to_string(),
                    property: fact.property.as_str().to_string(),
                    message: "unique constraint".to_string(),
                });
            }
            WriteFailure::Transient(n) if *calls <= n => {
                return Err(SyncError::KbStatus {
                    status: 503,
                    message: "maintenance".to_string(),
                });
            }
            _ => {}
        }

        let mut claims = self.claims.lock().unwrap();
        let entries = claims.entry(entity.clone()).or_default();
        match entries.iter_mut().find(|claim| claim.value == fact.value) {
            Some(existing) => {
                // The store is idempotent for identical values; references
                // are replaced only when asked.
                if replace_references {
                    existing.references = fact.references.clone();
                }
            }
            None => entries.push(ExistingClaim {
                value: fact.value.clone(),
                references: fact.references.clone(),
            }),
        }
        Ok(())
    }

    fn whoami(&self) -> Result<String, SyncError> {
        if self.reject_auth {
            return Err(SyncError::Auth("bad token".to_string()));
        }
        Ok("sync-bot".to_string())
    }
}

fn config() -> ResolvedConfig {
    ConfigLoader::resolve_config(Config {
        schema_version: None,
        kb_base_url: "https://kb.example.org/api".to_string(),
        target_property: "P17".to_string(),
        taxon_property: "P9".to_string(),
        input: None,
        status_filter: None,
        columns: None,
        staleness_days: None,
        max_retries: Some(0),
        strategy: Some(ResolutionStrategy::PerRecord),
        reference: ReferenceTemplateEntry {
            stated_in: "E42".to_string(),
            url_template: "https://reports.example.org/{accession}".to_string(),
            stated_in_property: None,
            retrieved_property: None,
            url_property: None,
        },
        unique_properties: vec!["P17".to_string()],
    })
    .unwrap()
}

fn record(taxon: &str, accession: &str) -> SourceRecord {
    SourceRecord {
        taxon: taxon.parse().unwrap(),
        accession: accession.parse().unwrap(),
    }
}

fn today() -> NaiveDate {
    NaiveDate::parse_from_str("2026-08-23", "%Y-%m-%d").unwrap()
}

fn run(
    kb: &MockKb,
    config: &ResolvedConfig,
    records: &[SourceRecord],
    options: RunOptions,
) -> (taxref_sync::app::RunSummary, String) {
    let app = SyncApp::new(kb, config);
    let mut audit = AuditLog::new(Vec::new());
    let summary = app
        .run_on(records, options, &mut audit, &CancelFlag::new(), today())
        .unwrap();
    let log = String::from_utf8(audit.into_inner()).unwrap();
    (summary, log)
}

#[test]
fn resolved_record_is_written() {
    let kb = MockKb::new(&[("9", &["E100"])]);
    let records = vec![record("9", "GCA_900128725.1")];

    let (summary, log) = run(&kb, &config(), &records, RunOptions::default());

    assert_eq!(summary.written, 1);
    assert_eq!(summary.errors, 0);
    assert!(log.contains("record=9 property=P17 entity=E100 written"));

    let claims = kb.claims_for("E100");
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].value, "GCA_900128725.1");
    // Provenance carries the templated reference URL and retrieval date.
    let parts = &claims[0].references[0].parts;
    assert!(parts.iter().any(|(_, v)| v == "E42"));
    assert!(parts.iter().any(|(_, v)| v == "2026-08-23"));
    assert!(
        parts
            .iter()
            .any(|(_, v)| v == "https://reports.example.org/GCA_900128725.1")
    );
}

#[test]
fn unresolved_record_skips_without_remote_write() {
    let kb = MockKb::new(&[]);
    let records = vec![record("9", "GCA_900128725.1")];

    let (summary, log) = run(&kb, &config(), &records, RunOptions::default());

    assert_eq!(summary.written, 0);
    assert_eq!(summary.warnings, 1);
    assert_eq!(kb.write_calls(), 0);
    assert!(log.contains("skipped reason=\"not found\""));
}

#[test]
fn ambiguous_record_is_an_error_and_continues() {
    let kb = MockKb::new(&[("9", &["E100", "E101"]), ("562", &["E7"])]);
    let records = vec![record("9", "GCA_900128725.1"), record("562", "GCA_000005845.2")];

    let (summary, log) = run(&kb, &config(), &records, RunOptions::default());

    assert_eq!(summary.errors, 1);
    assert_eq!(summary.written, 1);
    assert!(log.contains("manual review required"));
}

#[test]
fn rerun_converges_to_skipped() {
    let kb = MockKb::new(&[("9", &["E100"]), ("562", &["E7"])]);
    let records = vec![record("9", "GCA_900128725.1"), record("562", "GCA_000005845.2")];
    let options = RunOptions {
        dry_run: false,
        fast_run: true,
        check_references: true,
    };

    let (first, _) = run(&kb, &config(), &records, options);
    assert_eq!(first.written, 2);
    let calls_after_first = kb.write_calls();
    let claims_after_first = kb.claims_for("E100");

    let (second, log) = run(&kb, &config(), &records, options);
    assert_eq!(second.written, 0);
    assert_eq!(second.skipped, 2);
    assert_eq!(kb.write_calls(), calls_after_first);
    assert_eq!(kb.claims_for("E100"), claims_after_first);
    assert!(log.contains("skipped reason=\"up to date\""));
}

#[test]
fn stale_reference_is_replaced_not_appended() {
    let kb = MockKb::new(&[("9", &["E100"])]);
    // Seed an existing claim whose provenance is a year old.
    let fact = Fact {
        property: "P17".parse().unwrap(),
        value: "GCA_900128725.1".to_string(),
        references: vec![taxref_sync::domain::ReferenceGroup {
            parts: vec![("P813".parse().unwrap(), "2025-08-23".to_string())],
        }],
    };
    kb.write_claim(&"E100".parse().unwrap(), &fact, false).unwrap();

    let records = vec![record("9", "GCA_900128725.1")];
    let options = RunOptions {
        dry_run: false,
        fast_run: true,
        check_references: true,
    };
    let (summary, _) = run(&kb, &config(), &records, options);

    assert_eq!(summary.written, 1);
    let claims = kb.claims_for("E100");
    assert_eq!(claims.len(), 1);
    assert_eq!(claims[0].references.len(), 1);
    assert!(
        claims[0].references[0]
            .parts
            .iter()
            .any(|(_, v)| v == "2026-08-23")
    );
}

#[test]
fn dry_run_makes_no_writes() {
    let kb = MockKb::new(&[("9", &["E100"])]);
    let records = vec![record("9", "GCA_900128725.1")];
    let options = RunOptions {
        dry_run: true,
        fast_run: false,
        check_references: false,
    };

    let (summary, log) = run(&kb, &config(), &records, options);

    assert_eq!(summary.written, 0);
    assert_eq!(summary.skipped, 1);
    assert_eq!(kb.write_calls(), 0);
    assert!(log.contains("skipped reason=\"dry run\""));
}

#[test]
fn conflict_is_never_retried() {
    let mut kb = MockKb::new(&[("9", &["E100"])]);
    kb.failure = WriteFailure::Conflict;
    let mut config = config();
    config.max_retries = 3;
    let records = vec![record("9", "GCA_900128725.1")];

    let (summary, log) = run(&kb, &config, &records, RunOptions::default());

    assert_eq!(summary.errors, 1);
    assert_eq!(kb.write_calls(), 1);
    assert!(log.contains("write conflict"));
    // P17 is declared unique, so the store is enforcing the expected
    // constraint and the record goes to a human.
    assert!(log.contains("manual review required"));
}

#[test]
fn conflict_on_undeclared_property_flags_config_mismatch() {
    let mut kb = MockKb::new(&[("9", &["E100"])]);
    kb.failure = WriteFailure::Conflict;
    let mut config = config();
    config.unique_properties.clear();
    let records = vec![record("9", "GCA_900128725.1")];

    let (summary, log) = run(&kb, &config, &records, RunOptions::default());

    assert_eq!(summary.errors, 1);
    assert_eq!(kb.write_calls(), 1);
    assert!(log.contains("not declared unique in config"));
    assert!(!log.contains("manual review required"));
}

#[test]
fn exhausted_retries_escalate_to_error() {
    let mut kb = MockKb::new(&[("9", &["E100"])]);
    kb.failure = WriteFailure::Transient(5);
    let mut config = config();
    config.max_retries = 1;
    let records = vec![record("9", "GCA_900128725.1")];

    let (summary, log) = run(&kb, &config, &records, RunOptions::default());

    assert_eq!(summary.written, 0);
    assert_eq!(summary.errors, 1);
    // One initial attempt plus one retry, then the failure is surfaced.
    assert_eq!(kb.write_calls(), 2);
    assert!(log.contains("503"));
}

#[test]
fn transient_failure_is_retried_until_success() {
    let mut kb = MockKb::new(&[("9", &["E100"])]);
    kb.failure = WriteFailure::Transient(1);
    let mut config = config();
    config.max_retries = 2;
    let records = vec![record("9", "GCA_900128725.1")];

    let (summary, _) = run(&kb, &config, &records, RunOptions::default());

    assert_eq!(summary.written, 1);
    assert_eq!(kb.write_calls(), 2);
}

#[test]
fn cancelled_run_stops_before_next_record() {
    let kb = MockKb::new(&[("9", &["E100"])]);
    let records = vec![record("9", "GCA_900128725.1")];
    let cancel = CancelFlag::new();
    cancel.cancel();

    let cfg = config();
    let app = SyncApp::new(&kb, &cfg);
    let mut audit = AuditLog::new(Vec::new());
    let summary = app
        .run_on(&records, RunOptions::default(), &mut audit, &cancel, today())
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.written + summary.skipped + summary.warnings + summary.errors, 0);
    let log = String::from_utf8(audit.into_inner()).unwrap();
    assert_eq!(log.lines().count(), 1); // header only, still flushed
}

#[test]
fn auth_failure_aborts_before_any_record() {
    let mut kb = MockKb::new(&[("9", &["E100"])]);
    kb.reject_auth = true;
    let records = vec![record("9", "GCA_900128725.1")];

    let cfg = config();
    let app = SyncApp::new(&kb, &cfg);
    let mut audit = AuditLog::new(Vec::new());
    let result = app.run_on(
        &records,
        RunOptions::default(),
        &mut audit,
        &CancelFlag::new(),
        today(),
    );

    assert!(matches!(result, Err(SyncError::Auth(_))));
    assert_eq!(kb.write_calls(), 0);
}
