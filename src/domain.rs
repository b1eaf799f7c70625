use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Numeric taxonomy identifier, the grouping key of the input report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaxonId(String);

impl TaxonId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid =
            !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(SyncError::InvalidTaxonId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Genome assembly accession such as `GCA_900128725.1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssemblyAccession(String);

impl AssemblyAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssemblyAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssemblyAccession {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let digits = |s: &str| !s.is_empty() && s.chars().all(|ch| ch.is_ascii_digit());
        let is_valid = normalized
            .strip_prefix("GCA_")
            .or_else(|| normalized.strip_prefix("GCF_"))
            .and_then(|rest| rest.split_once('.'))
            .is_some_and(|(base, version)| digits(base) && digits(version));
        if !is_valid {
            return Err(SyncError::InvalidAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Identifier of an entity in the remote knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(String);

impl EntityId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EntityId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(SyncError::InvalidEntityId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// Identifier of a property in the remote knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyId(String);

impl PropertyId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PropertyId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        if normalized.is_empty() || normalized.chars().any(char::is_whitespace) {
            return Err(SyncError::InvalidPropertyId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

/// One surviving input row: a taxonomy id paired with the single accession
/// observed for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecord {
    pub taxon: TaxonId,
    pub accession: AssemblyAccession,
}

/// Ordered provenance pairs attached to a fact, e.g. stated-in, retrieved
/// date, reference URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceGroup {
    pub parts: Vec<(PropertyId, String)>,
}

impl ReferenceGroup {
    pub fn value_of(&self, property: &PropertyId) -> Option<&str> {
        self.parts
            .iter()
            .find(|(prop, _)| prop == property)
            .map(|(_, value)| value.as_str())
    }
}

/// A (property, value) pair to assert on a remote entity, with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fact {
    pub property: PropertyId,
    pub value: String,
    pub references: Vec<ReferenceGroup>,
}

/// Minimal write decided by reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WritePlan {
    /// Assert the fact with its references.
    Create,
    /// Remote state already equivalent; nothing to send.
    NoOp,
    /// Value matches but provenance is stale; replace the reference group.
    UpdateReference,
}

/// Why a record was skipped without a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    UpToDate,
    DryRun,
    NotFound,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpToDate => write!(f, "up to date"),
            SkipReason::DryRun => write!(f, "dry run"),
            SkipReason::NotFound => write!(f, "not found"),
        }
    }
}

/// Terminal result for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum WriteOutcome {
    Written { entity: EntityId },
    Skipped { reason: SkipReason },
    Warning { reason: String },
    Error { detail: String },
}

impl WriteOutcome {
    pub fn severity(&self) -> Severity {
        match self {
            WriteOutcome::Written { .. } => Severity::Info,
            // An unresolved record is routine but still worth surfacing.
            WriteOutcome::Skipped {
                reason: SkipReason::NotFound,
            } => Severity::Warning,
            WriteOutcome::Skipped { .. } => Severity::Info,
            WriteOutcome::Warning { .. } => Severity::Warning,
            WriteOutcome::Error { .. } => Severity::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}
