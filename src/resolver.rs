use std::collections::HashMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{EntityId, PropertyId, TaxonId};
use crate::error::SyncError;
use crate::kb::KbClient;

/// Batches at or above this size build the bulk index under the auto strategy.
pub const BULK_THRESHOLD: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// One remote query per record.
    PerRecord,
    /// Prefetch the whole identifier index, then local lookups only.
    Bulk,
    /// Bulk for batches of `BULK_THRESHOLD` or more, per-record below.
    Auto,
}

/// Result of mapping one taxonomy id to a remote entity. The three cases are
/// never conflated: absence is routine, ambiguity needs a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(EntityId),
    NotFound,
    Ambiguous(usize),
}

/// Identifier → entity index built in one pass. Only identifiers matching
/// exactly one entity resolve; multi-entity identifiers are kept aside so
/// lookups can still report them as ambiguous rather than missing.
#[derive(Debug, Default)]
pub struct IdentityIndex {
    unique: HashMap<String, EntityId>,
    ambiguous: HashMap<String, usize>,
}

impl IdentityIndex {
    pub fn from_value_index(raw: HashMap<String, Vec<EntityId>>) -> Self {
        let mut unique = HashMap::new();
        let mut ambiguous = HashMap::new();
        for (value, mut entities) in raw {
            if entities.len() > 1 {
                ambiguous.insert(value, entities.len());
            } else if let Some(entity) = entities.pop() {
                unique.insert(value, entity);
            }
        }
        Self { unique, ambiguous }
    }

    pub fn lookup(&self, key: &str) -> Resolution {
        if let Some(entity) = self.unique.get(key) {
            return Resolution::Resolved(entity.clone());
        }
        if let Some(count) = self.ambiguous.get(key) {
            return Resolution::Ambiguous(*count);
        }
        Resolution::NotFound
    }

    pub fn len(&self) -> usize {
        self.unique.len()
    }

    pub fn is_empty(&self) -> bool {
        self.unique.is_empty()
    }
}

pub struct IdentityResolver<'a, K: KbClient> {
    kb: &'a K,
    property: PropertyId,
    strategy: ResolutionStrategy,
    /// Whether the identifying property is configured unique. A multi-entity
    /// match on a unique property means the store holds duplicates.
    unique: bool,
    index: Option<IdentityIndex>,
}

impl<'a, K: KbClient> IdentityResolver<'a, K> {
    pub fn new(
        kb: &'a K,
        property: PropertyId,
        strategy: ResolutionStrategy,
        unique: bool,
    ) -> Self {
        Self {
            kb,
            property,
            strategy,
            unique,
            index: None,
        }
    }

    /// Builds the bulk index when the strategy calls for it. Index failure is
    /// fatal for the run, so errors here are surfaced as `IndexBuild`.
    pub fn prepare(&mut self, batch_size: usize) -> Result<(), SyncError> {
        let bulk = match self.strategy {
            ResolutionStrategy::Bulk => true,
            ResolutionStrategy::PerRecord => false,
            ResolutionStrategy::Auto => batch_size >= BULK_THRESHOLD,
        };
        if !bulk {
            debug!(batch_size, "resolving per record");
            return Ok(());
        }

        let raw = self
            .kb
            .fetch_value_index(&self.property)
            .map_err(|err| SyncError::IndexBuild(err.to_string()))?;
        let index = IdentityIndex::from_value_index(raw);
        info!(
            property = %self.property,
            unique = index.unique.len(),
            ambiguous = index.ambiguous.len(),
            "identity index built"
        );
        if self.unique && !index.ambiguous.is_empty() {
            warn!(
                property = %self.property,
                identifiers = index.ambiguous.len(),
                "unique property has identifiers matching multiple entities"
            );
        }
        self.index = Some(index);
        Ok(())
    }

    /// Resolves one taxonomy id. A local lookup once the index is built,
    /// otherwise one remote query.
    pub fn resolve(&self, taxon: &TaxonId) -> Result<Resolution, SyncError> {
        if let Some(index) = &self.index {
            return Ok(index.lookup(taxon.as_str()));
        }

        let mut matches = self.kb.query_by_value(&self.property, taxon.as_str())?;
        if matches.len() > 1 {
            if self.unique {
                warn!(
                    property = %self.property,
                    taxon = %taxon,
                    entities = matches.len(),
                    "unique property matched multiple entities"
                );
            }
            return Ok(Resolution::Ambiguous(matches.len()));
        }
        Ok(match matches.pop() {
            Some(entity) => Resolution::Resolved(entity),
            None => Resolution::NotFound,
        })
    }

    /// Resolves a batch, keeping only ids that map to exactly one entity.
    pub fn resolve_all(
        &self,
        taxa: &[TaxonId],
    ) -> Result<HashMap<TaxonId, EntityId>, SyncError> {
        let mut resolved = HashMap::new();
        for taxon in taxa {
            if let Resolution::Resolved(entity) = self.resolve(taxon)? {
                resolved.insert(taxon.clone(), entity);
            }
        }
        Ok(resolved)
    }
}
