use std::collections::HashMap;

use chrono::NaiveDate;

use crate::domain::{EntityId, Fact, PropertyId, WritePlan};
use crate::kb::ExistingClaim;

/// Snapshot of current remote claims for the target property, scoped to
/// entities that have it set. Built once per run on first need and treated as
/// read-only afterwards; concurrent external edits during a run are outside
/// its guarantees.
#[derive(Debug, Default)]
pub struct ExistingState {
    claims: HashMap<EntityId, Vec<ExistingClaim>>,
}

impl ExistingState {
    pub fn new(claims: HashMap<EntityId, Vec<ExistingClaim>>) -> Self {
        Self { claims }
    }

    pub fn claims_for(&self, entity: &EntityId) -> &[ExistingClaim] {
        self.claims.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn entities(&self) -> usize {
        self.claims.len()
    }
}

/// Pure decision logic: no I/O, state in, plan out.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    retrieved_property: PropertyId,
    staleness_days: i64,
    check_references: bool,
}

impl ReconciliationEngine {
    pub fn new(retrieved_property: PropertyId, staleness_days: i64, check_references: bool) -> Self {
        Self {
            retrieved_property,
            staleness_days,
            check_references,
        }
    }

    /// Decides the minimal write for `fact` on `entity`.
    ///
    /// Without a snapshot the plan is always Create; the store's own
    /// idempotence absorbs identical re-writes. With a snapshot, a matching
    /// value short-circuits to NoOp unless reference checking finds the
    /// provenance stale, in which case the reference group is replaced.
    pub fn plan(
        &self,
        entity: &EntityId,
        fact: &Fact,
        existing: Option<&ExistingState>,
        today: NaiveDate,
    ) -> WritePlan {
        let Some(state) = existing else {
            return WritePlan::Create;
        };

        let matching: Vec<&ExistingClaim> = state
            .claims_for(entity)
            .iter()
            .filter(|claim| claim.value == fact.value)
            .collect();
        if matching.is_empty() {
            return WritePlan::Create;
        }
        if !self.check_references {
            return WritePlan::NoOp;
        }

        // Freshness is judged against the most recently retrieved matching
        // group; groups without a parseable retrieved date do not count.
        let latest = matching
            .iter()
            .flat_map(|claim| claim.references.iter())
            .filter_map(|group| {
                group
                    .value_of(&self.retrieved_property)
                    .and_then(parse_retrieved_date)
            })
            .max();

        match latest {
            Some(retrieved) if (today - retrieved).num_days() < self.staleness_days => {
                WritePlan::NoOp
            }
            // Missing or stale provenance: replace, never append.
            _ => WritePlan::UpdateReference,
        }
    }
}

fn parse_retrieved_date(value: &str) -> Option<NaiveDate> {
    let date_part = value.split('T').next().unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use crate::domain::ReferenceGroup;

    use super::*;

    fn engine(check_references: bool) -> ReconciliationEngine {
        ReconciliationEngine::new("P813".parse().unwrap(), 180, check_references)
    }

    fn fact(value: &str) -> Fact {
        Fact {
            property: "P17".parse().unwrap(),
            value: value.to_string(),
            references: Vec::new(),
        }
    }

    fn claim(value: &str, retrieved: &str) -> ExistingClaim {
        ExistingClaim {
            value: value.to_string(),
            references: vec![ReferenceGroup {
                parts: vec![("P813".parse().unwrap(), retrieved.to_string())],
            }],
        }
    }

    fn state(entity: &str, claims: Vec<ExistingClaim>) -> ExistingState {
        let mut map = HashMap::new();
        map.insert(entity.parse().unwrap(), claims);
        ExistingState::new(map)
    }

    fn day(text: &str) -> NaiveDate {
        NaiveDate::parse_from_str(text, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn baseline_mode_always_creates() {
        let entity: EntityId = "E100".parse().unwrap();
        let plan = engine(true).plan(&entity, &fact("GCA_900128725.1"), None, day("2026-08-23"));
        assert_eq!(plan, WritePlan::Create);
    }

    #[test]
    fn missing_value_creates() {
        let entity: EntityId = "E100".parse().unwrap();
        let snapshot = state("E100", vec![claim("GCA_000005845.2", "2026-08-01")]);
        let plan = engine(false).plan(
            &entity,
            &fact("GCA_900128725.1"),
            Some(&snapshot),
            day("2026-08-23"),
        );
        assert_eq!(plan, WritePlan::Create);
    }

    #[test]
    fn matching_value_is_noop_without_reference_check() {
        let entity: EntityId = "E100".parse().unwrap();
        let snapshot = state("E100", vec![claim("GCA_900128725.1", "2020-01-01")]);
        let plan = engine(false).plan(
            &entity,
            &fact("GCA_900128725.1"),
            Some(&snapshot),
            day("2026-08-23"),
        );
        assert_eq!(plan, WritePlan::NoOp);
    }

    #[test]
    fn tie_break_uses_most_recent_group() {
        let entity: EntityId = "E100".parse().unwrap();
        let snapshot = state(
            "E100",
            vec![
                claim("GCA_900128725.1", "2020-01-01"),
                claim("GCA_900128725.1", "2026-08-20"),
            ],
        );
        let plan = engine(true).plan(
            &entity,
            &fact("GCA_900128725.1"),
            Some(&snapshot),
            day("2026-08-23"),
        );
        assert_eq!(plan, WritePlan::NoOp);
    }

    #[test]
    fn unparseable_retrieved_date_counts_as_stale() {
        let entity: EntityId = "E100".parse().unwrap();
        let snapshot = state("E100", vec![claim("GCA_900128725.1", "last tuesday")]);
        let plan = engine(true).plan(
            &entity,
            &fact("GCA_900128725.1"),
            Some(&snapshot),
            day("2026-08-23"),
        );
        assert_eq!(plan, WritePlan::UpdateReference);
    }
}
