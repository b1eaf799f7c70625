use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::domain::{EntityId, PropertyId, ReferenceGroup};
use crate::error::SyncError;
use crate::resolver::ResolutionStrategy;

/// On-disk shape of `taxref-sync.json`.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub kb_base_url: String,
    pub target_property: String,
    pub taxon_property: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub status_filter: Option<String>,
    #[serde(default)]
    pub columns: Option<ColumnNames>,
    #[serde(default)]
    pub staleness_days: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub strategy: Option<ResolutionStrategy>,
    pub reference: ReferenceTemplateEntry,
    #[serde(default)]
    pub unique_properties: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ColumnNames {
    #[serde(default = "default_status_column")]
    pub status: String,
    #[serde(default = "default_taxon_column")]
    pub taxon: String,
    #[serde(default = "default_accession_column")]
    pub accession: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            status: default_status_column(),
            taxon: default_taxon_column(),
            accession: default_accession_column(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ReferenceTemplateEntry {
    pub stated_in: String,
    pub url_template: String,
    #[serde(default)]
    pub stated_in_property: Option<String>,
    #[serde(default)]
    pub retrieved_property: Option<String>,
    #[serde(default)]
    pub url_property: Option<String>,
}

/// Provenance template applied to every fact: which entity the values are
/// stated in, and how to derive the reference URL from an accession.
#[derive(Debug, Clone)]
pub struct ReferenceTemplate {
    pub stated_in: EntityId,
    pub url_template: String,
    pub stated_in_property: PropertyId,
    pub retrieved_property: PropertyId,
    pub url_property: PropertyId,
}

impl ReferenceTemplate {
    pub fn url_for(&self, accession: &str) -> String {
        self.url_template.replace("{accession}", accession)
    }

    /// Provenance group asserted alongside every written value: stated-in,
    /// retrieved date, and the report URL for the accession, in that order.
    pub fn group_for(&self, accession: &str, retrieved: NaiveDate) -> ReferenceGroup {
        ReferenceGroup {
            parts: vec![
                (
                    self.stated_in_property.clone(),
                    self.stated_in.as_str().to_string(),
                ),
                (
                    self.retrieved_property.clone(),
                    retrieved.format("%Y-%m-%d").to_string(),
                ),
                (self.url_property.clone(), self.url_for(accession)),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub kb_base_url: String,
    pub target_property: PropertyId,
    pub taxon_property: PropertyId,
    pub input: Option<PathBuf>,
    pub status_filter: String,
    pub columns: ColumnNames,
    pub staleness_days: i64,
    pub max_retries: usize,
    pub strategy: ResolutionStrategy,
    pub reference: ReferenceTemplate,
    pub unique_properties: Vec<PropertyId>,
}

impl ResolvedConfig {
    pub fn is_unique(&self, property: &PropertyId) -> bool {
        self.unique_properties.iter().any(|p| p == property)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from("taxref-sync.json"),
        };

        if path.is_none() && !config_path.exists() {
            return Err(SyncError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| SyncError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, SyncError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let staleness_days = config.staleness_days.unwrap_or(180);
        if staleness_days <= 0 {
            return Err(SyncError::ConfigValue(format!(
                "staleness_days must be positive, got {staleness_days}"
            )));
        }

        let url_template = config.reference.url_template;
        if !url_template.contains("{accession}") {
            return Err(SyncError::ConfigValue(format!(
                "url_template must contain an {{accession}} placeholder: {url_template}"
            )));
        }

        let reference = ReferenceTemplate {
            stated_in: config.reference.stated_in.parse()?,
            url_template,
            stated_in_property: config
                .reference
                .stated_in_property
                .as_deref()
                .unwrap_or("P248")
                .parse()?,
            retrieved_property: config
                .reference
                .retrieved_property
                .as_deref()
                .unwrap_or("P813")
                .parse()?,
            url_property: config
                .reference
                .url_property
                .as_deref()
                .unwrap_or("P854")
                .parse()?,
        };

        let unique_properties = config
            .unique_properties
            .iter()
            .map(|value| value.parse())
            .collect::<Result<Vec<PropertyId>, SyncError>>()?;

        Ok(ResolvedConfig {
            schema_version,
            kb_base_url: config.kb_base_url,
            target_property: config.target_property.parse()?,
            taxon_property: config.taxon_property.parse()?,
            input: config.input.map(PathBuf::from),
            status_filter: config
                .status_filter
                .unwrap_or_else(|| "Complete Genome".to_string()),
            columns: config.columns.unwrap_or_default(),
            staleness_days,
            max_retries: config.max_retries.unwrap_or(4),
            strategy: config.strategy.unwrap_or(ResolutionStrategy::Auto),
            reference,
            unique_properties,
        })
    }
}

fn default_status_column() -> String {
    "Status".to_string()
}

fn default_taxon_column() -> String {
    "TaxID".to_string()
}

fn default_accession_column() -> String {
    "Assembly Accession".to_string()
}
