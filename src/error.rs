use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid taxonomy id: {0}")]
    InvalidTaxonId(String),

    #[error("invalid assembly accession: {0}")]
    InvalidAccession(String),

    #[error("invalid entity id: {0}")]
    InvalidEntityId(String),

    #[error("invalid property id: {0}")]
    InvalidPropertyId(String),

    #[error("missing config file taxref-sync.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    ConfigValue(String),

    #[error("failed to read input report at {0}")]
    ReportRead(PathBuf),

    #[error("malformed report row {line}: {message}")]
    ReportRow { line: usize, message: String },

    #[error("knowledge base request failed: {0}")]
    KbHttp(String),

    #[error("knowledge base returned status {status}: {message}")]
    KbStatus { status: u16, message: String },

    #[error("knowledge base rejected credentials: {0}")]
    Auth(String),

    #[error("write conflict on {entity}/{property}: {message}")]
    WriteConflict {
        entity: String,
        property: String,
        message: String,
    },

    #[error("failed to build identity index: {0}")]
    IndexBuild(String),

    #[error("audit log error: {0}")]
    Audit(String),
}

impl SyncError {
    /// Whether a retry with backoff can reasonably succeed. Conflicts and
    /// client-side statuses are terminal; only network failures, throttling,
    /// and server-side statuses qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::KbHttp(_) => true,
            SyncError::KbStatus { status, .. } => {
                matches!(status, 429 | 500 | 502 | 503 | 504)
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(SyncError::KbHttp("timeout".to_string()).is_transient());
        assert!(
            SyncError::KbStatus {
                status: 429,
                message: "slow down".to_string()
            }
            .is_transient()
        );
        assert!(
            !SyncError::KbStatus {
                status: 404,
                message: "no such entity".to_string()
            }
            .is_transient()
        );
        assert!(
            !SyncError::WriteConflict {
                entity: "E1".to_string(),
                property: "P7".to_string(),
                message: "unique constraint".to_string()
            }
            .is_transient()
        );
    }
}
