use std::time::Duration;

use xck_schemas::{Role, UnitKey};
use xck_source::SourceError;

/// Failure while retrieving a unit or a window aggregate. Always fatal.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("{role} {facet}: {source}")]
    Source {
        role: Role,
        facet: String,
        #[source]
        source: SourceError,
    },
    #[error("block {unit}: fetch did not finish within {after:?}")]
    UnitTimeout { unit: UnitKey, after: Duration },
    #[error("window [{start}, {end}): aggregate fetch did not finish within {after:?}")]
    WindowTimeout {
        start: UnitKey,
        end: UnitKey,
        after: Duration,
    },
    #[error("fetch cancelled")]
    Cancelled,
    #[error("aggregate task ended abnormally: {0}")]
    Join(String),
}

impl FetchError {
    pub fn annotate(role: Role, facet: impl Into<String>) -> impl FnOnce(SourceError) -> FetchError {
        let facet = facet.into();
        move |source| FetchError::Source {
            role,
            facet,
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }
}
