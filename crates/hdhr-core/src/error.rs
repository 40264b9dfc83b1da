use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// A required JSON object was null. Contract violation on the caller's side.
    #[error("invalid input: {0} is null")]
    InvalidInput(&'static str),
    #[error("malformed field {field}: expected {expected}")]
    MalformedField {
        field: String,
        expected: &'static str,
    },
    #[error("discovery unavailable: {0}")]
    DiscoveryUnavailable(String),
    #[error("status fetch failed: {0}")]
    FetchFailed(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn malformed(field: impl Into<String>, expected: &'static str) -> Self {
        Self::MalformedField {
            field: field.into(),
            expected,
        }
    }
}
