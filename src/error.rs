use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColumnError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("failed to encode {target} as JSON: {source}")]
    Encoding {
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode JSON into {target}: {source}")]
    Decoding {
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read storage cell: {0:#}")]
    Accessor(#[source] anyhow::Error),
}

impl ColumnError {
    pub fn is_decoding(&self) -> bool {
        matches!(self, ColumnError::Decoding { .. })
    }

    pub fn is_encoding(&self) -> bool {
        matches!(self, ColumnError::Encoding { .. })
    }
}
