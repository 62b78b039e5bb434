use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded while writing {key}: {required} bytes required, limit is {limit}")]
    QuotaExceeded {
        key: String,
        required: u64,
        limit: u64,
    },

    #[error("stored value for {key} is corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("import bundle is not valid JSON: {0}")]
    InvalidBundle(#[source] serde_json::Error),

    #[error("failed to serialize value for {key}: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    /// Corrupt data is treated as absence by the degrading readers.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
