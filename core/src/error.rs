use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Transaction for property '{property_id}' references unknown tract '{tract_id}'")]
    InvalidGeography { tract_id: String, property_id: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Singular design matrix for supertract '{supertract_id}': rank {rank} of {columns}")]
    SingularDesignMatrix {
        supertract_id: String,
        rank: usize,
        columns: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IndexError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig { reason: reason.into() }
    }
}

pub type IndexResult<T> = Result<T, IndexError>;
