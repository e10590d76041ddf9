use thiserror::Error;

#[derive(Debug, Error)]
pub enum VigilError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("obligation not found: {0}")]
    ObligationNotFound(i64),

    #[error("subject not found: {0}")]
    SubjectNotFound(i64),

    #[error("proposal not found: {0}")]
    ProposalNotFound(i64),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VigilError>;
