use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmrError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Upload '{upload_id}' not found")]
    UploadNotFound { upload_id: String },

    #[error("Spin row '{row_id}' not found")]
    RowNotFound { row_id: String },

    #[error("Bounty transaction '{bounty_id}' not found")]
    BountyNotFound { bounty_id: String },

    #[error("Attribution window {window_id} not found")]
    WindowNotFound { window_id: i64 },

    #[error("Cemetery record '{cemetery_id}' not found")]
    CemeteryRecordNotFound { cemetery_id: String },

    #[error("Invalid {entity} transition for '{id}': {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    #[error("Amount out of range: {0}")]
    InvalidAmount(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type SmrResult<T> = Result<T, SmrError>;
