use thiserror::Error;

#[derive(Error, Debug)]
pub enum NlSqlError {
    /// No table or column cleared the resolution threshold.
    #[error("No match: {0}")]
    NoMatch(String),

    #[error("Unresolved enum text: {0}")]
    UnresolvedEnumText(String),

    #[error("Join path not found: {0}")]
    JoinPathNotFound(String),

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Vocabulary error: {0}")]
    Vocabulary(String),

    #[error("Enum definition error: {0}")]
    EnumDefinition(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<rusqlite::Error> for NlSqlError {
    fn from(err: rusqlite::Error) -> Self {
        NlSqlError::Database(err.to_string())
    }
}

impl NlSqlError {
    /// Expected outcomes that degrade the query instead of failing it.
    pub fn is_degradation(&self) -> bool {
        matches!(
            self,
            NlSqlError::NoMatch(_)
                | NlSqlError::UnresolvedEnumText(_)
                | NlSqlError::JoinPathNotFound(_)
                | NlSqlError::PersistenceUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, NlSqlError>;
