use thiserror::Error;

/// Errors surfaced by the Client Replica (§4.F).
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("local storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("malformed row payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("server request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("server returned an error response: {0}")]
    Server(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("row {table}/{row_id} failed local validation: {reason}")]
    Invalid {
        table: String,
        row_id: String,
        reason: String,
    },
}
