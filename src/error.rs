use thiserror::Error;

#[derive(Error, Debug)]
pub enum GicsError {
    /// Format or structural violation: bad magic, unsupported version,
    /// malformed payload.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// The byte sequence ends early: truncated header, truncated payload or
    /// missing end-of-stream marker. Also an integrity failure, see
    /// [`GicsError::is_integrity`].
    #[error("incomplete data: {0}")]
    IncompleteData(String),

    /// A configured size or count bound was exceeded.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// Encoder misuse such as appending after finalize.
    #[error("state error: {0}")]
    State(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// The anomaly sidecar writer refused the report.
    #[error("sidecar error: {0}")]
    Sidecar(String),

    /// Propagated I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GicsError {
    /// True for every error that means "these bytes are not a valid stream".
    /// Incomplete data is a special case of an integrity failure.
    pub fn is_integrity(&self) -> bool {
        matches!(self, GicsError::Integrity(_) | GicsError::IncompleteData(_))
    }

    pub fn is_incomplete(&self) -> bool {
        matches!(self, GicsError::IncompleteData(_))
    }

    /// Errors a decoder is allowed to raise on hostile input.
    pub fn is_recognized_decode_error(&self) -> bool {
        self.is_integrity() || matches!(self, GicsError::LimitExceeded(_))
    }
}

pub type Result<T> = std::result::Result<T, GicsError>;
