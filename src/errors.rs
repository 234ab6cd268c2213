use thiserror::Error;

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("schema error: {0}")]
    SchemaError(String),
    #[error("query error: {0}")]
    QueryError(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no join path from {from} to {to}")]
    NoPathFound { from: String, to: String },
    #[error("unsupported delete method {0:?}, expected hard or soft")]
    UnsupportedMethod(String),
    #[error("integrity check toggle failed: {0}")]
    IntegrityCheck(String),
    #[error("transaction error: {0}")]
    Transaction(String),
    #[error("restoration failed: {message}")]
    Restoration {
        message: String,
        #[source]
        original: Option<Box<CascadeError>>,
    },
}

impl CascadeError {
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        CascadeError::ConnectionError(msg.into())
    }

    pub fn schema<T: Into<String>>(msg: T) -> Self {
        CascadeError::SchemaError(msg.into())
    }

    pub fn query<T: Into<String>>(msg: T) -> Self {
        CascadeError::QueryError(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        CascadeError::InvalidInput(msg.into())
    }

    pub fn no_path<A: Into<String>, B: Into<String>>(from: A, to: B) -> Self {
        CascadeError::NoPathFound {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn unsupported_method<T: Into<String>>(name: T) -> Self {
        CascadeError::UnsupportedMethod(name.into())
    }

    pub fn integrity_check<T: Into<String>>(msg: T) -> Self {
        CascadeError::IntegrityCheck(msg.into())
    }

    pub fn transaction<T: Into<String>>(msg: T) -> Self {
        CascadeError::Transaction(msg.into())
    }

    pub fn restoration<T: Into<String>>(msg: T, original: Option<CascadeError>) -> Self {
        CascadeError::Restoration {
            message: msg.into(),
            original: original.map(Box::new),
        }
    }

    /// Combines the outcome of a block of work with the outcome of the cleanup
    /// that followed it. A cleanup failure never hides the original error.
    pub fn settle<T>(
        outcome: Result<T, CascadeError>,
        cleanup: Result<(), CascadeError>,
    ) -> Result<T, CascadeError> {
        match (outcome, cleanup) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(err), Ok(())) => Err(err),
            (Ok(_), Err(cleanup_err)) => Err(cleanup_err),
            (Err(err), Err(cleanup_err)) => Err(cleanup_err.with_original(err)),
        }
    }

    fn with_original(self, original: CascadeError) -> Self {
        match self {
            CascadeError::Restoration {
                message,
                original: None,
            } => CascadeError::restoration(message, Some(original)),
            other => CascadeError::restoration(other.to_string(), Some(original)),
        }
    }

    /// The error that aborted the run, when this one only reports failed cleanup.
    pub fn original(&self) -> Option<&CascadeError> {
        match self {
            CascadeError::Restoration { original, .. } => original.as_deref(),
            _ => None,
        }
    }
}
