use thiserror::Error;

/// Classification of an [`IngestError`], used by listeners and callers that
/// need to react to the kind of failure rather than its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    StorageWrite,
    BusDispatch,
    Config,
    Cancelled,
    Internal,
}

/// Domain-specific error types for the block importer
#[derive(Error, Debug)]
pub enum IngestError {
    /// The IPC fetch failed: socket I/O, broken framing or a JSON-RPC error reply
    #[error("IPC transport failed: {message}")]
    Transport { message: String },

    /// The node returned a value that cannot be turned into a record
    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    /// The storage backend rejected a write
    #[error("Storage write failed: {message}")]
    StorageWrite { message: String },

    /// Database connection errors
    #[error("Database connection failed: {message}")]
    DatabaseConnectionFailed { message: String },

    /// The bus handler refused a message, or nobody was listening
    #[error("Bus dispatch to '{address}' failed: {message}")]
    BusDispatch { address: String, message: String },

    /// No reply arrived on the bus before the send timeout
    #[error("Bus send to '{address}' timed out after {timeout_ms} ms")]
    BusTimeout { address: String, timeout_ms: u64 },

    /// Configuration errors
    #[error("Configuration error: {parameter} - {message}")]
    ConfigurationError { parameter: String, message: String },

    /// Work was abandoned because the importer was stopped
    #[error("Import cancelled")]
    Cancelled,

    /// Generic internal errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl IngestError {
    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create an invalid format error
    #[must_use]
    pub fn invalid_format(field_name: &str, message: &str) -> Self {
        Self::InvalidFormat {
            message: format!("Invalid {field_name}: {message}"),
        }
    }

    /// Create a storage write error
    pub fn storage_write(message: impl Into<String>) -> Self {
        Self::StorageWrite {
            message: message.into(),
        }
    }

    /// Create a database connection error
    pub fn database_connection(message: impl Into<String>) -> Self {
        Self::DatabaseConnectionFailed {
            message: message.into(),
        }
    }

    /// Create a bus dispatch error
    pub fn bus_dispatch(address: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BusDispatch {
            address: address.into(),
            message: message.into(),
        }
    }

    /// Create a bus timeout error
    pub fn bus_timeout(address: impl Into<String>, timeout_ms: u64) -> Self {
        Self::BusTimeout {
            address: address.into(),
            timeout_ms,
        }
    }

    /// Create a configuration error
    pub fn configuration(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } | Self::InvalidFormat { .. } => ErrorKind::Transport,
            Self::StorageWrite { .. } | Self::DatabaseConnectionFailed { .. } => {
                ErrorKind::StorageWrite
            }
            Self::BusDispatch { .. } | Self::BusTimeout { .. } => ErrorKind::BusDispatch,
            Self::ConfigurationError { .. } => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::InternalError { .. } => ErrorKind::Internal,
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::BusTimeout { .. })
    }
}

/// Result type alias for import operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Convert from socket errors on the IPC channel
impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        Self::transport(format!("I/O error: {err}"))
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() || err.is_eof() {
            Self::transport(format!("Connection closed mid-message: {err}"))
        } else {
            Self::transport(format!("JSON framing error: {err}"))
        }
    }
}

/// Convert from standard database errors
impl From<sqlx::Error> for IngestError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => Self::storage_write(format!("Database error: {db_err}")),
            sqlx::Error::PoolClosed => Self::database_connection("Connection pool closed"),
            sqlx::Error::PoolTimedOut => Self::database_connection("Connection pool timed out"),
            _ => Self::database_connection(format!("SQLx error: {err}")),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for IngestError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::database_connection(format!("Failed to run database migrations: {err}"))
    }
}
