//! Error taxonomy for extraction and loading

use sams_core::TransportError;

/// Credential exchange failed. Fatal for the run.
#[derive(Debug)]
pub enum AuthError {
    /// Token endpoint answered with something other than 200
    Status(u16),
    /// 200, but no usable `Token_No` in the body
    MissingToken,
    Transport(TransportError),
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status(s) => write!(f, "authentication failed: HTTP {s}"),
            Self::MissingToken => write!(f, "authentication failed: no Token_No in response"),
            Self::Transport(e) => write!(f, "authentication failed: {e}"),
        }
    }
}

impl std::error::Error for AuthError {}

/// Failure of a single data-endpoint call
#[derive(Debug)]
pub enum ApiError {
    Transport(TransportError),
    /// 200 with a non-success business flag
    Rejected(String),
    /// 200, envelope lacks required fields
    MissingFields(Vec<&'static str>),
    /// 200, `len(Data) != RecordCount`
    CountMismatch { expected: u64, actual: u64 },
    /// Body is not a JSON object of the expected shape
    Malformed(String),
    BadRequest,
    ServerError,
    /// Any other non-200 status
    Http(u16),
    /// Re-authentication during a recovery attempt failed
    Auth(AuthError),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Rejected(m) => write!(f, "{m}"),
            Self::MissingFields(fields) => write!(
                f,
                "API returned invalid response: Fields {} missing",
                fields.join(", ")
            ),
            Self::CountMismatch { expected, actual } => write!(
                f,
                "API returned invalid response: Expected {expected} records, but got {actual}"
            ),
            Self::Malformed(m) => write!(f, "API returned invalid response: {m}"),
            Self::BadRequest => write!(f, "Bad Request: Some inputs are missing."),
            Self::ServerError => write!(f, "Server Error: Something went wrong."),
            Self::Http(s) => write!(f, "HTTP {s}"),
            Self::Auth(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        Self::Auth(e)
    }
}

impl ApiError {
    /// Everything except an auth failure is worth another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Auth(_))
    }
}

/// Classified storage failure
#[derive(Debug)]
pub enum StorageError {
    /// Uniqueness violation: the row is already present
    Constraint(String),
    /// Transaction conflict or file lock; transient
    Contention(String),
    Other(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constraint(m) => write!(f, "constraint violation: {m}"),
            Self::Contention(m) => write!(f, "storage contention: {m}"),
            Self::Other(m) => write!(f, "storage error: {m}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl StorageError {
    /// DuckDB surfaces every failure as text, so classify on the message
    pub fn classify(message: String) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("duplicate key")
            || lower.contains("violates unique")
            || lower.contains("violates primary key")
        {
            Self::Constraint(message)
        } else if lower.contains("conflict")
            || lower.contains("database is locked")
            || lower.contains("could not set lock")
        {
            Self::Contention(message)
        } else {
            Self::Other(message)
        }
    }

    pub fn is_contention(&self) -> bool {
        matches!(self, Self::Contention(_))
    }
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        Self::classify(e.to_string())
    }
}

/// Partition enumeration / normalisation failure
#[derive(Debug, PartialEq, Eq)]
pub enum PartitionError {
    UnknownProgram(String),
    UnknownEntity(String),
    UnknownVariant(String),
    /// Program is not configured for this entity type
    NotConfigured { entity: &'static str, program: &'static str },
    YearOutOfRange {
        program: &'static str,
        year: u16,
        min: u16,
        max: u16,
    },
    InvalidRange {
        program: String,
        min: u16,
        max: u16,
    },
}

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownProgram(p) => write!(f, "unknown program '{p}'"),
            Self::UnknownEntity(e) => write!(f, "unknown entity type '{e}'"),
            Self::UnknownVariant(v) => {
                write!(f, "unknown admission variant '{v}' (expected fresh or lateral)")
            }
            Self::NotConfigured { entity, program } => {
                write!(f, "program {program} has no {entity} partitions")
            }
            Self::YearOutOfRange {
                program,
                year,
                min,
                max,
            } => write!(
                f,
                "academic year {year} is outside the {program} range {min}-{max}"
            ),
            Self::InvalidRange { program, min, max } => {
                write!(f, "invalid year range for {program}: {min} > {max}")
            }
        }
    }
}

impl std::error::Error for PartitionError {}

/// Batch-level validation failure; the partition is not loaded
#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    NotAnObject { index: usize },
    MissingTag { index: usize, field: &'static str },
    WrongTag {
        index: usize,
        field: &'static str,
        expected: String,
        found: String,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject { index } => write!(f, "record {index} is not a JSON object"),
            Self::MissingTag { index, field } => write!(f, "record {index} has no '{field}' tag"),
            Self::WrongTag {
                index,
                field,
                expected,
                found,
            } => write!(
                f,
                "record {index} has {field}={found}, expected {expected}"
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_mismatch_names_both_counts() {
        let msg = ApiError::CountMismatch {
            expected: 10,
            actual: 5,
        }
        .to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains('5'));
    }

    #[test]
    fn missing_fields_listed() {
        let msg = ApiError::MissingFields(vec!["TotalRecordCount", "Data"]).to_string();
        assert_eq!(
            msg,
            "API returned invalid response: Fields TotalRecordCount, Data missing"
        );
    }

    #[test]
    fn auth_not_retryable() {
        assert!(!ApiError::Auth(AuthError::Status(401)).is_retryable());
        assert!(ApiError::ServerError.is_retryable());
        assert!(ApiError::Transport(TransportError::Timeout("t".into())).is_retryable());
    }

    #[test]
    fn classify_duckdb_messages() {
        let dup = StorageError::classify(
            "Constraint Error: Duplicate key \"barcode: 1\" violates unique constraint".into(),
        );
        assert!(matches!(dup, StorageError::Constraint(_)));

        let conflict =
            StorageError::classify("TransactionContext Error: Catalog write-write conflict".into());
        assert!(conflict.is_contention());

        let locked = StorageError::classify("IO Error: Could not set lock on file".into());
        assert!(locked.is_contention());

        let not_null =
            StorageError::classify("Constraint Error: NOT NULL constraint failed: t.c".into());
        assert!(matches!(not_null, StorageError::Other(_)));
    }
}
