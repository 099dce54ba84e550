//! Error taxonomy.
//!
//! Two layers:
//! - [`DbError`]: the closed set the storage engines return. Callers branch
//!   on [`DbError::kind`], never on driver text.
//! - [`ModelError`]: the domain errors repositories return, each with a
//!   stable machine-readable [`ErrorCode`].

use std::fmt;

use thiserror::Error;
use tracing::error;

use crate::lock::LockError;

/// Classified storage error.
#[derive(Debug, Error)]
pub enum DbError {
    /// The targeted document or array element does not exist.
    #[error("no db record: {0}")]
    NoDbRecord(String),

    /// A create-if-absent or uniqueness guard was violated.
    #[error("record exists: {0}")]
    RecordExists(String),

    /// Transport, driver or serialization failure. Not locally recoverable.
    #[error("storage: {0}")]
    System(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    NoDbRecord,
    RecordExists,
    System,
}

impl DbError {
    pub fn no_record(what: impl Into<String>) -> Self {
        Self::NoDbRecord(what.into())
    }

    pub fn kind(&self) -> DbErrorKind {
        match self {
            Self::NoDbRecord(_) => DbErrorKind::NoDbRecord,
            Self::RecordExists(_) => DbErrorKind::RecordExists,
            Self::System(_) => DbErrorKind::System,
        }
    }

    pub fn is_no_record(&self) -> bool {
        self.kind() == DbErrorKind::NoDbRecord
    }
}

/// Stable domain error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NoDbRecord,
    NoLink,
    NoLinkOrResigned,
    NoLinkOrUnsigned,
    NoLinkOrNoManager,
    NoLinkOrManagerExists,
    DuplicateBinding,
    ManyEmployeeManagers,
    WrongVerificationCode,
    VerificationCodeExpired,
    InvalidParameter,
    UnmatchedEmailDomain,
    NotAnEmail,
    NotReadyToSign,
    OrgSignatureChanged,
    SystemError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoDbRecord => "no_db_record",
            Self::NoLink => "no_link",
            Self::NoLinkOrResigned => "no_link_or_resigned",
            Self::NoLinkOrUnsigned => "no_link_or_unsigned",
            Self::NoLinkOrNoManager => "no_link_or_no_manager",
            Self::NoLinkOrManagerExists => "no_link_or_manager_exists",
            Self::DuplicateBinding => "duplicate_binding",
            Self::ManyEmployeeManagers => "many_employee_managers",
            Self::WrongVerificationCode => "wrong_verification_code",
            Self::VerificationCodeExpired => "verification_code_expired",
            Self::InvalidParameter => "invalid_parameter",
            Self::UnmatchedEmailDomain => "unmatched_email_domain",
            Self::NotAnEmail => "not_an_email",
            Self::NotReadyToSign => "not_ready_to_sign",
            Self::OrgSignatureChanged => "org_signature_changed",
            Self::SystemError => "system_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Domain error returned by repositories and the signing flow.
///
/// `System` never exposes its cause through `Display`; the detail is logged
/// where the error is classified.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("{code}: {cause}")]
    Domain {
        code: ErrorCode,
        cause: String,
        db_kind: Option<DbErrorKind>,
    },

    #[error("internal error")]
    System(#[source] anyhow::Error),
}

impl ModelError {
    pub fn new(code: ErrorCode, cause: impl Into<String>) -> Self {
        Self::Domain {
            code,
            cause: cause.into(),
            db_kind: None,
        }
    }

    pub fn invalid_parameter(cause: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, cause)
    }

    /// Classify a storage error. `NoDbRecord` becomes `on_no_record`, the
    /// caller's precise reading of "nothing matched".
    pub fn from_db(err: DbError, on_no_record: ErrorCode) -> Self {
        match err {
            DbError::NoDbRecord(cause) => Self::Domain {
                code: on_no_record,
                cause,
                db_kind: Some(DbErrorKind::NoDbRecord),
            },
            DbError::RecordExists(cause) => Self::Domain {
                code: ErrorCode::DuplicateBinding,
                cause,
                db_kind: Some(DbErrorKind::RecordExists),
            },
            DbError::System(e) => {
                error!(error = ?e, "storage failure");
                Self::System(e)
            }
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Domain { code, .. } => *code,
            Self::System(_) => ErrorCode::SystemError,
        }
    }

    /// Storage classification this error came from, if any.
    pub fn db_kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::Domain { db_kind, .. } => *db_kind,
            Self::System(_) => Some(DbErrorKind::System),
        }
    }
}

impl From<DbError> for ModelError {
    fn from(err: DbError) -> Self {
        Self::from_db(err, ErrorCode::NoDbRecord)
    }
}

impl From<LockError> for ModelError {
    fn from(err: LockError) -> Self {
        error!(error = %err, "serialization lock failure");
        Self::System(anyhow::Error::new(err))
    }
}

/// Extension for mapping `Result<T, DbError>` with a specific no-record code.
pub trait DbResultExt<T> {
    fn or_no_record(self, code: ErrorCode) -> Result<T, ModelError>;
}

impl<T> DbResultExt<T> for Result<T, DbError> {
    fn or_no_record(self, code: ErrorCode) -> Result<T, ModelError> {
        self.map_err(|e| ModelError::from_db(e, code))
    }
}
