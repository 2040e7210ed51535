use crate::store::StoreError;
use thiserror::Error;

/// Failure kinds produced by the gate and the auth use cases.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token provided")]
    NoToken,
    #[error("malformed token")]
    MalformedToken,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("user not found")]
    UserNotFound,
    #[error("user inactive")]
    UserInactive,
    #[error("account locked")]
    AccountLocked,
    #[error("credential store unavailable")]
    CredentialStoreUnavailable,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("a user with this {field} already exists")]
    Conflict { field: &'static str },
    #[error("validation error")]
    Validation(Vec<String>),
    #[error("forbidden")]
    Forbidden,
    #[error("internal error during {operation}: {message}")]
    Internal {
        operation: &'static str,
        message: String,
    },
}

/// How a failure is presented to the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// No credential was presented.
    MissingCredential,
    /// The credential itself is unusable.
    InvalidCredential,
    /// The credential is fine but the subject may not proceed.
    UnauthorizedSubject,
    BadRequest,
    Conflict,
    Forbidden,
    Unavailable,
    Internal,
}

impl AuthError {
    pub fn internal(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Internal {
            operation,
            message: message.into(),
        }
    }

    /// Convert a store error, keeping the operation name for diagnostics.
    pub fn from_store(operation: &'static str, err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(_) => Self::CredentialStoreUnavailable,
            StoreError::Conflict { field } => Self::Conflict { field },
            StoreError::Backend(message) => Self::internal(operation, message),
        }
    }

    #[must_use]
    pub fn rejection(&self) -> Rejection {
        match self {
            Self::NoToken => Rejection::MissingCredential,
            Self::MalformedToken
            | Self::InvalidSignature
            | Self::Expired
            | Self::InvalidCredentials => Rejection::InvalidCredential,
            Self::UserNotFound | Self::UserInactive | Self::AccountLocked => {
                Rejection::UnauthorizedSubject
            }
            Self::Validation(_) => Rejection::BadRequest,
            Self::Conflict { .. } => Rejection::Conflict,
            Self::Forbidden => Rejection::Forbidden,
            Self::CredentialStoreUnavailable => Rejection::Unavailable,
            Self::Internal { .. } => Rejection::Internal,
        }
    }
}
