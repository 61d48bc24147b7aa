#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("user has already joined this challenge")]
    AlreadyJoined,
    #[error("participant has already submitted an answer for this challenge")]
    AlreadySubmitted,
    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("classification failed: {0}")]
    Classification(String),
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("codec error: {0}")]
    Codec(String),
}

/// Coarse failure class, used by transport layers to pick a status code
/// (400 validation, 403 unauthorized, 404 not found, 409 conflict,
/// 502 collaborator, 500 everything else).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    Conflict,
    Collaborator,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::InvalidTransition { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::AlreadyJoined | Error::AlreadySubmitted => ErrorKind::Conflict,
            Error::Classification(_) => ErrorKind::Collaborator,
            Error::Storage(_) | Error::Codec(_) => ErrorKind::Internal,
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<minicbor::decode::Error> for Error {
    fn from(e: minicbor::decode::Error) -> Self {
        Error::Codec(e.to_string())
    }
}

impl From<minicbor::encode::Error<core::convert::Infallible>> for Error {
    fn from(e: minicbor::encode::Error<core::convert::Infallible>) -> Self {
        Error::Codec(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
