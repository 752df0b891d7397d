use std::fmt;

/// The full error taxonomy surfaced by adapters, the router, and the
/// control plane. Every kind round-trips through the REST JSON encoder
/// (see [`Error::status_code`] and [`Error::to_json`]).
#[derive(Debug)]
pub enum Error {
    /// Wire/framing violation in an ingress or egress adapter.
    BadProto(String),
    /// Cipher init failure or AEAD tag mismatch.
    CryptoError(String),
    /// Caller buffer too small for a frame.
    BufferOverflow(String),
    /// Control-plane JSON parse failure.
    BadJson(String),
    /// Control-plane validation failure (dangling reference, bad VO).
    SemanticError(String),
    /// Delete of a rule/egress that is still referenced.
    ResInUse(String),
    /// Reserved for future locking (not emitted by this implementation).
    ResLocked(String),
    /// Upstream dial failure.
    ConnFailure(String),
    /// No acceptable SOCKS5 auth method.
    BadAuthMethod(String),
    /// Credential rejected.
    Unauthenticated(String),
    /// Everything else.
    Misc(String),
}

impl Error {
    pub fn bad_proto(msg: impl Into<String>) -> Self {
        Self::BadProto(msg.into())
    }
    pub fn conn_failure(msg: impl Into<String>) -> Self {
        Self::ConnFailure(msg.into())
    }
    pub fn misc(msg: impl Into<String>) -> Self {
        Self::Misc(msg.into())
    }

    /// Short, stable name for each kind, used in logs and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadProto(_) => "BadProto",
            Self::CryptoError(_) => "CryptoError",
            Self::BufferOverflow(_) => "BufferOverflow",
            Self::BadJson(_) => "BadJson",
            Self::SemanticError(_) => "SemanticError",
            Self::ResInUse(_) => "ResInUse",
            Self::ResLocked(_) => "ResLocked",
            Self::ConnFailure(_) => "ConnFailure",
            Self::BadAuthMethod(_) => "BadAuthMethod",
            Self::Unauthenticated(_) => "Unauthenticated",
            Self::Misc(_) => "Misc",
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::BadProto(m)
            | Self::CryptoError(m)
            | Self::BufferOverflow(m)
            | Self::BadJson(m)
            | Self::SemanticError(m)
            | Self::ResInUse(m)
            | Self::ResLocked(m)
            | Self::ConnFailure(m)
            | Self::BadAuthMethod(m)
            | Self::Unauthenticated(m)
            | Self::Misc(m) => m,
        }
    }

    /// HTTP status for the REST façade, per spec §6.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadJson(_) | Self::SemanticError(_) | Self::BadProto(_) => 400,
            Self::ResInUse(_) | Self::ResLocked(_) => 409,
            _ => 500,
        }
    }

    /// `{"message": "..."}` body rendered by the REST façade.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "message": self.message() })
    }

    /// Classifies benign session-teardown causes that spec §4.G says must
    /// not be logged: EOF and operation-aborted.
    pub fn is_benign_eof(&self) -> bool {
        matches!(self, Self::Misc(m) if m == "eof" || m == "operation aborted")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind(), self.message())
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match e.kind() {
            UnexpectedEof => Self::Misc("eof".into()),
            ConnectionAborted | ConnectionReset => Self::Misc("operation aborted".into()),
            ConnectionRefused => Self::ConnFailure(e.to_string()),
            _ => Self::Misc(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::BadJson(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
