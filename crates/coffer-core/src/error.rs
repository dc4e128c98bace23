use thiserror::Error;

pub type Result<T> = std::result::Result<T, CofferError>;

#[derive(Debug, Error)]
pub enum CofferError {
    #[error("remote store not initialized")]
    StoreNotInitialized,

    #[error("store not ready for reading/writing")]
    StoreNotConnected,

    #[error("read/write to key name is forbidden")]
    ForbiddenKey,

    #[error("malformed metadata")]
    MalformedMetadata,

    #[error("bad version")]
    BadVersion,

    #[error("user metadata not set")]
    MissingMetadata,

    #[error("object not found: '{0}'")]
    ObjectNotFound(String),

    #[error("ciphertext not authentic")]
    AuthFailure,

    #[error("ciphertext too short")]
    TruncatedCiphertext,

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("malformed manifest data")]
    MalformedManifest,

    #[error("archive error: {0}")]
    Archive(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl CofferError {
    /// True when the error means an object (or the store header) is absent
    /// from the storage layer, as opposed to any other failure.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, CofferError::ObjectNotFound(_))
    }

    /// Wrap for transport through `std::io::Read`/`Write` adapter chains.
    pub fn into_io(self) -> std::io::Error {
        match self {
            CofferError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }

    /// Recover a typed error that crossed an `std::io` boundary.
    /// Anything that isn't a wrapped `CofferError` stays an I/O error.
    pub fn from_io(err: std::io::Error) -> CofferError {
        if err.get_ref().is_some_and(|inner| inner.is::<CofferError>()) {
            let inner = err.into_inner().expect("inner error present");
            *inner.downcast::<CofferError>().expect("type checked above")
        } else {
            CofferError::Io(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_error_survives_io_boundary() {
        let io = CofferError::AuthFailure.into_io();
        assert!(matches!(CofferError::from_io(io), CofferError::AuthFailure));
    }

    #[test]
    fn plain_io_error_stays_io() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout");
        assert!(matches!(CofferError::from_io(io), CofferError::Io(_)));
    }

    #[test]
    fn not_exist_predicate() {
        assert!(CofferError::ObjectNotFound("blob/1/0".into()).is_not_exist());
        assert!(!CofferError::StoreNotInitialized.is_not_exist());
    }
}
