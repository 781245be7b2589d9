use thiserror::Error;

/// Error taxonomy shared by every layer of the engine.
///
/// Low-level OS errors are wrapped in `Io` with the errno preserved; the
/// remaining variants classify failures so callers can branch on kind
/// without string matching.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("not enough data: requested {requested} bytes, got {got}")]
    NotEnoughData { requested: usize, got: usize },
    #[error("partial write: requested {requested} bytes, wrote {written}")]
    PartialWrite { requested: usize, written: usize },
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
    #[error("requested backend '{0}' is not registered")]
    BackendUnavailable(String),
    #[error("backend mismatch: spec names '{0}'")]
    BackendMismatch(String),
    #[error("already open")]
    AlreadyOpen,
    #[error("not open")]
    NotOpen,
    #[error("read-only")]
    ReadOnly,
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("data source error: {0}")]
    DataSource(String),
}

/// Maps an io error from a path-addressed operation to the taxonomy,
/// keeping the path in the message for diagnostics.
pub(crate) fn from_path_io(err: std::io::Error, path: &std::path::Path) -> Error {
    match err.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
        std::io::ErrorKind::PermissionDenied => Error::AccessDenied(path.display().to_string()),
        _ => Error::Io(err),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
