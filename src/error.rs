//! Crate-wide error kinds
//!
//! Local library calls return these to the caller; replicated (exec)
//! message handlers never propagate them — a malformed or unrecognized
//! message is logged and dropped so the ring's collective state machine
//! keeps moving (see module docs on `dispatch`).

use thiserror::Error;

/// Result type used throughout the crate's library-call surface.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error kinds returned to library callers.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Generic library-call failure not covered by a more specific kind.
    #[error("library error")]
    Library,

    /// Library version mismatch between caller and core.
    #[error("version mismatch")]
    Version,

    /// Engine or context failed to initialize.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// Caller should retry; a prior operation is still in flight.
    #[error("try again")]
    TryAgain,

    /// A parameter failed validation.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// Allocation failed (zero-copy region, handle table growth).
    #[error("out of memory")]
    NoMemory,

    /// Handle does not refer to a live object.
    #[error("bad handle")]
    BadHandle,

    /// Caller's connection/descriptor is in a state that forbids this call.
    #[error("busy")]
    Busy,

    /// Operation forbidden by configuration or read-only protection.
    #[error("access denied")]
    Access,

    /// Referenced node, tracker, key or group does not exist.
    #[error("not found: {0}")]
    NotExist(String),

    /// A supplied name exceeded its maximum length.
    #[error("name too long")]
    NameTooLong,

    /// The thing being created already exists.
    #[error("already exists: {0}")]
    Exist(String),

    /// An in-flight multi-part operation was interrupted by a ring change.
    #[error("interrupted")]
    Interrupt,

    /// A config-map iteration found no sections under the given prefix.
    #[error("no sections")]
    NoSections,

    /// A received message failed structural or ring-id validation.
    #[error("message error: {0}")]
    MessageError(String),

    /// A bounded queue (e.g. scheduled-work or tracker backlog) is full.
    #[error("queue full")]
    QueueFull,

    /// A flags combination is not valid for this call.
    #[error("bad flags")]
    BadFlags,

    /// A payload exceeded the maximum frame size.
    #[error("too big")]
    TooBig,

    /// Operation denied by a security policy.
    #[error("security")]
    Security,

    /// Wire (de)serialization failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    /// Persisted-state I/O failure (ev_tracking_barrier file, config file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
