//! Crate-wide error type.
//!
//! All fallible operations return [`PeriphError`] through the [`Result`]
//! alias. Errors are raised synchronously at the call that detects them and
//! are not retried automatically; retry, where it makes sense, is a caller
//! responsibility. Errors raised inside a spawned thread body are captured on
//! the [`Thread`](crate::sys::thread::Thread) wrapper instead of propagating,
//! so one thread's failure cannot tear down another.

use crate::topology::DeviceId;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, PeriphError>;

/// Errors raised by the arbiter, drivers, poller, and thread wrapper.
#[derive(Debug, Error)]
pub enum PeriphError {
    /// Allocation failure for a thread or stack object.
    #[error("Out of memory: {0}")]
    NoMemory(String),

    /// The requested device index or label has no topology entry.
    #[error("No such device: {0}")]
    NoDev(String),

    /// The device identity is already borrowed elsewhere.
    #[error("Device already in use: {0}")]
    DeviceAlreadyInUse(DeviceId),

    /// A port of the requested device is already occupied by another
    /// borrowed device. Carries the conflicting owner.
    #[error("Port already in use by {0}")]
    PortAlreadyInUse(DeviceId),

    /// A still-running thread was dropped. The thread's call frame aliases
    /// state owned by the wrapper, so this is a programming error.
    #[error("Destroying running thread: {0}")]
    DestroyingRunningThread(String),

    /// Topology table failed to parse or validate.
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    /// I/O error, e.g. while loading a topology file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for unclassified backend or OS failures.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<toml::de::Error> for PeriphError {
    fn from(err: toml::de::Error) -> Self {
        PeriphError::InvalidTopology(err.to_string())
    }
}
