//! Error types shared by every layer of the device model.
//!
//! [Error] is what public operations return. Storage backends report through the narrower
//! [FsError](crate::sysfs::FsError), which converts into [Error] at the registry boundary.
use crate::sysfs::FsError;
use core::fmt::{self, Display};
use std::io;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The node or object is in the wrong lifecycle state for the operation.
    InvalidState,
    /// A required argument was missing or malformed.
    InvalidArgument,
    /// Another entry already occupies this path.
    NameConflict(String),
    /// The path store refused to create the entry.
    PathCreateFailed(FsError),
    /// No ancestor belongs to a container, so there is no event channel.
    NoContainer,
    /// The event environment ran out of slots or bytes.
    EnvOverflow,
    AlreadyBound,
    NotBound,
    /// The object has not been registered yet, or was already unregistered.
    NotRegistered,
    NotFound,
    /// Probes are still in flight.
    Busy,
    AllocationFailure,
    /// The driver declined the device.
    ProbeDeclined,
    /// No helper path is configured, or the helper worker could not be started.
    HelperUnavailable,
    /// Launching the helper program failed.
    HelperSpawn(io::ErrorKind),
    /// A user callback returned a non-zero code.
    Callback(i32),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState => write!(f, "invalid state"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::NameConflict(path) => write!(f, "'{}' already exists", path),
            Error::PathCreateFailed(err) => write!(f, "path creation failed: {}", err),
            Error::NoContainer => write!(f, "no container to report events through"),
            Error::EnvOverflow => write!(f, "event environment overflow"),
            Error::AlreadyBound => write!(f, "device already bound"),
            Error::NotBound => write!(f, "device not bound"),
            Error::NotRegistered => write!(f, "not registered"),
            Error::NotFound => write!(f, "not found"),
            Error::Busy => write!(f, "probes in flight"),
            Error::AllocationFailure => write!(f, "allocation failure"),
            Error::ProbeDeclined => write!(f, "probe declined"),
            Error::HelperUnavailable => write!(f, "uevent helper unavailable"),
            Error::HelperSpawn(kind) => write!(f, "failed to spawn uevent helper: {}", kind),
            Error::Callback(code) => write!(f, "callback failed with code {}", code),
        }
    }
}

impl core::error::Error for Error {}

impl From<FsError> for Error {
    fn from(err: FsError) -> Self {
        match err {
            FsError::AlreadyExists(path) => Error::NameConflict(path),
            FsError::NotFound(_) => Error::NotFound,
            other => Error::PathCreateFailed(other),
        }
    }
}
