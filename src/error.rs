//! Error types for the server.
//!
//! Errors fall into two classes. Per-connection failures stay inside the
//! connection handler that produced them. Failures that compromise the
//! shared log or the listening socket are fatal and end the process.

use std::io;
use std::path::PathBuf;

/// The file operation that failed on the shared log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOp {
    Open,
    Append,
    Seek,
    Read,
}

impl std::fmt::Display for LogOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogOp::Open => write!(f, "open"),
            LogOp::Append => write!(f, "append to"),
            LogOp::Seek => write!(f, "seek in"),
            LogOp::Read => write!(f, "read"),
        }
    }
}

/// Server errors
#[derive(Debug)]
pub enum Error {
    /// Could not set up the listening socket.
    Bind(String, io::Error),
    /// A file operation on the shared log failed.
    Log {
        op: LogOp,
        path: PathBuf,
        source: io::Error,
    },
    /// The client stopped accepting the log dump.
    ClientGone(io::Error),
    /// Any other socket or process-level I/O failure.
    Io(io::Error),
}

impl Error {
    pub(crate) fn log(op: LogOp, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Log {
            op,
            path: path.into(),
            source,
        }
    }

    /// Whether this error compromises the whole server rather than one connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Bind(..) | Error::Log { .. })
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Bind(addr, e) => write!(f, "Failed to bind '{}': {}", addr, e),
            Error::Log { op, path, source } => {
                write!(f, "Failed to {} log file '{}': {}", op, path.display(), source)
            }
            Error::ClientGone(e) => write!(f, "Client went away during dump: {}", e),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Bind(_, e) | Error::ClientGone(e) | Error::Io(e) => Some(e),
            Error::Log { source, .. } => Some(source),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
