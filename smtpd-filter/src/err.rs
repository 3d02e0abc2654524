use std::fmt;
use std::io;
use std::process;

use thiserror::Error;

/// All library errors are carried by this type.
///
/// Protocol errors mean the host and the filter have lost lock-step and
/// are not recoverable; `run` returns them so the embedding program can
/// decide how to die. Usage errors are programming mistakes in the
/// filter itself (double registration, out-of-range verdict codes).
#[derive(Debug, Error)]
pub enum Error {
    /// A line from the host could not be parsed. Carries the full
    /// original line for diagnostics.
    #[error("Invalid line received: {reason}: {line}")]
    Parse { reason: String, line: String },

    /// The host speaks a protocol major version we do not know.
    #[error("Unsupported protocol received: {line}")]
    UnsupportedProtocol { line: String },

    /// A callback was already attached to this event.
    #[error("Event already registered")]
    AlreadyRegistered,

    /// The (kind, phase, direction) triple is not a protocol event.
    #[error("Trying to register unknown event")]
    UnknownEvent,

    /// `run` was entered without a single callback registered.
    #[error("No events registered")]
    NoEvents,

    /// Reject codes must lie in 200..=599.
    #[error("Invalid reject code {0}")]
    RejectCode(u16),

    /// An enhanced status field was out of range.
    #[error("Invalid enhanced status {field} {value}")]
    EnhancedStatus { field: &'static str, value: u16 },

    /// An error raised by filter code from inside a callback.
    #[error("{0}")]
    Filter(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wrap a message from filter code so it can be returned from a
    /// callback.
    pub fn filter(msg: impl Into<String>) -> Self {
        Error::Filter(msg.into())
    }

    pub(crate) fn parse(reason: impl Into<String>, line: &str) -> Self {
        Error::Parse {
            reason: reason.into(),
            line: line.to_string(),
        }
    }

    pub(crate) fn unsupported(line: &str) -> Self {
        Error::UnsupportedProtocol {
            line: line.to_string(),
        }
    }
}

/// Report a fatal condition and exit the filter process.
pub fn fatal(msg: impl fmt::Display) -> ! {
    eprintln!("{msg}");
    process::exit(1);
}

/// Like [`fatal`], appending the description of the current OS error.
pub fn fatal_sys(msg: impl fmt::Display) -> ! {
    eprintln!("{msg}: {}", io::Error::last_os_error());
    process::exit(1);
}
