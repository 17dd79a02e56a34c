//! Local error type for the hot paths (reactor iteration, socket setup)
//! that need to distinguish fatal, recoverable, and silently-dropped
//! outcomes without paying for a boxed trait object on every packet.
//! Bootstrap and top-level `main` wiring use `anyhow` instead, since those
//! paths run once and don't need the distinction.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Message(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Message(m) => write!(f, "{m}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
