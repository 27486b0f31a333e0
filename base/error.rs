// This file is part of wavevault, a scheduled internet-radio recorder.
// Copyright (C) 2026 The wavevault contributors.

//! A single error type used across the whole workspace.
//!
//! Every fallible operation — configuration loading, recurrence parsing,
//! network fetches, sink writes — produces an [`Error`] tagged with an
//! [`ErrorKind`], so callers can match on the kind instead of downcasting a
//! grab-bag of heterogeneous error types.

use std::fmt;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    msg: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(
        kind: ErrorKind,
        msg: Option<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Error { kind, msg, source }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns a `Display`-able value that prints this error followed by its
    /// chain of sources, one per line.
    pub fn chain(&self) -> Chain<'_> {
        Chain(self)
    }
}

pub struct Chain<'a>(&'a Error);

impl fmt::Display for Chain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut cause = self.0.source.as_deref().and_then(std::error::Error::source);
        if self.0.source.is_none() {
            return Ok(());
        }
        write!(f, "\ncaused by: {}", self.0.source.as_ref().unwrap())?;
        while let Some(c) = cause {
            write!(f, "\ncaused by: {c}")?;
            cause = c.source();
        }
        Ok(())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.msg {
            Some(m) => write!(f, "{}: {}", self.kind, m),
            None => match &self.source {
                Some(s) => write!(f, "{}: {}", self.kind, s),
                None => fmt::Display::fmt(&self.kind, f),
            },
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error { kind, msg: None, source: None }
    }
}

/// Error kind.
///
/// These codes are taken from
/// [grpc::StatusCode](https://github.com/grpc/grpc/blob/0e00c430827e81d61e1e7164ef04ca21ccbfaa77/include/grpcpp/impl/codegen/status_code_enum.h),
/// which is a nice general-purpose classification of errors, generalized here
/// to this system's own sources of failure (configuration, recurrence
/// parsing, network, sinks).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[non_exhaustive]
#[rustfmt::skip]
pub enum ErrorKind {
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Unknown => "Unknown",
            ErrorKind::InvalidArgument => "Invalid argument",
            ErrorKind::DeadlineExceeded => "Deadline exceeded",
            ErrorKind::NotFound => "Not found",
            ErrorKind::AlreadyExists => "Already exists",
            ErrorKind::PermissionDenied => "Permission denied",
            ErrorKind::Unauthenticated => "Unauthenticated",
            ErrorKind::ResourceExhausted => "Resource exhausted",
            ErrorKind::FailedPrecondition => "Failed precondition",
            ErrorKind::Aborted => "Aborted",
            ErrorKind::OutOfRange => "Out of range",
            ErrorKind::Unimplemented => "Unimplemented",
            ErrorKind::Internal => "Internal",
            ErrorKind::Unavailable => "Unavailable",
            ErrorKind::DataLoss => "Data loss",
        })
    }
}

/// Extension methods for `Result`.
pub trait ResultExt<T> {
    /// Annotates an error with the given kind, boxing the original error as
    /// the new `Error`'s source.
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| Error::new(k, None, Some(Box::new(e))))
    }
}

/// Builds an [`Error`] value without returning from the enclosing function.
///
/// ```ignore
/// let e = err!(NotFound, msg("no such station {}", name));
/// let e = err!(Internal, source(io_err));
/// let e = err!(Internal, msg("while flushing"), source(io_err));
/// ```
#[macro_export]
macro_rules! err {
    ($kind:ident, msg($($fmt:tt)+), source($src:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind, Some(format!($($fmt)+)), Some(Box::new($src)))
    };
    ($kind:ident, msg($($fmt:tt)+)) => {
        $crate::Error::new($crate::ErrorKind::$kind, Some(format!($($fmt)+)), None)
    };
    ($kind:ident, source($src:expr)) => {
        $crate::Error::new($crate::ErrorKind::$kind, None, Some(Box::new($src)))
    };
    ($kind:ident) => {
        $crate::Error::new($crate::ErrorKind::$kind, None, None)
    };
}

/// Like [`err!`], but returns the built error from the enclosing function.
#[macro_export]
macro_rules! bail {
    ($($args:tt)+) => {
        return Err($crate::err!($($args)+))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_with_msg() {
        let e: Error = err!(NotFound, msg("no such station {}", "wdr5"));
        assert_eq!(e.to_string(), "Not found: no such station wdr5");
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn display_bare_kind() {
        let e: Error = ErrorKind::Internal.into();
        assert_eq!(e.to_string(), "Internal");
    }

    #[test]
    fn bail_returns() {
        fn f() -> Result<(), Error> {
            bail!(Unavailable, msg("down"));
        }
        assert_eq!(f().unwrap_err().kind(), ErrorKind::Unavailable);
    }
}
