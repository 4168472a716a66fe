use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::panic::Location;

/// Discriminant for the ways a BZip2 stream can fail to decode.
///
/// Maps directly onto the exit codes a CLI wrapper around this crate would use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stream or block magic did not match; this is not a BZip2 stream.
    NotBzipData,
    /// Byte source was exhausted before a value we needed to read was complete.
    UnexpectedInputEof,
    /// Byte sink accepted fewer bytes than requested.
    UnexpectedOutputEof,
    /// A structural constraint of the format was violated (bad CRC, out-of-range
    /// index, oversized run, malformed Huffman tables, ...).
    DataError,
    /// Allocating a buffer sized from the stream header failed.
    OutOfMemory,
    /// Block used the obsolete randomized mode.
    ObsoleteInput,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotBzipData => "not a bzip2 stream",
            ErrorKind::UnexpectedInputEof => "unexpected end of input",
            ErrorKind::UnexpectedOutputEof => "unexpected end of output",
            ErrorKind::DataError => "data error",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::ObsoleteInput => "obsolete randomized block",
        };
        f.write_str(s)
    }
}

/// Maps an `ErrorKind` to the integer status codes a CLI wrapper would return.
pub fn status_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::NotBzipData => -2,
        ErrorKind::UnexpectedInputEof => -3,
        ErrorKind::UnexpectedOutputEof => -4,
        ErrorKind::DataError => -5,
        ErrorKind::OutOfMemory => -6,
        ErrorKind::ObsoleteInput => -7,
    }
}

/// Maps a decode result to the exit-status convention: 0 on success, a negative
/// code identifying the failure otherwise.
pub fn exit_status(result: &Res<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => status_code(e.kind),
    }
}

#[derive(Debug)]
pub struct BzError {
    pub kind: ErrorKind,
    pub message: Option<String>,
    pub context: Option<String>,
    pub source: Option<Box<dyn Error + Send + Sync>>,
    pub location: &'static Location<'static>,
}

pub type Res<T> = Result<T, BzError>;

impl Error for BzError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self.source {
            Some(ref err) => Some(err.deref()),
            None => None,
        }
    }
}

impl Display for BzError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at {}", self.kind, self.location)?;
        if let Some(context) = &self.context {
            write!(f, " ({})", context)?
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?
        }
        if let Some(cause) = &self.source {
            write!(f, "\ncaused by {}", cause)?
        }
        Ok(())
    }
}

impl From<BzError> for std::io::Error {
    fn from(value: BzError) -> Self {
        let kind = match value.kind {
            ErrorKind::UnexpectedInputEof => std::io::ErrorKind::UnexpectedEof,
            ErrorKind::UnexpectedOutputEof => std::io::ErrorKind::WriteZero,
            _ => std::io::ErrorKind::InvalidData,
        };
        std::io::Error::new(kind, value)
    }
}

impl From<ErrorBuilder> for BzError {
    #[track_caller]
    fn from(
        ErrorBuilder {
            kind,
            message,
            context,
            source,
        }: ErrorBuilder,
    ) -> Self {
        let err = Self {
            kind,
            message,
            context,
            source,
            location: Location::caller(),
        };
        log::warn!("{}", err);
        err
    }
}

#[derive(Default)]
pub(crate) struct ErrorBuilder {
    pub kind: ErrorKind,
    pub message: Option<String>,
    pub context: Option<String>,
    pub source: Option<Box<dyn Error + Send + Sync>>,
}

impl Default for ErrorKind {
    fn default() -> Self {
        ErrorKind::DataError
    }
}

pub(crate) trait ResultBuilder<T>: Sized {
    fn message<F: FnOnce(Option<&str>) -> String>(self, msg: F) -> Result<T, ErrorBuilder>;
}

impl<T> ResultBuilder<T> for Result<T, ErrorBuilder> {
    fn message<F: FnOnce(Option<&str>) -> String>(self, msg: F) -> Self {
        match self {
            Ok(v) => Ok(v),
            Err(e) => Err(ErrorBuilder {
                message: Some(msg(e.message.as_deref())),
                ..e
            }),
        }
    }
}

impl<T> ResultBuilder<T> for Option<T> {
    fn message<F: FnOnce(Option<&str>) -> String>(self, msg: F) -> Result<T, ErrorBuilder> {
        match self {
            Some(v) => Ok(v),
            None => Err(ErrorBuilder {
                message: Some(msg(None)),
                ..Default::default()
            }),
        }
    }
}

pub(crate) trait WithContext<T, E: Error, C: ErrorContext> {
    fn at(self, context: &C) -> Result<T, ErrorBuilder>;
}

impl<T, E: Error + 'static + Send + Sync, C: ErrorContext> WithContext<T, E, C> for Result<T, E> {
    fn at(self, context: &C) -> Result<T, ErrorBuilder> {
        self.map_err(|e| ErrorBuilder {
            kind: ErrorKind::UnexpectedInputEof,
            context: context.describe(),
            source: Some(Box::new(e)),
            ..Default::default()
        })
    }
}

pub(crate) trait ErrorContext {
    fn describe(&self) -> Option<String> {
        None
    }

    fn raise<T>(&self, kind: ErrorKind, msg: String) -> Result<T, ErrorBuilder> {
        Err(ErrorBuilder {
            kind,
            message: Some(msg),
            context: self.describe(),
            ..Default::default()
        })
    }

    fn data_error<T>(&self, msg: String) -> Result<T, ErrorBuilder> {
        self.raise(ErrorKind::DataError, msg)
    }

    fn assert(&self, v: bool, kind: ErrorKind, msg: &str) -> Result<(), ErrorBuilder> {
        if v {
            Ok(())
        } else {
            self.raise(kind, msg.into())
        }
    }

    fn assert_data<T: PartialOrd + Display>(&self, l: T, r: T, what: &str) -> Result<(), ErrorBuilder> {
        if l == r {
            Ok(())
        } else {
            self.raise(
                ErrorKind::DataError,
                format!("Expected {} == {} ({})", l, r, what),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;
    impl ErrorContext for Dummy {
        fn describe(&self) -> Option<String> {
            Some("dummy".into())
        }
    }

    #[test_log::test]
    fn status_codes_match_table() {
        assert_eq!(status_code(ErrorKind::NotBzipData), -2);
        assert_eq!(status_code(ErrorKind::UnexpectedInputEof), -3);
        assert_eq!(status_code(ErrorKind::UnexpectedOutputEof), -4);
        assert_eq!(status_code(ErrorKind::DataError), -5);
        assert_eq!(status_code(ErrorKind::OutOfMemory), -6);
        assert_eq!(status_code(ErrorKind::ObsoleteInput), -7);
    }

    #[test_log::test]
    fn exit_status_ok_is_zero() {
        assert_eq!(exit_status(&Ok(())), 0);
    }

    #[test_log::test]
    fn raise_carries_context_and_kind() {
        let d = Dummy;
        let err: BzError = d
            .raise::<()>(ErrorKind::ObsoleteInput, "randomized block".into())
            .unwrap_err()
            .into();
        assert_eq!(err.kind, ErrorKind::ObsoleteInput);
        assert_eq!(err.context.as_deref(), Some("dummy"));
    }
}
