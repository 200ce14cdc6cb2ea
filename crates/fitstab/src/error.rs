/// All errors that can occur in the table byte-source and codec layers.
///
/// End-of-stream is always reported distinctly from a true I/O failure, and
/// an unsupported operation (e.g. seeking a sequential source) distinctly
/// from both. Degradable conditions (heap fallback, sentinel exhaustion,
/// mapping budget pressure) are logged, not raised.
#[derive(Debug)]
pub enum Error {
    /// A read or seek went past the declared end of the byte region.
    EndOfStream,
    /// The operation is not available on this source or column.
    UnsupportedOperation(&'static str),
    /// A column descriptor is internally inconsistent.
    MalformedDescriptor(&'static str),
    /// A cell value does not match the column it is being encoded into.
    TypeMismatch,
    /// A field's content could not be parsed as its declared type.
    InvalidValue,
    /// An I/O error from the standard library.
    #[cfg(feature = "std")]
    Io(std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::EndOfStream => write!(f, "end of stream"),
            Error::UnsupportedOperation(op) => write!(f, "unsupported operation: {op}"),
            Error::MalformedDescriptor(why) => write!(f, "malformed column descriptor: {why}"),
            Error::TypeMismatch => write!(f, "cell type does not match column type"),
            Error::InvalidValue => write!(f, "invalid field value"),
            #[cfg(feature = "std")]
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(feature = "std")]
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        // An EOF surfaced by the OS layer is still an end-of-stream
        // condition, not an I/O fault.
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::EndOfStream
        } else {
            Error::Io(e)
        }
    }
}
