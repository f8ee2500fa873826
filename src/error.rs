//! Errors raised by the layout engines.

use thiserror::Error;

/// Errors that can occur when sizing, serializing, deserializing, or
/// classifying data against a layout.
///
/// Failures originating inside a named item are rewrapped in [Error::Field]
/// with the item's name, so callers can locate the offending field in a
/// nested layout from the error message alone.
#[derive(Error, Debug)]
pub enum Error {
    /// A read would pass the end of the buffer.
    #[error("truncated buffer")]
    Truncated,

    /// Deserialization finished with bytes left over.
    #[error("excess bytes: {0} remaining")]
    ExcessBytes(usize),

    /// Serialization wrote fewer bytes than the size pass computed.
    #[error("under-write: computed {expected}, wrote {written}")]
    UnderWrite { expected: usize, written: usize },

    /// A declared size disagrees with the observed size.
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// A numeric value does not fit the item's width, is not an integer, or
    /// violates the item's signedness.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// An equality check against a layout constant failed.
    #[error("constant mismatch: {0}")]
    ConstantMismatch(String),

    /// A switch discriminant (a wire id, or a user label on the serialize
    /// side) has no matching branch.
    #[error("unknown switch id: {0}")]
    UnknownSwitchId(String),

    /// A named item is absent from the supplied data.
    #[error("unknown field: {0}")]
    UnknownField(String),

    /// The size pass needed data that was not supplied.
    #[error("incomplete data: {0}")]
    IncompleteData(&'static str),

    /// The layout violates one of the model invariants.
    #[error("malformed layout: {0}")]
    MalformedLayout(&'static str),

    /// A user conversion failed.
    #[error("conversion failed: {0}")]
    Conversion(String),

    /// A failure inside the named item.
    #[error("{name}: {source}")]
    Field {
        name: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wraps this error with the name of the item it occurred in.
    pub fn named(self, name: &str) -> Self {
        Error::Field {
            name: name.to_string(),
            source: Box::new(self),
        }
    }

    /// The innermost error, unwrapping any [Error::Field] layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Field { source, .. } => source.root(),
            other => other,
        }
    }
}
