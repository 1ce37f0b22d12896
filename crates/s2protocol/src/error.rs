use s2protocol_buffers::BufferError;
use thiserror::Error;

/// Errors raised while decoding a replay substream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The substream ended before the schema was satisfied.
    #[error("unexpected end of input")]
    EndOfInput(#[from] BufferError),

    /// An event stream carried an event id with no descriptor in the
    /// protocol's event table. The stream cannot be re-synchronized past
    /// this point.
    #[error("no event type for event id {0}")]
    UnknownEventId(i64),

    /// A type id pointed outside the protocol's type table.
    #[error("type id {0} out of range")]
    UnknownTypeId(usize),

    /// A decoded value was not the variant the caller requires (e.g. an
    /// event body that is not a struct).
    #[error("expected {expected}")]
    UnexpectedValue {
        /// The variant that was required.
        expected: &'static str,
    },

    /// No protocol is available for the requested base build.
    #[error("unknown base build {0}")]
    UnknownBuild(u32),

    /// No embedded schema parsed successfully, so header decoding has no
    /// protocol to run under.
    #[error("no default protocol available")]
    NoDefaultProtocol,
}
