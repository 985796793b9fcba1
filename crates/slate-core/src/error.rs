//! Error types for the slate wire protocol.

use thiserror::Error;

/// Errors surfaced by socket reads, writes, and instruction parsing.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,

    /// No complete instruction arrived within the allowed time. The parser
    /// keeps its partial state; the caller may retry the read.
    #[error("read timed out")]
    Timeout,

    /// Underlying transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The inbound byte stream violated the instruction grammar.
    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),
}

impl WireError {
    /// Whether the error is an orderly close rather than a fault.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Violations of the instruction grammar. All parse errors are terminal for
/// the parser that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A length prefix contained a byte that is neither a digit nor `.`.
    #[error("invalid length prefix byte: 0x{0:02x}")]
    BadLengthByte(u8),

    /// A length prefix ran past the 5-digit cap.
    #[error("length prefix exceeds 5 digits")]
    LengthTooLong,

    /// An element ended with a byte other than `,` or `;`.
    #[error("invalid element terminator: 0x{0:02x}")]
    BadTerminator(u8),

    /// The instruction ran past the 8192-byte cap.
    #[error("instruction exceeds 8192 bytes")]
    InstructionOverrun,

    /// The instruction carried more than 128 elements.
    #[error("instruction exceeds 128 elements")]
    TooManyElements,

    /// An element's content was not valid UTF-8.
    #[error("element is not valid utf-8")]
    InvalidUtf8,
}
