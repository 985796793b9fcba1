//! # Slate Core
//!
//! Core wire protocol for the slate remote-desktop gateway.
//!
//! The protocol is a stream of *instructions*: each instruction is an ordered
//! sequence of length-prefixed UTF-8 strings ("elements"), where the first
//! element names the operation. On the wire an instruction looks like
//!
//! ```text
//! 5.mouse,3.100,2.50,1.1,13.1700000000000;
//! ```
//!
//! Length prefixes count Unicode code points, not bytes, and instructions may
//! be concatenated with no separator. This crate provides:
//!
//! - **Byte socket**: buffered, mutex-bracketed write half so concurrent
//!   emitters produce whole instructions ([`socket`])
//! - **Incremental parser**: consumes bytes as they arrive and yields one
//!   instruction at a time ([`parser`])
//! - **Typed emitters**: one function per instruction kind ([`emit`])
//! - **Streaming base64**: sub-encoder for binary blobs embedded in
//!   instructions ([`base64`])
//! - **Status codes**: the numeric error taxonomy carried by `ack` and
//!   `error` instructions ([`status`])
//!
//! ## Module Structure
//!
//! - [`socket`]: transport seam and the buffered instruction socket
//! - [`parser`]: the `Length -> Content -> Complete` instruction automaton
//! - [`emit`]: typed instruction emitters
//! - [`base64`]: streaming encoder and in-place decoder
//! - [`unicode`]: code-point length accounting for prefixes
//! - [`instruction`]: the opcode sum type
//! - [`status`]: on-wire status codes
//! - [`error`]: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod base64;
pub mod emit;
pub mod error;
pub mod instruction;
pub mod parser;
pub mod socket;
pub mod status;
pub mod unicode;

pub use error::{ParseError, WireError};
pub use instruction::Opcode;
pub use parser::{Instruction, Parser};
pub use socket::{InstructionWriter, WireRead, WireSocket, WireWrite};
pub use status::Status;

/// Maximum serialized size of a single instruction, in bytes.
pub const MAX_INSTRUCTION_BYTES: usize = 8192;

/// Maximum number of elements per instruction, including the opcode.
pub const MAX_ELEMENTS: usize = 128;

/// Maximum number of decimal digits per element length prefix.
pub const MAX_LENGTH_DIGITS: usize = 5;

/// Size of the parser's internal instruction buffer.
pub const PARSE_BUFFER_BYTES: usize = 32768;
