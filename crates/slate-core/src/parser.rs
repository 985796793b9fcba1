//! Incremental instruction parser.
//!
//! The parser consumes bytes from a [`WireRead`] half as they arrive and
//! yields one complete instruction at a time. It is a small automaton:
//!
//! - `Length`: accumulating decimal digits of an element's code-point count;
//!   `.` commits the length
//! - `Content`: reading exactly that many code points, then a `,` (next
//!   element) or `;` (instruction complete)
//! - `Complete`: a full instruction is available until the next read
//! - `Failed`: a grammar violation; terminal
//!
//! Bytes are buffered in a fixed 32 KiB buffer; completed elements are
//! exposed as string slices into that buffer, so nothing is copied on the
//! read path. A timeout mid-instruction preserves all parser state and the
//! read may simply be retried.

use std::time::{Duration, Instant};

use crate::error::{ParseError, WireError};
use crate::socket::WireRead;
use crate::unicode;
use crate::{MAX_ELEMENTS, MAX_INSTRUCTION_BYTES, MAX_LENGTH_DIGITS, PARSE_BUFFER_BYTES};

#[derive(Debug, Clone, Copy)]
enum State {
    Length { value: usize, digits: usize },
    Content { remaining: usize },
    Complete,
    Failed(ParseError),
}

/// One parsed instruction, borrowed from the parser's buffer.
#[derive(Debug)]
pub struct Instruction<'a> {
    opcode: &'a str,
    args: Vec<&'a str>,
}

impl<'a> Instruction<'a> {
    /// The instruction's first element.
    #[must_use]
    pub fn opcode(&self) -> &'a str {
        self.opcode
    }

    /// All elements after the opcode.
    #[must_use]
    pub fn args(&self) -> &[&'a str] {
        &self.args
    }

    /// The `index`th argument, if present.
    #[must_use]
    pub fn arg(&self, index: usize) -> Option<&'a str> {
        self.args.get(index).copied()
    }

    /// The `index`th argument parsed as a decimal integer.
    #[must_use]
    pub fn int_arg(&self, index: usize) -> Option<i64> {
        self.arg(index)?.parse().ok()
    }
}

/// Incremental parser over a fixed instruction buffer.
pub struct Parser {
    buf: Box<[u8]>,
    /// Start of the current in-progress instruction.
    unparsed_start: usize,
    /// End of buffered bytes.
    unparsed_end: usize,
    /// Parse position within the buffered region.
    cursor: usize,
    state: State,
    element_start: usize,
    /// Byte ranges of completed elements, opcode first.
    elements: Vec<(usize, usize)>,
    /// Bytes consumed by the current instruction, delimiters included.
    instr_bytes: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Creates an empty parser.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buf: vec![0; PARSE_BUFFER_BYTES].into_boxed_slice(),
            unparsed_start: 0,
            unparsed_end: 0,
            cursor: 0,
            state: State::Length { value: 0, digits: 0 },
            element_start: 0,
            elements: Vec::with_capacity(16),
            instr_bytes: 0,
        }
    }

    /// Reads one instruction, pulling bytes from `source` as needed.
    ///
    /// Already-buffered bytes are consumed before the socket is touched, so
    /// concatenated instructions parse without further reads. The previous
    /// instruction (if any) is released by this call.
    ///
    /// # Errors
    ///
    /// [`WireError::Timeout`] if no complete instruction arrived within
    /// `timeout` (parser state is preserved; retry is safe),
    /// [`WireError::Parse`] on a grammar violation (terminal), and
    /// [`WireError::Closed`]/[`WireError::Io`] from the transport.
    pub fn read(
        &mut self,
        source: &mut dyn WireRead,
        timeout: Duration,
    ) -> Result<Instruction<'_>, WireError> {
        self.release_complete();

        let deadline = Instant::now() + timeout;
        loop {
            if self.advance()? {
                break;
            }

            // Starved: make room, then pull more bytes with whatever time
            // remains.
            if self.unparsed_end == self.buf.len() {
                if self.unparsed_start == 0 {
                    return Err(self.fail(ParseError::InstructionOverrun).into());
                }
                self.compact();
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(WireError::Timeout);
            }
            let n = source.read_some(&mut self.buf[self.unparsed_end..], remaining)?;
            self.unparsed_end += n;
        }

        Ok(self.current().expect("state is Complete"))
    }

    /// The most recently parsed instruction, if one is pending.
    #[must_use]
    pub fn current(&self) -> Option<Instruction<'_>> {
        if !matches!(self.state, State::Complete) {
            return None;
        }
        let mut slices = self.elements.iter().map(|&(start, end)| {
            // Validated during parsing; empty on the impossible path.
            std::str::from_utf8(&self.buf[start..end]).unwrap_or_default()
        });
        let opcode = slices.next()?;
        Some(Instruction {
            opcode,
            args: slices.collect(),
        })
    }

    /// Drops a completed instruction and prepares for the next one.
    fn release_complete(&mut self) {
        if matches!(self.state, State::Complete) {
            self.unparsed_start = self.cursor;
            self.elements.clear();
            self.instr_bytes = 0;
            self.state = State::Length { value: 0, digits: 0 };

            // Reclaim the consumed prefix before it crowds out the next
            // instruction.
            if self.unparsed_start > self.buf.len() / 2 {
                self.compact();
            }
        }
    }

    fn fail(&mut self, error: ParseError) -> ParseError {
        tracing::debug!(%error, "parser entering terminal error state");
        self.state = State::Failed(error);
        error
    }

    /// Advances the automaton over buffered bytes. Returns `Ok(true)` once a
    /// full instruction is parsed, `Ok(false)` when starved for input.
    fn advance(&mut self) -> Result<bool, ParseError> {
        loop {
            match self.state {
                State::Failed(error) => return Err(error),
                State::Complete => return Ok(true),

                State::Length { value, digits } => {
                    if self.cursor == self.unparsed_end {
                        return Ok(false);
                    }
                    let byte = self.buf[self.cursor];
                    self.cursor += 1;
                    self.consume(1)?;

                    match byte {
                        b'0'..=b'9' => {
                            if digits == MAX_LENGTH_DIGITS {
                                return Err(self.fail(ParseError::LengthTooLong));
                            }
                            self.state = State::Length {
                                value: value * 10 + usize::from(byte - b'0'),
                                digits: digits + 1,
                            };
                        }
                        b'.' if digits > 0 => {
                            // Every code point is at least one byte, so the
                            // element cannot fit if the count alone exceeds
                            // what is left of the instruction budget.
                            if value > MAX_INSTRUCTION_BYTES - self.instr_bytes {
                                return Err(self.fail(ParseError::InstructionOverrun));
                            }
                            self.element_start = self.cursor;
                            self.state = State::Content { remaining: value };
                        }
                        other => return Err(self.fail(ParseError::BadLengthByte(other))),
                    }
                }

                State::Content { remaining } => {
                    if remaining > 0 {
                        if self.cursor == self.unparsed_end {
                            return Ok(false);
                        }
                        let width = unicode::sequence_len(self.buf[self.cursor]);
                        if self.cursor + width > self.unparsed_end {
                            // Partial code point; wait for the rest.
                            return Ok(false);
                        }
                        self.cursor += width;
                        self.consume(width)?;
                        self.state = State::Content {
                            remaining: remaining - 1,
                        };
                    } else {
                        if self.cursor == self.unparsed_end {
                            return Ok(false);
                        }

                        let content = &self.buf[self.element_start..self.cursor];
                        if std::str::from_utf8(content).is_err() {
                            return Err(self.fail(ParseError::InvalidUtf8));
                        }

                        let terminator = self.buf[self.cursor];
                        self.cursor += 1;
                        self.consume(1)?;
                        self.elements.push((self.element_start, self.cursor - 1));

                        match terminator {
                            b',' => {
                                if self.elements.len() == MAX_ELEMENTS {
                                    return Err(self.fail(ParseError::TooManyElements));
                                }
                                self.state = State::Length { value: 0, digits: 0 };
                            }
                            b';' => {
                                self.state = State::Complete;
                                return Ok(true);
                            }
                            other => return Err(self.fail(ParseError::BadTerminator(other))),
                        }
                    }
                }
            }
        }
    }

    /// Accounts `n` consumed bytes against the instruction budget.
    fn consume(&mut self, n: usize) -> Result<(), ParseError> {
        self.instr_bytes += n;
        if self.instr_bytes > MAX_INSTRUCTION_BYTES {
            return Err(self.fail(ParseError::InstructionOverrun));
        }
        Ok(())
    }

    /// Shifts the in-progress instruction to the front of the buffer.
    fn compact(&mut self) {
        let offset = self.unparsed_start;
        if offset == 0 {
            return;
        }
        self.buf.copy_within(offset..self.unparsed_end, 0);
        self.unparsed_start = 0;
        self.unparsed_end -= offset;
        self.cursor -= offset;
        self.element_start = self.element_start.saturating_sub(offset);
        for range in &mut self.elements {
            range.0 -= offset;
            range.1 -= offset;
        }
    }
}
