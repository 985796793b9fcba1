//! Streaming base64 for binary instruction payloads.
//!
//! Binary data embedded in a `blob` instruction is base64-encoded on the
//! wire. The encoder is stateful so a payload can be streamed through the
//! socket in arbitrary chunks: it emits one four-character quantum per three
//! input bytes and carries at most two residual bytes between writes.

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Stateful three-in/four-out base64 encoder.
#[derive(Debug, Default)]
pub struct Base64Encoder {
    carry: [u8; 3],
    carry_len: usize,
}

impl Base64Encoder {
    /// Creates an encoder with no residue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of base64 characters produced for a payload of `n` bytes,
    /// padding included.
    #[must_use]
    pub fn encoded_len(n: usize) -> usize {
        n.div_ceil(3) * 4
    }

    /// Encodes `input`, appending complete four-character quanta to `out`.
    /// Up to two trailing input bytes are held back until the next `write`
    /// or [`finish`](Self::finish).
    pub fn write(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for &byte in input {
            self.carry[self.carry_len] = byte;
            self.carry_len += 1;
            if self.carry_len == 3 {
                let [a, b, c] = self.carry;
                out.push(ALPHABET[(a >> 2) as usize]);
                out.push(ALPHABET[((a << 4 | b >> 4) & 0x3F) as usize]);
                out.push(ALPHABET[((b << 2 | c >> 6) & 0x3F) as usize]);
                out.push(ALPHABET[(c & 0x3F) as usize]);
                self.carry_len = 0;
            }
        }
    }

    /// Emits the final quantum with `=` padding for a residue of one or two
    /// bytes; emits nothing for an empty residue. Resets the encoder.
    pub fn finish(&mut self, out: &mut Vec<u8>) {
        let [a, b, _] = self.carry;
        match self.carry_len {
            1 => {
                out.push(ALPHABET[(a >> 2) as usize]);
                out.push(ALPHABET[((a << 4) & 0x3F) as usize]);
                out.push(b'=');
                out.push(b'=');
            }
            2 => {
                out.push(ALPHABET[(a >> 2) as usize]);
                out.push(ALPHABET[((a << 4 | b >> 4) & 0x3F) as usize]);
                out.push(ALPHABET[((b << 2) & 0x3F) as usize]);
                out.push(b'=');
            }
            _ => {}
        }
        self.carry = [0; 3];
        self.carry_len = 0;
    }
}

/// Value of one base64 character. Unknown characters decode as 0; see
/// [`decode_in_place`].
fn symbol_value(c: u8) -> u8 {
    match c {
        b'A'..=b'Z' => c - b'A',
        b'a'..=b'z' => c - b'a' + 26,
        b'0'..=b'9' => c - b'0' + 52,
        b'+' => 62,
        b'/' => 63,
        _ => 0,
    }
}

/// Decodes a base64 buffer in place, returning the number of decoded bytes.
///
/// Decoding stops at the first `=` padding character or at the end of the
/// buffer. Characters outside the standard alphabet are not rejected; they
/// decode as value 0, matching the historical behavior of this wire format.
pub fn decode_in_place(buf: &mut [u8]) -> usize {
    let mut written = 0;
    let mut value: u32 = 0;
    let mut bits = 0u32;

    for i in 0..buf.len() {
        let c = buf[i];
        if c == b'=' {
            break;
        }
        value = (value << 6) | u32::from(symbol_value(c));
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            buf[written] = ((value >> bits) & 0xFF) as u8;
            written += 1;
        }
    }

    written
}
