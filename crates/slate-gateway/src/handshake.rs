//! The fixed opening exchange.
//!
//! Every connection starts the same way, peer-initiated:
//!
//! 1. peer: `select(target)`, naming a backend (new session) or a live
//!    session id (join)
//! 2. gateway: `args(name, ...)`, the recognized settings for that backend
//! 3. peer: `size(w, h, dpi)`, any of `audio`/`video`/`image` mimetype
//!    lists, then `connect(value, ...)` matching the advertised names
//! 4. gateway: `ready(session-id)`, followed for joiners by the replay of
//!    current session state
//!
//! Any deviation aborts the handshake; the supervisor reports it with an
//! `error` + `disconnect` pair and no session state survives.

use std::time::Duration;

use slate_core::{Opcode, Parser, WireRead, WireSocket, emit};

use crate::error::GatewayError;

/// Everything a peer declares before `connect` completes the exchange.
#[derive(Debug, Default)]
pub struct ClientHello {
    /// Optimal display width, height, and DPI.
    pub width: i32,
    /// See `width`.
    pub height: i32,
    /// Requested resolution, dots per inch.
    pub dpi: i32,
    /// Supported audio mimetypes.
    pub audio: Vec<String>,
    /// Supported video mimetypes.
    pub video: Vec<String>,
    /// Supported image mimetypes.
    pub image: Vec<String>,
    /// Positional values for the advertised argument names.
    pub values: Vec<String>,
}

/// Reads the opening `select` and returns its target.
///
/// # Errors
///
/// [`GatewayError::Handshake`] if the first instruction is not a well-formed
/// `select`; wire errors pass through.
pub fn read_select(
    parser: &mut Parser,
    reader: &mut dyn WireRead,
    timeout: Duration,
) -> Result<String, GatewayError> {
    let instruction = parser.read(reader, timeout)?;
    if instruction.opcode() != Opcode::Select.name() {
        return Err(GatewayError::Handshake(format!(
            "expected select, got {:?}",
            instruction.opcode()
        )));
    }
    match instruction.args() {
        [target] if !target.is_empty() => Ok((*target).to_owned()),
        _ => Err(GatewayError::Handshake(
            "select requires exactly one non-empty target".to_owned(),
        )),
    }
}

/// Advertises `names` and collects the peer's declarations through
/// `connect`.
///
/// # Errors
///
/// [`GatewayError::Handshake`] on any out-of-sequence opcode; wire errors
/// pass through.
pub fn exchange(
    parser: &mut Parser,
    reader: &mut dyn WireRead,
    socket: &WireSocket,
    names: &[&str],
    timeout: Duration,
) -> Result<ClientHello, GatewayError> {
    emit::args(socket, names)?;
    socket.flush()?;

    let mut hello = ClientHello {
        dpi: 96,
        ..ClientHello::default()
    };

    loop {
        let instruction = parser.read(reader, timeout)?;
        match Opcode::from_name(instruction.opcode()) {
            Some(Opcode::Size) => {
                hello.width = instruction.int_arg(0).ok_or_else(bad_size)? as i32;
                hello.height = instruction.int_arg(1).ok_or_else(bad_size)? as i32;
                if let Some(dpi) = instruction.int_arg(2) {
                    hello.dpi = dpi as i32;
                }
            }
            Some(Opcode::Audio) => {
                hello.audio = owned(instruction.args());
            }
            Some(Opcode::Video) => {
                hello.video = owned(instruction.args());
            }
            Some(Opcode::Image) => {
                hello.image = owned(instruction.args());
            }
            Some(Opcode::Connect) => {
                hello.values = owned(instruction.args());
                return Ok(hello);
            }
            _ => {
                return Err(GatewayError::Handshake(format!(
                    "unexpected {:?} during handshake",
                    instruction.opcode()
                )));
            }
        }
    }
}

fn bad_size() -> GatewayError {
    GatewayError::Handshake("malformed size".to_owned())
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|&s| s.to_owned()).collect()
}
