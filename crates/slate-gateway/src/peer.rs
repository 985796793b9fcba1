//! One connected endpoint and its input loop.
//!
//! Each peer owns the read half of its connection exclusively; the write
//! half is shared through the session for broadcasts. The input loop parses
//! one instruction at a time and dispatches on the opcode sum: unknown
//! opcodes are tolerated for forward compatibility, malformed arguments
//! abort the peer as a bad request, and a failing handler aborts it as a
//! server error with the offending opcode logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

use slate_core::{Instruction, Opcode, Parser, Status, WireError, WireRead, WireSocket, base64, emit};

use crate::args::ArgBag;
use crate::backend::BackendEvent;
use crate::display::ClipboardData;
use crate::error::GatewayError;
use crate::session::Session;

/// An inbound peer-to-gateway stream being collected.
struct InboundStream {
    mimetype: String,
    data: Vec<u8>,
    /// Set once the peer overran the clipboard cap; the rest is discarded.
    overrun: bool,
}

/// One connected peer.
pub struct Peer {
    id: u64,
    socket: Arc<WireSocket>,
    owner: bool,
    read_only: bool,
    active: AtomicBool,
    last_active: Mutex<Instant>,
    inbound: Mutex<std::collections::HashMap<i64, InboundStream>>,
    args: ArgBag,
}

impl Peer {
    /// Creates a peer record around its shared write half.
    #[must_use]
    pub fn new(id: u64, socket: Arc<WireSocket>, owner: bool, args: ArgBag) -> Self {
        let read_only = args.read_only();
        Self {
            id,
            socket,
            owner,
            read_only,
            active: AtomicBool::new(true),
            last_active: Mutex::new(Instant::now()),
            inbound: Mutex::new(std::collections::HashMap::new()),
            args,
        }
    }

    /// Peer id within its session.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The shared write half.
    #[must_use]
    pub fn socket(&self) -> &WireSocket {
        &self.socket
    }

    /// Whether this peer created the session.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Whether this peer's input is ignored.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether the peer is still participating.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Marks the peer gone; its input loop exits on the next iteration.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// The peer's bound handshake arguments.
    #[must_use]
    pub fn args(&self) -> &ArgBag {
        &self.args
    }

    fn touch(&self) {
        *self.last_active.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> std::time::Duration {
        self.last_active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// Aborts the peer: a courtesy `error` + `disconnect` pair if the socket
    /// is still writable, then deactivation and socket shutdown.
    pub fn abort(&self, status: Status, message: &str) {
        if !self.socket.is_broken() {
            let _ = emit::error(&self.socket, message, status);
            let _ = emit::disconnect(&self.socket);
            let _ = self.socket.flush();
        }
        self.deactivate();
        self.socket.shutdown();
        info!(peer = self.id, code = status.code(), reason = message, "peer aborted");
    }
}

/// Runs a peer's steady-state input loop until the session stops, the peer
/// disconnects, times out, or faults.
pub fn input_loop(
    session: &Arc<Session>,
    peer: &Arc<Peer>,
    parser: &mut Parser,
    reader: &mut dyn WireRead,
) {
    let timeout = session.config().instruction_timeout();
    let idle_limit = session.config().idle_timeout();

    while session.is_running() && peer.is_active() {
        match parser.read(reader, timeout) {
            Ok(instruction) => {
                peer.touch();
                let opcode = instruction.opcode().to_owned();
                if let Err(e) = dispatch(session, peer, &instruction) {
                    warn!(peer = peer.id(), opcode = %opcode, error = %e, "instruction handler failed");
                    let status = if e.status().is_client_error() {
                        e.status()
                    } else {
                        Status::ServerError
                    };
                    peer.abort(status, &e.to_string());
                    return;
                }
            }
            Err(WireError::Timeout) => {
                if peer.idle_for() >= idle_limit {
                    peer.abort(Status::ClientTimeout, "Peer is not responding.");
                    return;
                }
                // Parser state is preserved; keep waiting.
            }
            Err(WireError::Closed) => {
                debug!(peer = peer.id(), "connection closed");
                peer.deactivate();
                return;
            }
            Err(WireError::Parse(e)) => {
                peer.abort(Status::ClientBadRequest, &e.to_string());
                return;
            }
            Err(WireError::Io(e)) => {
                warn!(peer = peer.id(), error = %e, "connection failure");
                peer.deactivate();
                return;
            }
        }
    }
}

fn int_arg(instruction: &Instruction<'_>, index: usize, opcode: &'static str)
    -> Result<i64, GatewayError>
{
    instruction
        .int_arg(index)
        .ok_or(GatewayError::BadInstruction(opcode))
}

/// Handles one parsed instruction.
fn dispatch(
    session: &Arc<Session>,
    peer: &Arc<Peer>,
    instruction: &Instruction<'_>,
) -> Result<(), GatewayError> {
    let Some(opcode) = Opcode::from_name(instruction.opcode()) else {
        debug!(peer = peer.id(), opcode = instruction.opcode(), "ignoring unknown opcode");
        return Ok(());
    };

    match opcode {
        Opcode::Mouse => {
            if peer.is_read_only() {
                return Ok(());
            }
            let x = int_arg(instruction, 0, "mouse")? as i32;
            let y = int_arg(instruction, 1, "mouse")? as i32;
            let button_mask = int_arg(instruction, 2, "mouse")? as i32;
            session.forward_event(BackendEvent::Mouse { x, y, button_mask });
        }

        Opcode::Key => {
            if peer.is_read_only() {
                return Ok(());
            }
            let keysym = int_arg(instruction, 0, "key")? as i32;
            let pressed = int_arg(instruction, 1, "key")? != 0;
            session.forward_event(BackendEvent::Key { keysym, pressed });
        }

        Opcode::Size => {
            if peer.is_read_only() {
                return Ok(());
            }
            let width = int_arg(instruction, 0, "size")? as i32;
            let height = int_arg(instruction, 1, "size")? as i32;
            session.forward_event(BackendEvent::Resize { width, height });
        }

        Opcode::Clipboard => {
            let stream = int_arg(instruction, 0, "clipboard")?;
            let mimetype = instruction
                .arg(1)
                .ok_or(GatewayError::BadInstruction("clipboard"))?;
            if peer.is_read_only() {
                // Refuse rather than silently drop: the peer expects a
                // status for the stream it just opened.
                emit::ack(peer.socket(), stream, "Input is disabled", Status::ClientForbidden)?;
                return Ok(());
            }
            peer.inbound.lock().unwrap_or_else(|e| e.into_inner()).insert(
                stream,
                InboundStream {
                    mimetype: mimetype.to_owned(),
                    data: Vec::new(),
                    overrun: false,
                },
            );
            emit::ack(peer.socket(), stream, "OK", Status::Success)?;
        }

        Opcode::Blob => {
            let stream = int_arg(instruction, 0, "blob")?;
            let payload = instruction
                .arg(1)
                .ok_or(GatewayError::BadInstruction("blob"))?;
            let cap = session.config().clipboard_cap;

            let mut inbound = peer.inbound.lock().unwrap_or_else(|e| e.into_inner());
            let Some(entry) = inbound.get_mut(&stream) else {
                emit::ack(peer.socket(), stream, "No such stream", Status::ResourceClosed)?;
                return Ok(());
            };
            if entry.overrun {
                return Ok(());
            }

            let mut decoded = payload.as_bytes().to_vec();
            let n = base64::decode_in_place(&mut decoded);
            if entry.data.len() + n > cap {
                entry.overrun = true;
                entry.data.clear();
                emit::ack(peer.socket(), stream, "Clipboard too large", Status::ClientOverrun)?;
                return Ok(());
            }
            entry.data.extend_from_slice(&decoded[..n]);
            emit::ack(peer.socket(), stream, "OK", Status::Success)?;
        }

        Opcode::End => {
            let stream = int_arg(instruction, 0, "end")?;
            let entry = peer
                .inbound
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&stream);
            if let Some(entry) = entry {
                if !entry.overrun {
                    let clipboard = ClipboardData {
                        mimetype: entry.mimetype,
                        data: entry.data,
                    };
                    session.forward_event(BackendEvent::Clipboard {
                        mimetype: clipboard.mimetype.clone(),
                        data: clipboard.data.clone(),
                    });
                    session.commit_clipboard(Some(peer.id()), clipboard);
                }
            }
        }

        Opcode::Ack => {
            let stream = int_arg(instruction, 0, "ack")?;
            let status = instruction.int_arg(2).unwrap_or(0);
            if status != 0 {
                debug!(peer = peer.id(), stream, status, "stream ended by peer");
            }
            session.release_stream(stream);
        }

        Opcode::Get => {
            let object = int_arg(instruction, 0, "get")?;
            let name = instruction
                .arg(1)
                .ok_or(GatewayError::BadInstruction("get"))?;
            session.serve_object_entry(peer, object, name)?;
        }

        Opcode::Sync => {
            // Timestamp echo; activity already recorded by the read.
        }

        Opcode::Nop => {}

        Opcode::Disconnect => {
            debug!(peer = peer.id(), "peer requested disconnect");
            peer.deactivate();
        }

        other => {
            debug!(peer = peer.id(), opcode = other.name(), "opcode not valid after handshake");
        }
    }

    Ok(())
}
