//! Shared helpers for the integration tests: in-memory duplex connections
//! and a scripted protocol client.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use std::time::Duration;

use slate_core::{Parser, WireError, WireRead, WireSocket, WireWrite, emit};

/// Default timeout for client-side reads in tests.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read half of an in-memory pipe.
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    offset: usize,
}

impl WireRead for PipeReader {
    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, WireError> {
        if self.offset == self.pending.len() {
            match self.rx.recv_timeout(timeout) {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.offset = 0;
                }
                Err(RecvTimeoutError::Timeout) => return Err(WireError::Timeout),
                Err(RecvTimeoutError::Disconnected) => return Err(WireError::Closed),
            }
        }
        let n = (self.pending.len() - self.offset).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.offset..self.offset + n]);
        self.offset += n;
        Ok(n)
    }
}

/// Write half of an in-memory pipe. `shutdown` drops the sender, which the
/// paired reader observes as an orderly close.
pub struct PipeWriter {
    tx: Option<Sender<Vec<u8>>>,
}

impl WireWrite for PipeWriter {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        match &self.tx {
            Some(tx) => tx
                .send(bytes.to_vec())
                .map_err(|_| WireError::Closed),
            None => Err(WireError::Closed),
        }
    }

    fn shutdown(&mut self) {
        self.tx = None;
    }
}

/// One unidirectional in-memory pipe.
#[must_use]
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = unbounded();
    (
        PipeWriter { tx: Some(tx) },
        PipeReader {
            rx,
            pending: Vec::new(),
            offset: 0,
        },
    )
}

/// A scripted peer: its write socket, parser, and read half.
pub struct TestClient {
    /// Client-to-gateway socket.
    pub socket: WireSocket,
    /// Parser over the gateway-to-client byte stream.
    pub parser: Parser,
    /// Gateway-to-client read half.
    pub reader: PipeReader,
}

/// An owned copy of one received instruction.
pub type OwnedInstruction = (String, Vec<String>);

impl TestClient {
    /// Reads the next instruction, owned.
    ///
    /// # Errors
    ///
    /// Propagates wire errors from the in-memory connection.
    pub fn read(&mut self) -> Result<OwnedInstruction, WireError> {
        let instruction = self.parser.read(&mut self.reader, CLIENT_TIMEOUT)?;
        Ok((
            instruction.opcode().to_owned(),
            instruction.args().iter().map(|&s| s.to_owned()).collect(),
        ))
    }

    /// Reads instructions through the first one with `opcode`, returning
    /// everything read in order.
    ///
    /// # Panics
    ///
    /// Panics if the connection ends first.
    pub fn read_until(&mut self, opcode: &str) -> Vec<OwnedInstruction> {
        let mut seen = Vec::new();
        loop {
            let instruction = self.read().expect("connection ended before expected opcode");
            let done = instruction.0 == opcode;
            seen.push(instruction);
            if done {
                return seen;
            }
        }
    }

    /// Runs the peer side of the opening handshake against a gateway and
    /// returns the session id from `ready`.
    ///
    /// # Panics
    ///
    /// Panics on any deviation from the expected exchange.
    pub fn handshake(&mut self, target: &str, connect_values: &[&str]) -> String {
        emit::select(&self.socket, target).unwrap();
        self.socket.flush().unwrap();

        let (opcode, _args) = self.read().expect("args");
        assert_eq!(opcode, "args", "gateway must advertise args after select");

        emit::display_size(&self.socket, 1024, 768, 96).unwrap();
        emit::image_mimetypes(&self.socket, &["image/png"]).unwrap();
        emit::connect(&self.socket, connect_values).unwrap();
        self.socket.flush().unwrap();

        let (opcode, args) = self.read().expect("ready");
        assert_eq!(opcode, "ready", "gateway must answer connect with ready");
        args.into_iter().next().expect("ready carries the session id")
    }
}

/// A client/server in-memory connection: the client end plus the boxed
/// halves to hand to `Supervisor::handle_connection`.
#[must_use]
pub fn connection() -> (TestClient, Box<dyn WireRead>, Box<dyn WireWrite>) {
    let (client_tx, server_rx) = pipe();
    let (server_tx, client_rx) = pipe();
    (
        TestClient {
            socket: WireSocket::new(Box::new(client_tx)),
            parser: Parser::new(),
            reader: client_rx,
        },
        Box::new(server_rx),
        Box::new(server_tx),
    )
}
