//! The seam a display backend implements.
//!
//! A backend owns whatever native connection drives the real display (a VNC
//! socket, an SSH channel, a PTY) and runs on one worker thread per session.
//! It paints through the session's broadcast emitters and receives fan-in
//! peer input through a bounded event channel; it never touches peer sockets
//! directly, so only the worker mutates durable display state.

use crossbeam_channel::Receiver;
use std::collections::HashMap;
use std::sync::Arc;

use crate::args::ArgsSchema;
use crate::display::{ClipboardData, Fill, ROOT_LAYER};
use crate::error::GatewayError;
use crate::pointer;
use crate::session::{ObjectState, Session, timestamp_ms};

/// Peer input and lifecycle events delivered to the backend worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Pointer state from some peer.
    Mouse {
        /// X coordinate.
        x: i32,
        /// Y coordinate.
        y: i32,
        /// Button bitmask, lowest bit is the left button.
        button_mask: i32,
    },
    /// Key state from some peer.
    Key {
        /// X11 keysym.
        keysym: i32,
        /// Pressed or released.
        pressed: bool,
    },
    /// Clipboard contents committed by some peer.
    Clipboard {
        /// Payload mimetype.
        mimetype: String,
        /// Payload bytes.
        data: Vec<u8>,
    },
    /// A peer asked for a new optimal display size.
    Resize {
        /// Requested width.
        width: i32,
        /// Requested height.
        height: i32,
    },
    /// The session is stopping; the worker must return.
    Stop,
}

/// Everything a backend worker needs for one session.
pub struct BackendContext {
    /// The session being driven; all painting goes through it.
    pub session: Arc<Session>,
    /// Fan-in of peer input.
    pub events: Receiver<BackendEvent>,
}

/// A display backend.
pub trait Backend: Send + Sync {
    /// Protocol name peers use in `select`.
    fn name(&self) -> &'static str;

    /// The argument names advertised during the handshake.
    fn schema(&self) -> ArgsSchema;

    /// Drives the session until [`BackendEvent::Stop`] or failure. Runs on
    /// the session's dedicated worker thread.
    ///
    /// # Errors
    ///
    /// A backend failure is reported to every peer as an upstream error and
    /// ends the session.
    fn run(&self, ctx: BackendContext) -> Result<(), GatewayError>;
}

/// Built-in demonstration backend: paints a solid screen at the requested
/// size, installs the default pointer, echoes clipboard, and honors resize.
/// Exists so the full peer/session/worker path can run without any external
/// display server.
pub struct LoopbackBackend;

const LOOPBACK_ARGS: ArgsSchema =
    ArgsSchema::new(&["width", "height", "color", "read-only"]);

impl LoopbackBackend {
    fn paint(session: &Session, width: i32, height: i32, rgb: (i32, i32, i32)) {
        session.resize_layer(ROOT_LAYER, width, height);
        session.fill_layer(
            ROOT_LAYER,
            Fill {
                mode: 12,
                r: rgb.0,
                g: rgb.1,
                b: rgb.2,
                a: 255,
            },
        );
        session.sync_all(timestamp_ms());
    }
}

impl Backend for LoopbackBackend {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn schema(&self) -> ArgsSchema {
        LOOPBACK_ARGS
    }

    fn run(&self, ctx: BackendContext) -> Result<(), GatewayError> {
        let session = ctx.session;
        let bag = session.owner_args();

        let (req_w, req_h) = session.requested_size();
        let width = bag.int_or("width", i64::from(req_w.max(1024))) as i32;
        let height = bag.int_or("height", i64::from(req_h.max(768))) as i32;

        let rgb = match bag.string_or("color", "black").as_str() {
            "gray" => (128, 128, 128),
            "blue" => (0, 0, 128),
            _ => (0, 0, 0),
        };

        Self::paint(&session, width, height, rgb);
        pointer::install(&session)?;

        // A tiny filesystem object so peers have something to `get`.
        let mut entries = HashMap::new();
        entries.insert(
            "motd".to_owned(),
            ("text/plain".to_owned(), b"loopback display".to_vec()),
        );
        session.publish_object(ObjectState {
            name: "session".to_owned(),
            entries,
        })?;
        session.sync_all(timestamp_ms());

        tracing::info!(session = %session.id(), width, height, "loopback display ready");

        while let Ok(event) = ctx.events.recv() {
            match event {
                BackendEvent::Stop => break,
                BackendEvent::Resize { width, height } if width > 0 && height > 0 => {
                    Self::paint(&session, width, height, rgb);
                }
                BackendEvent::Clipboard { mimetype, data } => {
                    // Echo committed clipboard back to every peer.
                    session.commit_clipboard(None, ClipboardData { mimetype, data });
                    session.sync_all(timestamp_ms());
                }
                BackendEvent::Mouse { .. } | BackendEvent::Key { .. } => {
                    // Nothing to drive; input is dropped on the floor.
                }
                BackendEvent::Resize { .. } => {}
            }
        }

        Ok(())
    }
}
