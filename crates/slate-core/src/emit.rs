//! Typed instruction emitters.
//!
//! One function per instruction kind, each writing the full on-wire shape
//! `<len>.<opcode>,<len>.<arg>,...;` through an atomic socket bracket. Integer
//! arguments are rendered in canonical decimal and length-prefixed like any
//! string element. Opcode prefixes are written as literals since their
//! lengths are static.
//!
//! Emitters only stage bytes in the socket's send buffer; call
//! [`WireSocket::flush`] to push a batch to the transport.

use crate::base64::Base64Encoder;
use crate::error::WireError;
use crate::socket::WireSocket;
use crate::status::Status;

/// Result alias for emitters.
pub type EmitResult = Result<(), WireError>;

/* Control instructions */

/// Sends an `ack` acknowledging activity on `stream`.
pub fn ack(socket: &WireSocket, stream: i64, message: &str, status: Status) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("3.ack,");
    w.element_int(stream);
    w.write_text(",");
    w.element_text(message);
    w.write_text(",");
    w.element_int(i64::from(status.code()));
    w.write_text(";");
    w.finish()
}

/// Sends a `nop` keepalive.
pub fn nop(socket: &WireSocket) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("3.nop;");
    w.finish()
}

/// Sends a `sync` frame boundary carrying a millisecond timestamp.
pub fn sync(socket: &WireSocket, timestamp: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.sync,");
    w.element_int(timestamp);
    w.write_text(";");
    w.finish()
}

/// Sends a fatal `error` with a human-readable message and a status code.
pub fn error(socket: &WireSocket, message: &str, status: Status) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("5.error,");
    w.element_text(message);
    w.write_text(",");
    w.element_int(i64::from(status.code()));
    w.write_text(";");
    w.finish()
}

/// Sends a `disconnect` notice.
pub fn disconnect(socket: &WireSocket) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("10.disconnect;");
    w.finish()
}

/// Sends a `mouse` event: position, button mask, and timestamp.
pub fn mouse(socket: &WireSocket, x: i64, y: i64, button_mask: i64, timestamp: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("5.mouse,");
    w.element_int(x);
    w.write_text(",");
    w.element_int(y);
    w.write_text(",");
    w.element_int(button_mask);
    w.write_text(",");
    w.element_int(timestamp);
    w.write_text(";");
    w.finish()
}

/// Sends a `key` event: X11 keysym, press state, and timestamp.
pub fn key(socket: &WireSocket, keysym: i64, pressed: bool, timestamp: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("3.key,");
    w.element_int(keysym);
    w.write_text(",");
    w.element_int(i64::from(pressed));
    w.write_text(",");
    w.element_int(timestamp);
    w.write_text(";");
    w.finish()
}

/* Drawing instructions */

/// Adds a rectangle to `layer`'s current path.
pub fn rect(socket: &WireSocket, layer: i64, x: i64, y: i64, width: i64, height: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.rect,");
    w.element_int(layer);
    w.write_text(",");
    w.element_int(x);
    w.write_text(",");
    w.element_int(y);
    w.write_text(",");
    w.element_int(width);
    w.write_text(",");
    w.element_int(height);
    w.write_text(";");
    w.finish()
}

/// Sets `layer`'s clipping region from its current path.
pub fn clip(socket: &WireSocket, layer: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.clip,");
    w.element_int(layer);
    w.write_text(";");
    w.finish()
}

/// Fills `layer`'s current path with a solid color.
#[allow(clippy::many_single_char_names)]
pub fn cfill(
    socket: &WireSocket,
    mode: i64,
    layer: i64,
    r: i64,
    g: i64,
    b: i64,
    a: i64,
) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("5.cfill,");
    w.element_int(mode);
    w.write_text(",");
    w.element_int(layer);
    w.write_text(",");
    w.element_int(r);
    w.write_text(",");
    w.element_int(g);
    w.write_text(",");
    w.element_int(b);
    w.write_text(",");
    w.element_int(a);
    w.write_text(";");
    w.finish()
}

/// Copies a rectangle from `src_layer` to `dst_layer`.
#[allow(clippy::too_many_arguments)]
pub fn copy(
    socket: &WireSocket,
    src_layer: i64,
    src_x: i64,
    src_y: i64,
    width: i64,
    height: i64,
    mode: i64,
    dst_layer: i64,
    dst_x: i64,
    dst_y: i64,
) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.copy,");
    w.element_int(src_layer);
    w.write_text(",");
    w.element_int(src_x);
    w.write_text(",");
    w.element_int(src_y);
    w.write_text(",");
    w.element_int(width);
    w.write_text(",");
    w.element_int(height);
    w.write_text(",");
    w.element_int(mode);
    w.write_text(",");
    w.element_int(dst_layer);
    w.write_text(",");
    w.element_int(dst_x);
    w.write_text(",");
    w.element_int(dst_y);
    w.write_text(";");
    w.finish()
}

/// Transforms a rectangle between layers with transfer function `function`.
#[allow(clippy::too_many_arguments)]
pub fn transfer(
    socket: &WireSocket,
    src_layer: i64,
    src_x: i64,
    src_y: i64,
    width: i64,
    height: i64,
    function: i64,
    dst_layer: i64,
    dst_x: i64,
    dst_y: i64,
) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("8.transfer,");
    w.element_int(src_layer);
    w.write_text(",");
    w.element_int(src_x);
    w.write_text(",");
    w.element_int(src_y);
    w.write_text(",");
    w.element_int(width);
    w.write_text(",");
    w.element_int(height);
    w.write_text(",");
    w.element_int(function);
    w.write_text(",");
    w.element_int(dst_layer);
    w.write_text(",");
    w.element_int(dst_x);
    w.write_text(",");
    w.element_int(dst_y);
    w.write_text(";");
    w.finish()
}

/// Announces image data arriving on `stream`, drawn onto `layer` at (x, y).
pub fn img(
    socket: &WireSocket,
    stream: i64,
    mode: i64,
    layer: i64,
    mimetype: &str,
    x: i64,
    y: i64,
) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("3.img,");
    w.element_int(stream);
    w.write_text(",");
    w.element_int(mode);
    w.write_text(",");
    w.element_int(layer);
    w.write_text(",");
    w.element_text(mimetype);
    w.write_text(",");
    w.element_int(x);
    w.write_text(",");
    w.element_int(y);
    w.write_text(";");
    w.finish()
}

/// Sets the cursor to a source rectangle of `src_layer` with hotspot (x, y).
#[allow(clippy::too_many_arguments)]
pub fn cursor(
    socket: &WireSocket,
    x: i64,
    y: i64,
    src_layer: i64,
    src_x: i64,
    src_y: i64,
    width: i64,
    height: i64,
) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("6.cursor,");
    w.element_int(x);
    w.write_text(",");
    w.element_int(y);
    w.write_text(",");
    w.element_int(src_layer);
    w.write_text(",");
    w.element_int(src_x);
    w.write_text(",");
    w.element_int(src_y);
    w.write_text(",");
    w.element_int(width);
    w.write_text(",");
    w.element_int(height);
    w.write_text(";");
    w.finish()
}

/* Layer instructions */

/// Resizes a layer. During the handshake the same opcode (with no layer)
/// carries the peer's display size; see [`display_size`].
pub fn size(socket: &WireSocket, layer: i64, width: i64, height: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.size,");
    w.element_int(layer);
    w.write_text(",");
    w.element_int(width);
    w.write_text(",");
    w.element_int(height);
    w.write_text(";");
    w.finish()
}

/// Positions `layer` within `parent` at (x, y) and stacking order `z`.
pub fn move_layer(
    socket: &WireSocket,
    layer: i64,
    parent: i64,
    x: i64,
    y: i64,
    z: i64,
) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.move,");
    w.element_int(layer);
    w.write_text(",");
    w.element_int(parent);
    w.write_text(",");
    w.element_int(x);
    w.write_text(",");
    w.element_int(y);
    w.write_text(",");
    w.element_int(z);
    w.write_text(";");
    w.finish()
}

/// Sets `layer`'s opacity.
pub fn shade(socket: &WireSocket, layer: i64, alpha: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("5.shade,");
    w.element_int(layer);
    w.write_text(",");
    w.element_int(alpha);
    w.write_text(";");
    w.finish()
}

/// Releases `layer`'s handle.
pub fn dispose(socket: &WireSocket, layer: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("7.dispose,");
    w.element_int(layer);
    w.write_text(";");
    w.finish()
}

/* Streaming instructions */

/// Opens an audio stream carrying data of `mimetype`.
pub fn audio(socket: &WireSocket, stream: i64, mimetype: &str) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("5.audio,");
    w.element_int(stream);
    w.write_text(",");
    w.element_text(mimetype);
    w.write_text(";");
    w.finish()
}

/// Opens a file transfer stream.
pub fn file(socket: &WireSocket, stream: i64, mimetype: &str, name: &str) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.file,");
    w.element_int(stream);
    w.write_text(",");
    w.element_text(mimetype);
    w.write_text(",");
    w.element_text(name);
    w.write_text(";");
    w.finish()
}

/// Opens a named pipe stream.
pub fn pipe(socket: &WireSocket, stream: i64, mimetype: &str, name: &str) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.pipe,");
    w.element_int(stream);
    w.write_text(",");
    w.element_text(mimetype);
    w.write_text(",");
    w.element_text(name);
    w.write_text(";");
    w.finish()
}

/// Opens a clipboard stream.
pub fn clipboard(socket: &WireSocket, stream: i64, mimetype: &str) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("9.clipboard,");
    w.element_int(stream);
    w.write_text(",");
    w.element_text(mimetype);
    w.write_text(";");
    w.finish()
}

/// Sends one binary chunk on `stream`. The payload is wrapped as a single
/// pseudo-string element whose declared length is the base64-expanded length
/// and whose content is produced by the streaming sub-encoder.
pub fn blob(socket: &WireSocket, stream: i64, data: &[u8]) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.blob,");
    w.element_int(stream);
    w.write_text(",");
    w.write_int(Base64Encoder::encoded_len(data.len()) as i64);
    w.write_text(".");
    w.write_base64(data);
    w.flush_base64();
    w.write_text(";");
    w.finish()
}

/// Ends `stream`; the handle may be reused after acknowledgment.
pub fn end(socket: &WireSocket, stream: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("3.end,");
    w.element_int(stream);
    w.write_text(";");
    w.finish()
}

/// Sends the body of a named entry of `object` over `stream`.
pub fn body(
    socket: &WireSocket,
    object: i64,
    stream: i64,
    mimetype: &str,
    name: &str,
) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.body,");
    w.element_int(object);
    w.write_text(",");
    w.element_int(stream);
    w.write_text(",");
    w.element_text(mimetype);
    w.write_text(",");
    w.element_text(name);
    w.write_text(";");
    w.finish()
}

/// Exposes `object` as a filesystem with a descriptive name.
pub fn filesystem(socket: &WireSocket, object: i64, name: &str) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("10.filesystem,");
    w.element_int(object);
    w.write_text(",");
    w.element_text(name);
    w.write_text(";");
    w.finish()
}

/* Handshake instructions */

/// Advertises the argument names recognized for the selected backend.
pub fn args(socket: &WireSocket, names: &[&str]) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.args");
    for name in names {
        w.write_text(",");
        w.element_text(name);
    }
    w.write_text(";");
    w.finish()
}

/// Selects a backend protocol or an existing session to join (peer side).
pub fn select(socket: &WireSocket, target: &str) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("6.select,");
    w.element_text(target);
    w.write_text(";");
    w.finish()
}

/// Sends the peer's optimal display size and resolution (peer side).
pub fn display_size(socket: &WireSocket, width: i64, height: i64, dpi: i64) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.size,");
    w.element_int(width);
    w.write_text(",");
    w.element_int(height);
    w.write_text(",");
    w.element_int(dpi);
    w.write_text(";");
    w.finish()
}

/// Lists supported audio mimetypes (peer side).
pub fn audio_mimetypes(socket: &WireSocket, mimetypes: &[&str]) -> EmitResult {
    mimetype_list(socket, "5.audio", mimetypes)
}

/// Lists supported video mimetypes (peer side).
pub fn video_mimetypes(socket: &WireSocket, mimetypes: &[&str]) -> EmitResult {
    mimetype_list(socket, "5.video", mimetypes)
}

/// Lists supported image mimetypes (peer side).
pub fn image_mimetypes(socket: &WireSocket, mimetypes: &[&str]) -> EmitResult {
    mimetype_list(socket, "5.image", mimetypes)
}

fn mimetype_list(socket: &WireSocket, opcode: &str, mimetypes: &[&str]) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text(opcode);
    for mimetype in mimetypes {
        w.write_text(",");
        w.element_text(mimetype);
    }
    w.write_text(";");
    w.finish()
}

/// Supplies positional values for the advertised argument names (peer side).
pub fn connect(socket: &WireSocket, values: &[&str]) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("7.connect");
    for value in values {
        w.write_text(",");
        w.element_text(value);
    }
    w.write_text(";");
    w.finish()
}

/// Completes the handshake, carrying the session id.
pub fn ready(socket: &WireSocket, session_id: &str) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("5.ready,");
    w.element_text(session_id);
    w.write_text(";");
    w.finish()
}

/// Sends the session's human-readable name.
pub fn name(socket: &WireSocket, session_name: &str) -> EmitResult {
    let mut w = socket.instruction_begin();
    w.write_text("4.name,");
    w.element_text(session_name);
    w.write_text(";");
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{WireSocket, WireWrite};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl WireWrite for Capture {
        fn write_all(&mut self, bytes: &[u8]) -> Result<(), WireError> {
            self.0.lock().unwrap().extend_from_slice(bytes);
            Ok(())
        }

        fn shutdown(&mut self) {}
    }

    fn emitted(run: impl FnOnce(&WireSocket)) -> String {
        let capture = Capture::default();
        let socket = WireSocket::new(Box::new(capture.clone()));
        run(&socket);
        socket.flush().unwrap();
        let bytes = capture.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn ack_shape() {
        let wire = emitted(|s| ack(s, 7, "OK", Status::Success).unwrap());
        assert_eq!(wire, "3.ack,1.7,2.OK,1.0;");
    }

    #[test]
    fn mouse_shape() {
        let wire = emitted(|s| mouse(s, 100, 50, 1, 1_700_000_000_000).unwrap());
        assert_eq!(wire, "5.mouse,3.100,2.50,1.1,13.1700000000000;");
    }

    #[test]
    fn blob_shape() {
        let wire = emitted(|s| blob(s, 3, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap());
        assert_eq!(wire, "4.blob,1.3,8.3q2+7w==;");
    }

    #[test]
    fn name_counts_codepoints() {
        let wire = emitted(|s| name(s, "héllo").unwrap());
        assert_eq!(wire, "4.name,5.héllo;");
    }

    #[test]
    fn disconnect_shape() {
        assert_eq!(emitted(|s| disconnect(s).unwrap()), "10.disconnect;");
    }

    #[test]
    fn sync_shape() {
        assert_eq!(
            emitted(|s| sync(s, 1_700_000_000_001).unwrap()),
            "4.sync,13.1700000000001;"
        );
    }

    #[test]
    fn args_lists_every_name() {
        let wire = emitted(|s| args(s, &["hostname", "port", "read-only"]).unwrap());
        assert_eq!(wire, "4.args,8.hostname,4.port,9.read-only;");
    }

    #[test]
    fn empty_mimetype_list_is_bare_opcode() {
        assert_eq!(emitted(|s| audio_mimetypes(s, &[]).unwrap()), "5.audio;");
    }

    #[test]
    fn negative_coordinates_render_signed() {
        let wire = emitted(|s| move_layer(s, 5, 0, -3, -14, 2).unwrap());
        assert_eq!(wire, "4.move,1.5,1.0,2.-3,3.-14,1.2;");
    }

    #[test]
    fn cfill_shape() {
        let wire = emitted(|s| cfill(s, 12, 0, 0, 0, 0, 255).unwrap());
        assert_eq!(wire, "5.cfill,2.12,1.0,1.0,1.0,1.0,3.255;");
    }

    #[test]
    fn consecutive_instructions_concatenate() {
        let wire = emitted(|s| {
            size(s, 0, 1024, 768).unwrap();
            shade(s, 0, 128).unwrap();
        });
        assert_eq!(wire, "4.size,1.0,4.1024,3.768;5.shade,1.0,3.128;");
    }
}
