//! The opcode sum type.
//!
//! Dispatch is a match over this enum rather than a runtime string table;
//! opcodes outside the known set resolve to `None` and are tolerated by the
//! gateway for forward compatibility.

/// Instruction kinds understood by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Stream or operation acknowledgment, with status.
    Ack,
    /// Handshake: advertised backend argument names.
    Args,
    /// Audio stream open, or handshake audio mimetype list.
    Audio,
    /// Base64 payload chunk within a stream.
    Blob,
    /// Object stream body.
    Body,
    /// Fill the current path with a solid color.
    Cfill,
    /// Set a layer's clipping region from the current path.
    Clip,
    /// Clipboard stream open.
    Clipboard,
    /// Handshake: positional argument values.
    Connect,
    /// Copy a rectangle between layers.
    Copy,
    /// Set the cursor source rectangle and hotspot.
    Cursor,
    /// Orderly teardown.
    Disconnect,
    /// Release a layer handle.
    Dispose,
    /// Stream end.
    End,
    /// Fatal error report, with status.
    Error,
    /// File transfer stream open.
    File,
    /// Expose a filesystem object.
    Filesystem,
    /// Request a named stream from an object.
    Get,
    /// Handshake: image mimetype list.
    Image,
    /// Draw image data from a stream onto a layer.
    Img,
    /// Keyboard event.
    Key,
    /// Pointer event.
    Mouse,
    /// Position a layer within a parent.
    Move,
    /// Human-readable session name.
    Name,
    /// Keepalive, no operation.
    Nop,
    /// Named pipe stream open.
    Pipe,
    /// Handshake: session ready, carries the session id.
    Ready,
    /// Add a rectangle to a layer's current path.
    Rect,
    /// Handshake: backend or session selection.
    Select,
    /// Set a layer's opacity.
    Shade,
    /// Resize a layer, or handshake display size.
    Size,
    /// Frame boundary timestamp.
    Sync,
    /// Transform a rectangle between layers with a transfer function.
    Transfer,
    /// Handshake: video mimetype list.
    Video,
}

impl Opcode {
    /// Looks up an opcode by its on-wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let opcode = match name {
            "ack" => Self::Ack,
            "args" => Self::Args,
            "audio" => Self::Audio,
            "blob" => Self::Blob,
            "body" => Self::Body,
            "cfill" => Self::Cfill,
            "clip" => Self::Clip,
            "clipboard" => Self::Clipboard,
            "connect" => Self::Connect,
            "copy" => Self::Copy,
            "cursor" => Self::Cursor,
            "disconnect" => Self::Disconnect,
            "dispose" => Self::Dispose,
            "end" => Self::End,
            "error" => Self::Error,
            "file" => Self::File,
            "filesystem" => Self::Filesystem,
            "get" => Self::Get,
            "image" => Self::Image,
            "img" => Self::Img,
            "key" => Self::Key,
            "mouse" => Self::Mouse,
            "move" => Self::Move,
            "name" => Self::Name,
            "nop" => Self::Nop,
            "pipe" => Self::Pipe,
            "ready" => Self::Ready,
            "rect" => Self::Rect,
            "select" => Self::Select,
            "shade" => Self::Shade,
            "size" => Self::Size,
            "sync" => Self::Sync,
            "transfer" => Self::Transfer,
            "video" => Self::Video,
            _ => return None,
        };
        Some(opcode)
    }

    /// The on-wire name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Args => "args",
            Self::Audio => "audio",
            Self::Blob => "blob",
            Self::Body => "body",
            Self::Cfill => "cfill",
            Self::Clip => "clip",
            Self::Clipboard => "clipboard",
            Self::Connect => "connect",
            Self::Copy => "copy",
            Self::Cursor => "cursor",
            Self::Disconnect => "disconnect",
            Self::Dispose => "dispose",
            Self::End => "end",
            Self::Error => "error",
            Self::File => "file",
            Self::Filesystem => "filesystem",
            Self::Get => "get",
            Self::Image => "image",
            Self::Img => "img",
            Self::Key => "key",
            Self::Mouse => "mouse",
            Self::Move => "move",
            Self::Name => "name",
            Self::Nop => "nop",
            Self::Pipe => "pipe",
            Self::Ready => "ready",
            Self::Rect => "rect",
            Self::Select => "select",
            Self::Shade => "shade",
            Self::Size => "size",
            Self::Sync => "sync",
            Self::Transfer => "transfer",
            Self::Video => "video",
        }
    }
}
