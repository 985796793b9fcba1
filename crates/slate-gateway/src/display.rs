//! The shared display model.
//!
//! One logical model per session: a tree of layers under root layer 0, the
//! session cursor, and the committed clipboard. The backend worker is the
//! only writer; every durable mutation is recorded here *and* broadcast, so
//! a late-joining peer can be synchronized by replaying the model as
//! instructions ([`Display::dup`]).
//!
//! Replay is synthetic rather than a transcript: geometry, stacking, shade,
//! the last solid fill, and the cursor reconstruct the visible state in a
//! bounded number of instructions regardless of session age. Raster history
//! delivered through image streams is not retained.

use std::collections::{BTreeMap, HashMap};

use slate_core::{WireError, WireSocket, emit};

use crate::error::GatewayError;

/// The root layer's wire index, always live.
pub const ROOT_LAYER: i32 = 0;

/// Fully opaque shade.
pub const OPAQUE: i32 = 255;

/// One layer's durable attributes.
#[derive(Debug, Clone)]
pub struct LayerState {
    /// Width in pixels; strictly positive while live.
    pub width: i32,
    /// Height in pixels; strictly positive while live.
    pub height: i32,
    /// Horizontal offset within the parent.
    pub x: i32,
    /// Vertical offset within the parent.
    pub y: i32,
    /// Stacking order among siblings.
    pub z: i32,
    /// Opacity, 0 (clear) to 255 (opaque).
    pub shade: i32,
    /// Parent layer index; `None` for root and off-screen buffers.
    pub parent: Option<i32>,
    /// Last whole-layer solid fill, if any.
    pub fill: Option<Fill>,
}

impl LayerState {
    fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            x: 0,
            y: 0,
            z: 0,
            shade: OPAQUE,
            parent: None,
            fill: None,
        }
    }
}

/// A recorded solid fill.
#[derive(Debug, Clone, Copy)]
pub struct Fill {
    /// Compositing mode.
    pub mode: i32,
    /// Red component.
    pub r: i32,
    /// Green component.
    pub g: i32,
    /// Blue component.
    pub b: i32,
    /// Alpha component.
    pub a: i32,
}

/// The session cursor: a source rectangle plus hotspot.
#[derive(Debug, Clone, Copy)]
pub struct CursorState {
    /// Hotspot X offset within the source rectangle.
    pub hotspot_x: i32,
    /// Hotspot Y offset within the source rectangle.
    pub hotspot_y: i32,
    /// Layer the cursor image is sourced from.
    pub src_layer: i32,
    /// Source rectangle X.
    pub src_x: i32,
    /// Source rectangle Y.
    pub src_y: i32,
    /// Source rectangle width.
    pub width: i32,
    /// Source rectangle height.
    pub height: i32,
}

/// Committed clipboard contents.
#[derive(Debug, Clone)]
pub struct ClipboardData {
    /// Mimetype of the payload.
    pub mimetype: String,
    /// The payload itself.
    pub data: Vec<u8>,
}

/// The session's logical display.
#[derive(Debug)]
pub struct Display {
    layers: BTreeMap<i32, LayerState>,
    cursor: Option<CursorState>,
    clipboard: Option<ClipboardData>,
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

impl Display {
    /// A display holding only the (zero-sized) root layer.
    #[must_use]
    pub fn new() -> Self {
        let mut layers = BTreeMap::new();
        layers.insert(ROOT_LAYER, LayerState::new(0, 0));
        Self {
            layers,
            cursor: None,
            clipboard: None,
        }
    }

    /// Resizes `layer`, creating its record on first touch.
    pub fn resize(&mut self, layer: i32, width: i32, height: i32) {
        let state = self
            .layers
            .entry(layer)
            .or_insert_with(|| LayerState::new(width, height));
        state.width = width;
        state.height = height;
    }

    /// Positions `layer` under `parent`.
    ///
    /// # Errors
    ///
    /// [`GatewayError::BadInstruction`] if the move would create a cycle in
    /// the parent graph or the layer is unknown.
    pub fn move_layer(
        &mut self,
        layer: i32,
        parent: i32,
        x: i32,
        y: i32,
        z: i32,
    ) -> Result<(), GatewayError> {
        // Walking up from the proposed parent must never reach the layer.
        let mut ancestor = Some(parent);
        while let Some(current) = ancestor {
            if current == layer {
                return Err(GatewayError::BadInstruction("move"));
            }
            ancestor = self.layers.get(&current).and_then(|l| l.parent);
        }

        let state = self
            .layers
            .get_mut(&layer)
            .ok_or(GatewayError::BadInstruction("move"))?;
        state.parent = Some(parent);
        state.x = x;
        state.y = y;
        state.z = z;
        Ok(())
    }

    /// Sets `layer`'s opacity.
    pub fn shade(&mut self, layer: i32, alpha: i32) {
        if let Some(state) = self.layers.get_mut(&layer) {
            state.shade = alpha;
        }
    }

    /// Records a whole-layer solid fill.
    pub fn set_fill(&mut self, layer: i32, fill: Fill) {
        if let Some(state) = self.layers.get_mut(&layer) {
            state.fill = Some(fill);
        }
    }

    /// Forgets `layer`. Root is never removed.
    pub fn dispose(&mut self, layer: i32) {
        if layer != ROOT_LAYER {
            self.layers.remove(&layer);
        }
    }

    /// Replaces the session cursor.
    pub fn set_cursor(&mut self, cursor: CursorState) {
        self.cursor = Some(cursor);
    }

    /// Replaces the committed clipboard.
    pub fn set_clipboard(&mut self, clipboard: ClipboardData) {
        self.clipboard = Some(clipboard);
    }

    /// The committed clipboard, if any.
    #[must_use]
    pub fn clipboard(&self) -> Option<&ClipboardData> {
        self.clipboard.as_ref()
    }

    /// The root layer's current size.
    #[must_use]
    pub fn root_size(&self) -> (i32, i32) {
        self.layers
            .get(&ROOT_LAYER)
            .map(|l| (l.width, l.height))
            .unwrap_or((0, 0))
    }

    /// A layer's recorded state.
    #[must_use]
    pub fn layer(&self, layer: i32) -> Option<&LayerState> {
        self.layers.get(&layer)
    }

    /// Replays the current state onto one peer's socket: every layer's
    /// geometry parent-first, stacking and shade, solid fills, then the
    /// cursor. The caller is responsible for holding the session lock so the
    /// snapshot is consistent, and for the trailing flush.
    ///
    /// # Errors
    ///
    /// Any wire error from the peer's socket.
    pub fn dup(&self, socket: &WireSocket) -> Result<(), WireError> {
        for index in self.replay_order() {
            let layer = &self.layers[&index];
            if layer.width > 0 && layer.height > 0 {
                emit::size(socket, i64::from(index), i64::from(layer.width), i64::from(layer.height))?;
            }
            if let Some(parent) = layer.parent {
                emit::move_layer(
                    socket,
                    i64::from(index),
                    i64::from(parent),
                    i64::from(layer.x),
                    i64::from(layer.y),
                    i64::from(layer.z),
                )?;
            }
            if layer.shade != OPAQUE {
                emit::shade(socket, i64::from(index), i64::from(layer.shade))?;
            }
            if let Some(fill) = layer.fill {
                emit::rect(
                    socket,
                    i64::from(index),
                    0,
                    0,
                    i64::from(layer.width),
                    i64::from(layer.height),
                )?;
                emit::cfill(
                    socket,
                    i64::from(fill.mode),
                    i64::from(index),
                    i64::from(fill.r),
                    i64::from(fill.g),
                    i64::from(fill.b),
                    i64::from(fill.a),
                )?;
            }
        }

        if let Some(cursor) = self.cursor {
            emit::cursor(
                socket,
                i64::from(cursor.hotspot_x),
                i64::from(cursor.hotspot_y),
                i64::from(cursor.src_layer),
                i64::from(cursor.src_x),
                i64::from(cursor.src_y),
                i64::from(cursor.width),
                i64::from(cursor.height),
            )?;
        }

        Ok(())
    }

    /// Layer indices in replay order: root, then visible layers parent-first
    /// (siblings by stacking order), then off-screen buffers and orphans.
    fn replay_order(&self) -> Vec<i32> {
        let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
        for (&index, layer) in &self.layers {
            if let Some(parent) = layer.parent {
                children.entry(parent).or_default().push(index);
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by_key(|&i| self.layers[&i].z);
        }

        let mut order = Vec::with_capacity(self.layers.len());
        let mut queue = std::collections::VecDeque::from([ROOT_LAYER]);
        while let Some(index) = queue.pop_front() {
            order.push(index);
            if let Some(siblings) = children.get(&index) {
                queue.extend(siblings);
            }
        }

        // Off-screen buffers and any orphaned layers follow the tree.
        for &index in self.layers.keys() {
            if !order.contains(&index) {
                order.push(index);
            }
        }
        order
    }
}
