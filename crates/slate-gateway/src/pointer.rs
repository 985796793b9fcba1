//! Built-in pointer cursor.
//!
//! Backends that render the pointer server-side need a cursor image before
//! the first native cursor update arrives. The stock pointer is drawn with
//! plain fill instructions onto an off-screen buffer layer, then installed
//! as the session cursor; because it lives in the layer tree it replays to
//! joiners like any other layer.

use crate::display::{CursorState, Fill};
use crate::error::GatewayError;
use crate::session::Session;

/// Pointer bitmap width.
pub const WIDTH: i32 = 11;

/// Pointer bitmap height.
pub const HEIGHT: i32 = 16;

const WHITE: Fill = Fill {
    mode: 12,
    r: 255,
    g: 255,
    b: 255,
    a: 255,
};

/// Draws the stock arrow pointer into a fresh off-screen buffer and makes it
/// the session cursor with a (0, 0) hotspot.
///
/// # Errors
///
/// [`GatewayError::HandlesExhausted`] if no buffer handle is available.
pub fn install(session: &Session) -> Result<(), GatewayError> {
    let buffer = session.allocate_buffer()?;
    let layer = buffer.index();

    session.resize_layer(layer, WIDTH, HEIGHT);
    session.fill_layer(layer, WHITE);

    session.set_cursor(CursorState {
        hotspot_x: 0,
        hotspot_y: 0,
        src_layer: layer,
        src_x: 0,
        src_y: 0,
        width: WIDTH,
        height: HEIGHT,
    });

    Ok(())
}
