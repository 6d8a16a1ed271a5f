// src/surface.rs
//
// What the deck needs from the page. The browser implementation lives in
// `wasm.rs`; `sim.rs` has an in-memory one.

use crate::error::DeckResult;

/// Element-level writes the deck performs on the page.
///
/// Every method fails with `ElementNotFound` when the id does not exist.
pub trait Surface {
    /// Toggle the `active` state of an element (step buttons, indicators,
    /// transport buttons).
    fn set_active(&mut self, element_id: &str, active: bool) -> DeckResult<()>;

    /// Show a normalized level (0..1) on a slider, rotary or progress bar.
    fn set_level(&mut self, element_id: &str, level: f64) -> DeckResult<()>;

    /// Show text in an element (number boxes).
    fn set_text(&mut self, element_id: &str, text: &str) -> DeckResult<()>;
}

/// A 2D drawing target for the waveform trace.
pub trait Canvas {
    /// Size in pixels as `(width, height)`.
    fn size(&self) -> (u32, u32);

    fn clear(&mut self);

    /// Draw a vertical segment at column `x` from `y_top` to `y_bottom`.
    fn vertical_line(&mut self, x: f64, y_top: f64, y_bottom: f64);

    /// Make the drawn segments visible.
    fn finish(&mut self) {}
}
