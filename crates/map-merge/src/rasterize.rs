//! Occupancy grid to grayscale image.

use map_merge_core::{is_known, GrayImage, OccupancyGrid, OCCUPIED};

/// Intensity of unknown cells (map-server "unknown" gray).
pub const UNKNOWN_INTENSITY: u8 = 205;

/// Intensity of a single cell value: free is white, occupied is black and
/// unknown (or out of range) is [`UNKNOWN_INTENSITY`].
#[inline]
pub fn cell_intensity(value: i8) -> u8 {
    if !is_known(value) {
        return UNKNOWN_INTENSITY;
    }
    let v = value as u16;
    (255 - v * 255 / OCCUPIED as u16) as u8
}

/// Render `grid` as an image of the same size; image row `y` is grid row `y`.
pub fn rasterize(grid: &OccupancyGrid) -> GrayImage {
    let (w, h) = (grid.width(), grid.height());
    let data = grid
        .data
        .iter()
        .take(w * h)
        .map(|&v| cell_intensity(v))
        .collect();
    GrayImage {
        width: w,
        height: h,
        data,
    }
}
