//! Web Mercator (slippy map) conversions between longitude/latitude and tile
//! column/row indices.
//!
//! See: https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames

use std::f64::consts::PI;

/// Latitudes beyond this cannot be projected; they are clamped to it.
pub const MAX_MERCATOR_LAT: f64 = 85.051_128_78;
pub const MAX_ZOOM: u8 = 22;

/// Number of tiles along one axis at `zoom`.
pub fn tiles_per_axis(zoom: u8) -> u32 {
    1_u32 << zoom
}

/// Returns the `(col, row)` of the tile containing the given point.
///
/// Longitude is expected in [-180, 180] and latitude in [-90, 90]; both
/// indices are clamped to the grid, so `lon == 180` lands in the last column.
pub fn lon_lat_to_tile(zoom: u8, lon: f64, lat: f64) -> (u32, u32) {
    let n = tiles_per_axis(zoom) as f64;
    let last = tiles_per_axis(zoom) - 1;

    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let lat_rad = lat.to_radians();

    let col = ((lon + 180.0) / 360.0 * n).floor();
    let row = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();

    (clamp_index(col, last), clamp_index(row, last))
}

/// Returns the longitude/latitude of the north-west corner of a tile.
pub fn tile_to_lon_lat(zoom: u8, col: u32, row: u32) -> (f64, f64) {
    let n = tiles_per_axis(zoom) as f64;
    let lon = col as f64 / n * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * row as f64 / n)).sinh().atan().to_degrees();
    (lon, lat)
}

fn clamp_index(value: f64, last: u32) -> u32 {
    if value <= 0.0 {
        0
    } else if value >= last as f64 {
        last
    } else {
        value as u32
    }
}
