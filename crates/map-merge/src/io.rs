//! JSON configuration helpers and map-server style PGM map files.

use crate::MergeParams;
use map_merge_core::GridError;
use std::{fs, path::Path};

#[cfg(feature = "image")]
use map_merge_core::{MapMetaData, OccupancyGrid, Pose, FREE, OCCUPIED, UNKNOWN};

#[derive(thiserror::Error, Debug)]
pub enum MapIoError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[cfg(feature = "image")]
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Grid(#[from] GridError),
}

impl MergeParams {
    /// Load parameters from a JSON file; missing fields take their defaults.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, MapIoError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write parameters to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), MapIoError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

/// Occupancy probability above which a pixel is occupied.
#[cfg(feature = "image")]
pub const OCCUPIED_THRESHOLD: f64 = 0.65;
/// Occupancy probability below which a pixel is free.
#[cfg(feature = "image")]
pub const FREE_THRESHOLD: f64 = 0.196;

/// Load a grayscale map image the way `map_server` does.
///
/// Dark pixels are occupied, light pixels free, everything in between
/// unknown. The top image row becomes the last grid row. The origin is left
/// at identity.
#[cfg(feature = "image")]
pub fn load_map_pgm(path: impl AsRef<Path>, resolution: f32) -> Result<OccupancyGrid, MapIoError> {
    let path = path.as_ref();
    let img = image::open(path)?.to_luma8();
    let (width, height) = img.dimensions();
    let (w, h) = (width as usize, height as usize);

    let mut data = vec![UNKNOWN; w * h];
    for (x, y, pixel) in img.enumerate_pixels() {
        let occ = (255.0 - pixel.0[0] as f64) / 255.0;
        let value = if occ > OCCUPIED_THRESHOLD {
            OCCUPIED
        } else if occ < FREE_THRESHOLD {
            FREE
        } else {
            UNKNOWN
        };
        let row = h - 1 - y as usize;
        data[row * w + x as usize] = value;
    }

    let grid = OccupancyGrid::new(
        MapMetaData {
            resolution,
            width,
            height,
            origin: Pose::identity(),
        },
        data,
    )?;
    log::debug!(
        "loaded {}x{} map from {} ({} known cells)",
        width,
        height,
        path.display(),
        grid.known_cells()
    );
    Ok(grid)
}

/// Save a grid as a binary PGM image the way `map_saver` does: free cells
/// (`0..=25`) white, occupied cells (`>= 65`) black, the rest unknown gray.
#[cfg(feature = "image")]
pub fn save_map_pgm(grid: &OccupancyGrid, path: impl AsRef<Path>) -> Result<(), MapIoError> {
    use image::codecs::pnm::{PnmEncoder, PnmSubtype, SampleEncoding};
    use image::{ExtendedColorType, ImageEncoder};

    grid.validate()?;
    let (w, h) = (grid.width(), grid.height());
    let mut pixels = vec![205u8; w * h];
    for y in 0..h {
        let out_row = h - 1 - y;
        for x in 0..w {
            let v = grid.data[y * w + x];
            pixels[out_row * w + x] = match v {
                0..=25 => 254,
                65..=100 => 0,
                _ => 205,
            };
        }
    }

    let file = fs::File::create(path.as_ref())?;
    let writer = std::io::BufWriter::new(file);
    PnmEncoder::new(writer)
        .with_subtype(PnmSubtype::Graymap(SampleEncoding::Binary))
        .write_image(&pixels, w as u32, h as u32, ExtendedColorType::L8)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FusionRule;

    #[test]
    fn params_json_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("params.json");
        let mut params = MergeParams::default();
        params.matcher.range_width = 3;
        params.compose.fusion = FusionRule::FirstKnown;
        params.write_json(&path).expect("write");

        let back = MergeParams::load_json(&path).expect("load");
        assert_eq!(back.matcher.range_width, 3);
        assert_eq!(back.compose.fusion, FusionRule::FirstKnown);
        assert_eq!(back.orb.max_features, params.orb.max_features);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = MergeParams::load_json(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, MapIoError::Io(_)));
    }

    #[cfg(feature = "image")]
    #[test]
    fn pgm_round_trip_keeps_cells_and_row_order() {
        let mut grid = OccupancyGrid::filled(5, 3, 0.05, UNKNOWN);
        grid.set(0, 0, OCCUPIED);
        grid.set(4, 0, FREE);
        grid.set(2, 2, OCCUPIED);
        grid.set(1, 1, FREE);

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("map.pgm");
        save_map_pgm(&grid, &path).expect("save");

        // bottom grid row is the last image row
        let img = image::open(&path).expect("decode").to_luma8();
        assert_eq!(img.get_pixel(0, 2).0[0], 0);
        assert_eq!(img.get_pixel(4, 2).0[0], 254);

        let back = load_map_pgm(&path, 0.05).expect("load");
        assert_eq!(back.data, grid.data);
        assert_eq!((back.width(), back.height()), (5, 3));
    }
}
