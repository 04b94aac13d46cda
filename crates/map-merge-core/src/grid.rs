use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Cell value of a cell that was never observed.
pub const UNKNOWN: i8 = -1;
/// Cell value of a cell observed as free.
pub const FREE: i8 = 0;
/// Cell value of a cell observed as occupied.
pub const OCCUPIED: i8 = 100;

/// Errors returned by occupancy grid validation.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GridError {
    #[error("grid data length mismatch (expected {expected} cells, got {got})")]
    DataLength { expected: usize, got: usize },
    #[error("invalid grid resolution {0} (must be finite and > 0)")]
    InvalidResolution(f32),
    #[error("cell {index} holds {value}, outside -1..=100")]
    CellOutOfRange { index: usize, value: i8 },
}

/// Position and orientation in the world frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point3<f64>,
    pub orientation: UnitQuaternion<f64>,
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

impl Pose {
    pub fn identity() -> Self {
        Self {
            position: Point3::origin(),
            orientation: UnitQuaternion::identity(),
        }
    }

    /// Planar pose at `(x, y)` rotated by `yaw` radians about +z.
    pub fn from_xy_yaw(x: f64, y: f64, yaw: f64) -> Self {
        Self {
            position: Point3::new(x, y, 0.0),
            orientation: UnitQuaternion::from_axis_angle(&Vector3::z_axis(), yaw),
        }
    }

    /// Rotation about +z.
    pub fn yaw(&self) -> f64 {
        self.orientation.euler_angles().2
    }

    /// Express `local` (given in this pose's frame) in the parent frame.
    pub fn transform_point(&self, local: &Point3<f64>) -> Point3<f64> {
        self.position + self.orientation * local.coords
    }
}

/// Grid geometry: size in cells, cell size in metres and world pose of cell `[0, 0]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MapMetaData {
    /// Metres per cell.
    pub resolution: f32,
    pub width: u32,
    pub height: u32,
    pub origin: Pose,
}

/// 2D occupancy grid, row-major, row 0 at the origin.
///
/// Cells hold [`UNKNOWN`] or a value in `FREE..=OCCUPIED`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OccupancyGrid {
    pub info: MapMetaData,
    pub data: Vec<i8>,
}

impl OccupancyGrid {
    /// Build a grid and check that `data` matches the declared geometry.
    pub fn new(info: MapMetaData, data: Vec<i8>) -> Result<Self, GridError> {
        let grid = Self { info, data };
        grid.validate()?;
        Ok(grid)
    }

    /// Grid of `width x height` cells, all set to `value`, with the origin at identity.
    pub fn filled(width: u32, height: u32, resolution: f32, value: i8) -> Self {
        let len = width as usize * height as usize;
        Self {
            info: MapMetaData {
                resolution,
                width,
                height,
                origin: Pose::identity(),
            },
            data: vec![value; len],
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.info.width as usize
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.info.height as usize
    }

    #[inline]
    pub fn resolution(&self) -> f32 {
        self.info.resolution
    }

    /// True when the grid has no cells at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.info.width == 0 || self.info.height == 0
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> Option<usize> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        Some(y * self.width() + x)
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> Option<i8> {
        self.index(x, y).and_then(|i| self.data.get(i).copied())
    }

    pub fn set(&mut self, x: usize, y: usize, value: i8) -> bool {
        match self.index(x, y).and_then(|i| self.data.get_mut(i)) {
            Some(cell) => {
                *cell = value;
                true
            }
            None => false,
        }
    }

    /// Number of cells holding a known (free..occupied) value.
    pub fn known_cells(&self) -> usize {
        self.data.iter().filter(|&&v| is_known(v)).count()
    }

    pub fn validate(&self) -> Result<(), GridError> {
        let r = self.info.resolution;
        if !r.is_finite() || r <= 0.0 {
            return Err(GridError::InvalidResolution(r));
        }
        let expected = self.width() * self.height();
        if self.data.len() != expected {
            return Err(GridError::DataLength {
                expected,
                got: self.data.len(),
            });
        }
        if let Some((index, &value)) = self
            .data
            .iter()
            .enumerate()
            .find(|&(_, &v)| v != UNKNOWN && !is_known(v))
        {
            return Err(GridError::CellOutOfRange { index, value });
        }
        Ok(())
    }
}

/// True for values in `FREE..=OCCUPIED`.
#[inline]
pub fn is_known(value: i8) -> bool {
    (FREE..=OCCUPIED).contains(&value)
}
