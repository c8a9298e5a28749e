//! Voxel colors and cube grids.

use serde::{Deserialize, Serialize};

use super::SchemaError;

/// Largest cube side the editor and the wire format support.
pub const MAX_CUBE_SIDE: usize = 32;

/// Opaque RGB color with components in `[0, 1]`.
///
/// Serialized as a `[r, g, b]` array.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 3]", into = "[f32; 3]")]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const RED: Color = Color::rgb(1.0, 0.0, 0.0);
    pub const GREEN: Color = Color::rgb(0.0, 1.0, 0.0);
    pub const BLUE: Color = Color::rgb(0.0, 0.0, 1.0);

    const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Create a color, clamping each component into `[0, 1]`.
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self {
            r: clamp_unit(r),
            g: clamp_unit(g),
            b: clamp_unit(b),
        }
    }

    /// Component by channel index (0 = R, 1 = G, 2 = B). Other indices read as 0.
    #[inline]
    pub fn channel(&self, index: usize) -> f32 {
        match index {
            0 => self.r,
            1 => self.g,
            2 => self.b,
            _ => 0.0,
        }
    }

    /// Single-channel intensity: the brightest component.
    #[inline]
    pub fn intensity(&self) -> f32 {
        self.r.max(self.g).max(self.b)
    }

    /// Paint `self` with `opacity` over `base`. The result is always opaque.
    pub fn blend_over(self, base: Color, opacity: f32) -> Color {
        let a = clamp_unit(opacity);
        Color::new(
            self.r * a + base.r * (1.0 - a),
            self.g * a + base.g * (1.0 - a),
            self.b * a + base.b * (1.0 - a),
        )
    }
}

fn clamp_unit(v: f32) -> f32 {
    if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) }
}

impl From<[f32; 3]> for Color {
    fn from([r, g, b]: [f32; 3]) -> Self {
        Color::new(r, g, b)
    }
}

impl From<Color> for [f32; 3] {
    fn from(c: Color) -> Self {
        [c.r, c.g, c.b]
    }
}

/// A cube of `side³` voxels.
///
/// Voxels are stored flat with indexing `z * side * side + y * side + x`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGrid")]
pub struct VoxelGrid {
    side: usize,
    voxels: Vec<Color>,
}

#[derive(Deserialize)]
struct RawGrid {
    side: usize,
    voxels: Vec<Color>,
}

impl TryFrom<RawGrid> for VoxelGrid {
    type Error = SchemaError;

    fn try_from(raw: RawGrid) -> Result<Self, Self::Error> {
        Self::from_voxels(raw.side, raw.voxels)
    }
}

impl VoxelGrid {
    /// Create an all-black grid.
    pub fn new(side: usize) -> Result<Self, SchemaError> {
        Self::filled(side, Color::BLACK)
    }

    /// Create a grid with every voxel set to `color`.
    pub fn filled(side: usize, color: Color) -> Result<Self, SchemaError> {
        check_side(side)?;
        Ok(Self {
            side,
            voxels: vec![color; side * side * side],
        })
    }

    /// Wrap existing voxel data, checking its length against `side`.
    pub fn from_voxels(side: usize, voxels: Vec<Color>) -> Result<Self, SchemaError> {
        check_side(side)?;
        let expected = side * side * side;
        if voxels.len() != expected {
            return Err(SchemaError::VoxelCountMismatch {
                expected,
                actual: voxels.len(),
            });
        }
        Ok(Self { side, voxels })
    }

    #[inline]
    pub fn side(&self) -> usize {
        self.side
    }

    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.voxels.len()
    }

    /// Convert (x, y, z) coordinates to flat index.
    #[inline]
    pub fn idx(&self, x: usize, y: usize, z: usize) -> usize {
        z * self.side * self.side + y * self.side + x
    }

    /// Color at (x, y, z), or `None` when out of range.
    pub fn get(&self, x: usize, y: usize, z: usize) -> Option<Color> {
        if x >= self.side || y >= self.side || z >= self.side {
            return None;
        }
        Some(self.voxels[self.idx(x, y, z)])
    }

    /// Color at (x, y, z).
    ///
    /// # Panics
    ///
    /// Panics if any coordinate is `>= side`.
    #[inline]
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Color {
        assert!(x < self.side && y < self.side && z < self.side);
        self.voxels[self.idx(x, y, z)]
    }

    /// Overwrite the voxel at (x, y, z). Returns false when out of range.
    pub fn set(&mut self, x: usize, y: usize, z: usize, color: Color) -> bool {
        if x >= self.side || y >= self.side || z >= self.side {
            return false;
        }
        let i = self.idx(x, y, z);
        self.voxels[i] = color;
        true
    }

    /// Paint a translucent color over the voxel at (x, y, z).
    pub fn paint(&mut self, x: usize, y: usize, z: usize, color: Color, opacity: f32) -> bool {
        match self.get(x, y, z) {
            Some(base) => self.set(x, y, z, color.blend_over(base, opacity)),
            None => false,
        }
    }

    pub fn voxels(&self) -> &[Color] {
        &self.voxels
    }

    /// True when every voxel is black.
    pub fn is_blank(&self) -> bool {
        self.voxels.iter().all(|c| c.intensity() <= 0.0)
    }
}

fn check_side(side: usize) -> Result<(), SchemaError> {
    if side == 0 || side > MAX_CUBE_SIDE {
        return Err(SchemaError::InvalidSide(side));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_indexing() {
        let mut grid = VoxelGrid::new(4).unwrap();
        assert_eq!(grid.voxel_count(), 64);
        assert_eq!(grid.idx(1, 2, 3), 3 * 16 + 2 * 4 + 1);

        assert!(grid.set(1, 2, 3, Color::RED));
        assert_eq!(grid.voxel(1, 2, 3), Color::RED);
        assert_eq!(grid.voxels()[grid.idx(1, 2, 3)], Color::RED);
        assert!(!grid.set(4, 0, 0, Color::RED));
        assert_eq!(grid.get(0, 4, 0), None);
    }

    #[test]
    fn test_side_bounds() {
        assert!(matches!(VoxelGrid::new(0), Err(SchemaError::InvalidSide(0))));
        assert!(matches!(VoxelGrid::new(33), Err(SchemaError::InvalidSide(33))));
        assert!(VoxelGrid::new(32).is_ok());
        assert!(matches!(
            VoxelGrid::from_voxels(2, vec![Color::BLACK; 7]),
            Err(SchemaError::VoxelCountMismatch {
                expected: 8,
                actual: 7
            })
        ));
    }

    #[test]
    fn test_blend_keeps_opacity_resolved() {
        let base = Color::BLUE;
        let painted = Color::RED.blend_over(base, 0.25);
        assert!((painted.r - 0.25).abs() < 1e-6);
        assert!(painted.g.abs() < 1e-6);
        assert!((painted.b - 0.75).abs() < 1e-6);

        assert_eq!(Color::RED.blend_over(base, 1.0), Color::RED);
        assert_eq!(Color::RED.blend_over(base, 0.0), base);
    }

    #[test]
    fn test_paint_grid() {
        let mut grid = VoxelGrid::filled(2, Color::WHITE).unwrap();
        assert!(grid.paint(0, 0, 0, Color::BLACK, 0.5));
        let c = grid.voxel(0, 0, 0);
        assert!((c.r - 0.5).abs() < 1e-6);
        assert!(!grid.is_blank());
        assert!(VoxelGrid::new(2).unwrap().is_blank());
    }

    #[test]
    fn test_color_serde_as_array() {
        let json = serde_json::to_string(&Color::new(1.0, 0.5, 0.0)).unwrap();
        assert_eq!(json, "[1.0,0.5,0.0]");

        let c: Color = serde_json::from_str("[2.0, -1.0, 0.25]").unwrap();
        assert_eq!(c, Color::new(1.0, 0.0, 0.25));
    }

    #[test]
    fn test_grid_deserialize_checks_length() {
        let ok: Result<VoxelGrid, _> =
            serde_json::from_str(r#"{"side": 1, "voxels": [[1.0, 0.0, 0.0]]}"#);
        assert_eq!(ok.unwrap().voxel(0, 0, 0), Color::RED);

        let bad: Result<VoxelGrid, _> = serde_json::from_str(r#"{"side": 2, "voxels": []}"#);
        assert!(bad.is_err());
    }
}
