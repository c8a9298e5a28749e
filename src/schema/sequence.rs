//! Animation timeline: an ordered list of frames with authored durations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Color, SchemaError, VoxelGrid};

fn default_duration_ms() -> f32 {
    100.0
}

fn default_looping() -> bool {
    true
}

fn default_frame_name() -> String {
    "FRAME".to_string()
}

/// One animation frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default = "default_frame_name")]
    pub name: String,
    /// How long the frame is shown, in milliseconds.
    #[serde(default = "default_duration_ms")]
    pub duration_ms: f32,
    pub grid: VoxelGrid,
}

impl Frame {
    /// Blank frame with the default duration.
    pub fn blank(side: usize) -> Result<Self, SchemaError> {
        Ok(Self::new(VoxelGrid::new(side)?))
    }

    pub fn new(grid: VoxelGrid) -> Self {
        Self {
            name: default_frame_name(),
            duration_ms: default_duration_ms(),
            grid,
        }
    }

    pub fn with_duration(mut self, duration_ms: f32) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Authored duration, truncated to whole milliseconds.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms.max(0.0) as u64)
    }
}

/// An animation as authored in the editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationSequence {
    pub name: String,
    /// Cube side shared by every frame.
    pub side: usize,
    /// Restart from the first frame after the last one.
    #[serde(default = "default_looping")]
    pub looping: bool,
    pub frames: Vec<Frame>,
}

impl AnimationSequence {
    pub fn new(name: impl Into<String>, side: usize, frames: Vec<Frame>) -> Self {
        Self {
            name: name.into(),
            side,
            looping: default_looping(),
            frames,
        }
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Parse and validate a sequence from JSON.
    pub fn from_json(json: &str) -> Result<Self, SchemaError> {
        let sequence: Self = serde_json::from_str(json)?;
        sequence.validate()?;
        Ok(sequence)
    }

    /// Load and validate a sequence from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Validate sequence invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if self.side == 0 || self.side > super::MAX_CUBE_SIDE {
            return Err(SchemaError::InvalidSide(self.side));
        }
        if self.frames.is_empty() {
            return Err(SchemaError::EmptySequence);
        }
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.grid.side() != self.side {
                return Err(SchemaError::FrameSideMismatch {
                    frame: i,
                    expected: self.side,
                    actual: frame.grid.side(),
                });
            }
            if !(frame.duration_ms.is_finite() && frame.duration_ms > 0.0) {
                return Err(SchemaError::InvalidDuration {
                    frame: i,
                    duration_ms: frame.duration_ms,
                });
            }
        }
        Ok(())
    }

    /// A small demo: a plane sweeping through the cube, one layer per frame.
    pub fn example(side: usize) -> Result<Self, SchemaError> {
        let mut frames = Vec::with_capacity(side);
        for layer in 0..side {
            let mut grid = VoxelGrid::new(side)?;
            let hue = layer as f32 / side.max(2).saturating_sub(1) as f32;
            let color = Color::new(1.0 - hue, hue, 0.5);
            for y in 0..side {
                for x in 0..side {
                    grid.set(x, y, layer, color);
                }
            }
            frames.push(Frame {
                name: format!("LAYER {}", layer),
                duration_ms: 120.0,
                grid,
            });
        }
        Ok(Self::new("Layer Sweep", side, frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_example_is_valid() {
        let sequence = AnimationSequence::example(4).unwrap();
        assert_eq!(sequence.frame_count(), 4);
        assert!(sequence.looping);
        sequence.validate().unwrap();
    }

    #[test]
    fn test_json_roundtrip_through_file() {
        let sequence = AnimationSequence::example(3).unwrap().with_looping(false);
        let json = serde_json::to_string_pretty(&sequence).unwrap();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let loaded = AnimationSequence::load(file.path()).unwrap();
        assert_eq!(loaded.name, "Layer Sweep");
        assert!(!loaded.looping);
        assert_eq!(loaded.frames.len(), 3);
        assert_eq!(loaded.frames[1].grid, sequence.frames[1].grid);
    }

    #[test]
    fn test_defaults_applied() {
        let json = r#"{
            "name": "one",
            "side": 1,
            "frames": [{ "grid": { "side": 1, "voxels": [[0.0, 0.0, 1.0]] } }]
        }"#;
        let sequence = AnimationSequence::from_json(json).unwrap();
        assert!(sequence.looping);
        assert_eq!(sequence.frames[0].name, "FRAME");
        assert_eq!(sequence.frames[0].duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_validate_rejects_bad_sequences() {
        let empty = AnimationSequence::new("empty", 2, vec![]);
        assert!(matches!(empty.validate(), Err(SchemaError::EmptySequence)));

        let mismatched = AnimationSequence::new("mixed", 2, vec![Frame::blank(3).unwrap()]);
        assert!(matches!(
            mismatched.validate(),
            Err(SchemaError::FrameSideMismatch { frame: 0, .. })
        ));

        let zero = AnimationSequence::new(
            "zero",
            2,
            vec![Frame::blank(2).unwrap().with_duration(0.0)],
        );
        assert!(matches!(
            zero.validate(),
            Err(SchemaError::InvalidDuration { frame: 0, .. })
        ));
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = AnimationSequence::load("/nonexistent/sequence.json").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/sequence.json"));
    }
}
