//! Scene points.

use glam::Vec3;

/// A point with an optional 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScenePoint {
    pub position: Vec3,
    pub color: Option<[u8; 3]>,
}

impl ScenePoint {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            color: None,
        }
    }

    pub fn colored(position: Vec3, color: [u8; 3]) -> Self {
        Self {
            position,
            color: Some(color),
        }
    }

    /// Same position, new color.
    pub fn with_color(&self, color: [u8; 3]) -> Self {
        Self::colored(self.position, color)
    }
}
