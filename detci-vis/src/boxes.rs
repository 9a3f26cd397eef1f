//! Oriented 3D boxes and their triangle meshes.

use crate::error::ExportError;
use glam::{Mat3, Vec3};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Unit cube corners, centered on the origin after subtracting 0.5.
const CUBE_CORNERS: [[f32; 3]; 8] = [
    [0.0, 0.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.0, 1.0, 0.0],
    [0.0, 1.0, 1.0],
    [1.0, 0.0, 0.0],
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 0.0],
    [1.0, 1.0, 1.0],
];

/// Outward-facing triangles over `CUBE_CORNERS`.
const CUBE_FACES: [[u32; 3]; 12] = [
    [1, 3, 0],
    [4, 1, 0],
    [0, 3, 2],
    [2, 4, 0],
    [1, 7, 3],
    [5, 1, 4],
    [5, 7, 1],
    [3, 7, 2],
    [6, 4, 2],
    [2, 7, 6],
    [6, 5, 4],
    [7, 5, 6],
];

/// A box rotated around the Z axis.
///
/// Y forward, X right, Z up. A heading of 0 faces +X and a heading of
/// pi/2 faces +Y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedBox {
    pub center: Vec3,
    /// Full lengths along the box's local x, y and z axes.
    pub dims: Vec3,
    pub heading: f32,
}

impl OrientedBox {
    pub fn new(center: Vec3, dims: Vec3, heading: f32) -> Self {
        Self {
            center,
            dims,
            heading,
        }
    }

    /// From `[x, y, z, dx, dy, dz, heading]`.
    pub fn from_array(values: [f32; 7]) -> Self {
        Self {
            center: Vec3::new(values[0], values[1], values[2]),
            dims: Vec3::new(values[3], values[4], values[5]),
            heading: values[6],
        }
    }

    /// Detector boxes are bottom-centered and yaw counter-clockwise; meshlab
    /// expects a gravity center and clockwise yaw.
    pub fn to_meshlab_frame(&self) -> Self {
        Self {
            center: self.center + Vec3::new(0.0, 0.0, self.dims.z * 0.5),
            dims: self.dims,
            heading: -self.heading,
        }
    }

    /// The eight corners in world space, in `CUBE_CORNERS` order.
    pub fn corners(&self) -> [Vec3; 8] {
        let rotation = Mat3::from_rotation_z(self.heading);
        CUBE_CORNERS.map(|c| rotation * ((Vec3::from_array(c) - Vec3::splat(0.5)) * self.dims) + self.center)
    }

    pub fn to_mesh(&self) -> BoxMesh {
        BoxMesh {
            vertices: self.corners().to_vec(),
            faces: CUBE_FACES.to_vec(),
        }
    }
}

/// Indexed triangle mesh with zero-based face indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoxMesh {
    pub vertices: Vec<Vec3>,
    pub faces: Vec<[u32; 3]>,
}

impl BoxMesh {
    /// Concatenate the meshes of every box. An empty list yields one
    /// degenerate box at the origin so the exported file is never empty.
    pub fn from_boxes(boxes: &[OrientedBox]) -> Self {
        let fallback = [OrientedBox::new(Vec3::ZERO, Vec3::ZERO, 0.0)];
        let boxes = if boxes.is_empty() { &fallback[..] } else { boxes };

        let mut mesh = BoxMesh::default();
        for bbox in boxes {
            mesh.append(&bbox.to_mesh());
        }
        mesh
    }

    pub fn append(&mut self, other: &BoxMesh) {
        let offset = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&other.vertices);
        self.faces
            .extend(other.faces.iter().map(|f| [f[0] + offset, f[1] + offset, f[2] + offset]));
    }
}

/// Read boxes from a JSON array of `[x, y, z, dx, dy, dz, heading]` rows.
pub fn load_boxes_json(path: &Path) -> Result<Vec<OrientedBox>, ExportError> {
    let rows: Vec<[f32; 7]> = serde_json::from_reader(BufReader::new(File::open(path)?))?;
    Ok(rows.into_iter().map(OrientedBox::from_array).collect())
}
