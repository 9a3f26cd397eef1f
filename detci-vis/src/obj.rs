//! Wavefront OBJ writers.

use crate::boxes::BoxMesh;
use crate::error::ExportError;
use crate::points::ScenePoint;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Write one `v` line per point. Colored points get `v x y z r g b` with
/// integer colors, which meshlab reads as per-vertex color.
pub fn write_points_obj(points: &[ScenePoint], path: &Path) -> Result<(), ExportError> {
    let mut out = BufWriter::new(File::create(path)?);
    for point in points {
        let p = point.position;
        match point.color {
            Some([r, g, b]) => writeln!(out, "v {:.6} {:.6} {:.6} {} {} {}", p.x, p.y, p.z, r, g, b)?,
            None => writeln!(out, "v {:.6} {:.6} {:.6}", p.x, p.y, p.z)?,
        }
    }
    out.flush()?;
    debug!("Wrote {} points to {}", points.len(), path.display());
    Ok(())
}

/// Write a triangle mesh; face indices are one-based in the file.
pub fn write_mesh_obj(mesh: &BoxMesh, path: &Path) -> Result<(), ExportError> {
    let mut out = BufWriter::new(File::create(path)?);
    for v in &mesh.vertices {
        writeln!(out, "v {:.6} {:.6} {:.6}", v.x, v.y, v.z)?;
    }
    for [a, b, c] in &mesh.faces {
        writeln!(out, "f {} {} {}", a + 1, b + 1, c + 1)?;
    }
    out.flush()?;
    debug!(
        "Wrote mesh with {} vertices, {} faces to {}",
        mesh.vertices.len(),
        mesh.faces.len(),
        path.display()
    );
    Ok(())
}
