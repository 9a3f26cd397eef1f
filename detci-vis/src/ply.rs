//! Point loading from PLY files.

use crate::error::ExportError;
use crate::points::ScenePoint;
use glam::Vec3;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Deserialize, Debug)]
struct PlyFile {
    #[serde(rename = "vertex")]
    vertex: Vec<HashMap<String, JsonValue>>,
}

fn get_f32(prop: Option<&JsonValue>) -> Option<f32> {
    prop.and_then(|v| match v {
        JsonValue::Number(n) => n.as_f64().map(|f| f as f32),
        _ => None,
    })
}

fn get_u8(prop: Option<&JsonValue>) -> Option<u8> {
    prop.and_then(|v| match v {
        JsonValue::Number(n) => n
            .as_u64()
            .map(|u| u.min(255) as u8)
            .or_else(|| n.as_f64().map(|f| f.clamp(0.0, 255.0) as u8)),
        _ => None,
    })
}

/// Load points from an ASCII or binary PLY file.
///
/// `x`, `y` and `z` are required. A point gets a color only when all of
/// `red`, `green` and `blue` are present.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load_points_from_ply(path: &Path) -> Result<Vec<ScenePoint>, ExportError> {
    debug!("Loading PLY points");
    let reader = BufReader::new(File::open(path)?);

    let ply: PlyFile = serde_ply::from_reader(reader).map_err(|e| {
        warn!("Failed to parse PLY file: {}", e);
        ExportError::Ply(e.to_string())
    })?;

    let mut points = Vec::with_capacity(ply.vertex.len());
    for (index, vertex) in ply.vertex.iter().enumerate() {
        let coord = |property: &'static str| {
            get_f32(vertex.get(property)).ok_or(ExportError::MissingProperty { index, property })
        };
        let position = Vec3::new(coord("x")?, coord("y")?, coord("z")?);

        let point = match (
            get_u8(vertex.get("red")),
            get_u8(vertex.get("green")),
            get_u8(vertex.get("blue")),
        ) {
            (Some(r), Some(g), Some(b)) => ScenePoint::colored(position, [r, g, b]),
            _ => ScenePoint::new(position),
        };
        points.push(point);
    }

    info!("Loaded {} points", points.len());
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_ascii_ply_with_colors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.ply");
        std::fs::write(
            &path,
            "ply\nformat ascii 1.0\nelement vertex 2\n\
             property float x\nproperty float y\nproperty float z\n\
             property uchar red\nproperty uchar green\nproperty uchar blue\n\
             end_header\n\
             0.5 1.0 -2.0 255 0 10\n\
             1.0 2.0 3.0 0 128 0\n",
        )
        .unwrap();

        let points = load_points_from_ply(&path).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].position, Vec3::new(0.5, 1.0, -2.0));
        assert_eq!(points[0].color, Some([255, 0, 10]));
        assert_eq!(points[1].color, Some([0, 128, 0]));
    }

    #[test]
    fn test_load_ply_without_colors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.ply");
        std::fs::write(
            &path,
            "ply\nformat ascii 1.0\nelement vertex 1\n\
             property float x\nproperty float y\nproperty float z\n\
             end_header\n\
             1 2 3\n",
        )
        .unwrap();

        let points = load_points_from_ply(&path).unwrap();
        assert_eq!(points, vec![ScenePoint::new(Vec3::new(1.0, 2.0, 3.0))]);
    }
}
