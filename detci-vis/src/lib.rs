//! detci Visualization Crate
//!
//! Exports detection and segmentation results as OBJ files that meshlab
//! opens directly: raw points, ground-truth and predicted oriented boxes, and
//! per-point class colors.

pub mod boxes;
pub mod error;
pub mod obj;
pub mod ply;
pub mod points;
pub mod show;

pub use boxes::{BoxMesh, OrientedBox, load_boxes_json};
pub use error::ExportError;
pub use obj::{write_mesh_obj, write_points_obj};
pub use ply::load_points_from_ply;
pub use points::ScenePoint;
pub use show::{ResultFiles, SegLabels, show_result, show_seg_result};
