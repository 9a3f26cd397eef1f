//! Result export into a per-frame directory.
//!
//! Both entry points write into `out_dir/<filename>/`:
//! `<filename>_points.obj`, `<filename>_gt.obj` and `<filename>_pred.obj`,
//! each only when the matching input is given.

use crate::boxes::{BoxMesh, OrientedBox};
use crate::error::ExportError;
use crate::obj::{write_mesh_obj, write_points_obj};
use crate::points::ScenePoint;
use std::path::{Path, PathBuf};
use tracing::info;

/// Paths written by an export.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultFiles {
    pub dir: PathBuf,
    pub points: Option<PathBuf>,
    pub gt: Option<PathBuf>,
    pub pred: Option<PathBuf>,
}

fn result_dir(out_dir: &Path, filename: &str) -> Result<PathBuf, ExportError> {
    let dir = out_dir.join(filename);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Export points and detection boxes.
///
/// Boxes are given in detector convention (bottom center, counter-clockwise
/// yaw) and converted with [`OrientedBox::to_meshlab_frame`] before export.
#[tracing::instrument(skip_all, fields(frame = %filename))]
pub fn show_result(
    points: Option<&[ScenePoint]>,
    gt_boxes: Option<&[OrientedBox]>,
    pred_boxes: Option<&[OrientedBox]>,
    out_dir: &Path,
    filename: &str,
) -> Result<ResultFiles, ExportError> {
    let dir = result_dir(out_dir, filename)?;
    let mut files = ResultFiles {
        dir: dir.clone(),
        ..Default::default()
    };

    if let Some(points) = points {
        let path = dir.join(format!("{}_points.obj", filename));
        write_points_obj(points, &path)?;
        files.points = Some(path);
    }

    let export_boxes = |boxes: &[OrientedBox], suffix: &str| -> Result<PathBuf, ExportError> {
        let converted: Vec<_> = boxes.iter().map(OrientedBox::to_meshlab_frame).collect();
        let path = dir.join(format!("{}_{}.obj", filename, suffix));
        write_mesh_obj(&BoxMesh::from_boxes(&converted), &path)?;
        Ok(path)
    };

    if let Some(boxes) = gt_boxes {
        files.gt = Some(export_boxes(boxes, "gt")?);
    }
    if let Some(boxes) = pred_boxes {
        files.pred = Some(export_boxes(boxes, "pred")?);
    }

    info!("Exported results to {}", dir.display());
    Ok(files)
}

/// Per-point class labels for segmentation export.
pub struct SegLabels<'a> {
    pub gt: Option<&'a [u32]>,
    pub pred: Option<&'a [u32]>,
    /// Points whose ground-truth label equals this are dropped.
    pub ignore_index: Option<u32>,
}

fn paint(points: &[ScenePoint], labels: &[u32], palette: &[[u8; 3]]) -> Result<Vec<ScenePoint>, ExportError> {
    points
        .iter()
        .zip(labels)
        .map(|(point, &label)| {
            palette
                .get(label as usize)
                .map(|&color| point.with_color(color))
                .ok_or(ExportError::LabelOutOfPalette {
                    label,
                    palette_len: palette.len(),
                })
        })
        .collect()
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), ExportError> {
    if expected != found {
        return Err(ExportError::LengthMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}

/// Export points colored by ground-truth and predicted class.
#[tracing::instrument(skip_all, fields(frame = %filename))]
pub fn show_seg_result(
    points: &[ScenePoint],
    labels: SegLabels<'_>,
    palette: &[[u8; 3]],
    out_dir: &Path,
    filename: &str,
) -> Result<ResultFiles, ExportError> {
    if let Some(gt) = labels.gt {
        check_len("gt labels", points.len(), gt.len())?;
    }
    if let Some(pred) = labels.pred {
        check_len("pred labels", points.len(), pred.len())?;
    }

    let keep: Vec<usize> = match (labels.gt, labels.ignore_index) {
        (Some(gt), Some(ignore)) => (0..points.len()).filter(|&i| gt[i] != ignore).collect(),
        _ => (0..points.len()).collect(),
    };
    let points: Vec<ScenePoint> = keep.iter().map(|&i| points[i]).collect();
    let select = |labels: &[u32]| keep.iter().map(|&i| labels[i]).collect::<Vec<_>>();

    let dir = result_dir(out_dir, filename)?;
    let mut files = ResultFiles {
        dir: dir.clone(),
        ..Default::default()
    };

    let path = dir.join(format!("{}_points.obj", filename));
    write_points_obj(&points, &path)?;
    files.points = Some(path);

    if let Some(gt) = labels.gt {
        let path = dir.join(format!("{}_gt.obj", filename));
        write_points_obj(&paint(&points, &select(gt), palette)?, &path)?;
        files.gt = Some(path);
    }
    if let Some(pred) = labels.pred {
        let path = dir.join(format!("{}_pred.obj", filename));
        write_points_obj(&paint(&points, &select(pred), palette)?, &path)?;
        files.pred = Some(path);
    }

    info!(
        "Exported {} segmented points to {}",
        points.len(),
        dir.display()
    );
    Ok(files)
}
