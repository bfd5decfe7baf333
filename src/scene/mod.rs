//! Scene snapshot loading.
//!
//! A scene is a JSON file holding camera matrices and the initial point
//! cloud, next to a directory of reference photographs:
//!
//! ```text
//! scene.json          { train_cameras, test_cameras, points, colors }
//! scene/<name>.png    reference image for camera with image_name == <name>
//! ```
//!
//! Each camera entry carries `image_name`, a row-major 4x4 `view` and a
//! row-major 4x4 `projection`. `points` is an array of xyz triples, `colors`
//! an array of rgb triples; alpha is filled with 1.0 on load. Train cameras
//! come first in the loaded list, then held-out test cameras; the split is
//! recorded in `num_train_cameras`.
//!
//! Loading either produces a complete [`SplatScene`] or fails without
//! side effects; callers keep their previous scene on error.

use crate::core::{Camera, PointCloud};
use image::RgbImage;
use nalgebra::{Matrix4, Vector3};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when loading a scene snapshot.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid scene JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to decode reference image: {0}")]
    Image(#[from] image::ImageError),

    #[error("point/color count mismatch: {points} points, {colors} colors")]
    CountMismatch { points: usize, colors: usize },
}

#[derive(Debug, Deserialize)]
struct CameraEntry {
    image_name: String,
    /// Row-major 4x4 matrix as nested arrays.
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
}

#[derive(Debug, Deserialize)]
struct SceneFile {
    train_cameras: Vec<CameraEntry>,
    test_cameras: Vec<CameraEntry>,
    points: Vec<[f32; 3]>,
    colors: Vec<[f32; 3]>,
}

/// A loaded scene: the initial point cloud plus posed reference views.
///
/// `cameras`, `images`, and `image_names` are parallel arrays. Indices
/// `0..num_train_cameras` are training views; the rest are held out.
pub struct SplatScene {
    pub point_cloud: PointCloud,
    pub cameras: Vec<Camera>,
    pub images: Vec<RgbImage>,
    pub image_names: Vec<String>,
    pub num_train_cameras: usize,
}

impl SplatScene {
    pub fn train_view(&self, index: usize) -> (&Camera, &RgbImage) {
        debug_assert!(index < self.num_train_cameras);
        (&self.cameras[index], &self.images[index])
    }
}

fn matrix_from_rows(rows: &[[f32; 4]; 4]) -> Matrix4<f32> {
    let mut m = Matrix4::zeros();
    for (i, row) in rows.iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            m[(i, j)] = *v;
        }
    }
    m
}

/// Find the reference image for a camera entry. Scene exporters are not
/// consistent about extensions, so try the common ones.
fn find_image(image_dir: &Path, name: &str) -> Option<PathBuf> {
    for ext in ["png", "PNG", "jpg", "JPG", "jpeg"] {
        let candidate = image_dir.join(format!("{}.{}", name, ext));
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    // Some exporters include the extension in image_name already.
    let as_is = image_dir.join(name);
    as_is.is_file().then_some(as_is)
}

/// Load a scene snapshot from a JSON file.
///
/// Reference images live in a sibling directory named after the file stem
/// (`scene.json` -> `scene/`). Cameras whose image file is missing are
/// skipped entirely so that every loaded camera has a usable reference.
pub fn load_scene(path: &Path) -> Result<SplatScene, LoadError> {
    let text = std::fs::read_to_string(path)?;
    let file: SceneFile = serde_json::from_str(&text)?;

    if file.points.len() != file.colors.len() {
        return Err(LoadError::CountMismatch {
            points: file.points.len(),
            colors: file.colors.len(),
        });
    }

    let image_dir = {
        let parent = path.parent().unwrap_or(Path::new("."));
        let stem = path.file_stem().unwrap_or_default();
        parent.join(stem)
    };

    let mut cameras = Vec::new();
    let mut images = Vec::new();
    let mut image_names = Vec::new();
    let mut num_train_cameras = 0;

    for (group, is_train) in [(&file.train_cameras, true), (&file.test_cameras, false)] {
        for entry in group {
            let Some(img_path) = find_image(&image_dir, &entry.image_name) else {
                log::warn!(
                    "no image for camera {:?} under {:?}, skipping view",
                    entry.image_name,
                    image_dir
                );
                continue;
            };
            let img = image::open(&img_path)?.to_rgb8();

            cameras.push(Camera::new(
                matrix_from_rows(&entry.view),
                matrix_from_rows(&entry.projection),
            ));
            images.push(img);
            image_names.push(entry.image_name.clone());
            if is_train {
                num_train_cameras += 1;
            }
        }
    }

    let positions = file
        .points
        .iter()
        .map(|p| Vector3::new(p[0], p[1], p[2]))
        .collect::<Vec<_>>();
    let colors_rgb = file
        .colors
        .iter()
        .map(|c| Vector3::new(c[0], c[1], c[2]))
        .collect::<Vec<_>>();
    let point_cloud = PointCloud::from_rgb(positions, &colors_rgb);

    log::info!(
        "loaded scene: {} points, {} cameras ({} train)",
        point_cloud.len(),
        cameras.len(),
        num_train_cameras
    );

    Ok(SplatScene {
        point_cloud,
        cameras,
        images,
        image_names,
        num_train_cameras,
    })
}
