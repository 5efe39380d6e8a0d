//! Heuristic orientation correction for scanned page images
//!
//! Pipeline:
//! 1. Grayscale, then Otsu binarization inverted so ink is foreground
//! 2. 3x3 morphological closing to merge glyphs into text blobs
//! 3. External contours, each reduced to a bounding box, area centroid,
//!    angle and aspect ratio
//! 4. Mean angle / aspect ratio decide whether to rotate
//!
//! The decision predicate and the rotation sequence are known to be crude:
//! the predicate holds for almost any page with ink on it, and the rotation
//! is a fixed composition rather than a deskew derived from the estimate.
//! Changing either one changes which pages come out rotated.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, Rgba};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::morphology::close;
use imageproc::point::Point;
use tracing::{debug, instrument};

use crate::error::PageSplitError;

/// A decoded image together with the format it was decoded from
#[derive(Debug, Clone)]
pub struct RasterImage {
    pub image: DynamicImage,
    pub format: ImageFormat,
}

impl RasterImage {
    pub fn decode(bytes: &[u8]) -> Result<Self, PageSplitError> {
        let format =
            image::guess_format(bytes).map_err(|e| PageSplitError::DecodeError(e.to_string()))?;
        let image = image::load_from_memory_with_format(bytes, format)
            .map_err(|e| PageSplitError::DecodeError(e.to_string()))?;
        Ok(Self { image, format })
    }

    pub fn encode(&self) -> Result<Vec<u8>, PageSplitError> {
        encode_image(&self.image, self.format)
    }
}

pub(crate) fn encode_image(
    image: &DynamicImage,
    format: ImageFormat,
) -> Result<Vec<u8>, PageSplitError> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, format)
        .map_err(|e| PageSplitError::EncodeError(e.to_string()))?;
    Ok(out.into_inner())
}

/// Geometry of one external contour
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourShape {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub centroid: (f64, f64),
    /// `atan2(cy - y, cx - x)` in degrees
    pub angle: f64,
    /// `width / height`, 0 when height is 0
    pub aspect_ratio: f64,
}

impl ContourShape {
    /// `None` for contours that enclose no area
    pub fn from_points(points: &[Point<i32>]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in points {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }

        let (m00, m10, m01) = polygon_moments(points);
        if m00 == 0.0 {
            return None;
        }
        let centroid = (m10 / m00, m01 / m00);

        let width = max_x - min_x + 1;
        let height = max_y - min_y + 1;
        let angle = (centroid.1 - min_y as f64)
            .atan2(centroid.0 - min_x as f64)
            .to_degrees();
        let aspect_ratio = if height == 0 {
            0.0
        } else {
            width as f64 / height as f64
        };

        Some(Self {
            x: min_x,
            y: min_y,
            width,
            height,
            centroid,
            angle,
            aspect_ratio,
        })
    }
}

/// Area moments `(m00, m10, m01)` of the closed polygon through `points`
fn polygon_moments(points: &[Point<i32>]) -> (f64, f64, f64) {
    let (mut a, mut sx, mut sy) = (0.0, 0.0, 0.0);
    for (i, p) in points.iter().enumerate() {
        let q = points[(i + 1) % points.len()];
        let (px, py, qx, qy) = (p.x as f64, p.y as f64, q.x as f64, q.y as f64);
        let cross = px * qy - qx * py;
        a += cross;
        sx += (px + qx) * cross;
        sy += (py + qy) * cross;
    }
    (a / 2.0, sx / 6.0, sy / 6.0)
}

/// Result of analysing an image's text blobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationEstimate {
    /// Contours that contributed to the means
    pub contours: usize,
    pub mean_angle: f64,
    pub mean_aspect_ratio: f64,
}

impl OrientationEstimate {
    /// `|mean angle| < 90 || mean aspect ratio > 1`.
    ///
    /// Known to be over-permissive: centroids never sit left of or above
    /// their bounding box, so any page with ink passes. An image without
    /// usable contours never does.
    pub fn needs_correction(&self) -> bool {
        self.contours > 0 && (self.mean_angle.abs() < 90.0 || self.mean_aspect_ratio > 1.0)
    }

    /// `-angle` for negative angles, `180 - angle` otherwise
    pub fn skew_angle(&self) -> f64 {
        if self.mean_angle < 0.0 {
            -self.mean_angle
        } else {
            180.0 - self.mean_angle
        }
    }
}

/// Ink mask: inverted Otsu threshold followed by a 3x3 closing.
///
/// Otsu picks level 0 for a single-intensity image, so a white page masks to
/// nothing and any darker uniform page masks to solid foreground. Neither
/// produces an outer contour.
pub fn foreground_mask(image: &DynamicImage) -> GrayImage {
    let gray = image.to_luma8();
    let level = otsu_level(&gray);
    let binary = threshold(&gray, level, ThresholdType::BinaryInverted);
    close(&binary, Norm::LInf, 1)
}

/// Outermost contours of the mask, reduced to shapes with non-zero area
pub fn contour_shapes(mask: &GrayImage) -> Vec<ContourShape> {
    let contours: Vec<Contour<i32>> = find_contours(mask);
    contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && c.parent.is_none())
        .filter_map(|c| ContourShape::from_points(&c.points))
        .collect()
}

#[instrument(skip_all, fields(width = image.width(), height = image.height()))]
pub fn analyze(image: &DynamicImage) -> OrientationEstimate {
    let shapes = contour_shapes(&foreground_mask(image));
    if shapes.is_empty() {
        debug!("No contours found");
        return OrientationEstimate {
            contours: 0,
            mean_angle: 0.0,
            mean_aspect_ratio: 0.0,
        };
    }

    let n = shapes.len() as f64;
    let estimate = OrientationEstimate {
        contours: shapes.len(),
        mean_angle: shapes.iter().map(|s| s.angle).sum::<f64>() / n,
        mean_aspect_ratio: shapes.iter().map(|s| s.aspect_ratio).sum::<f64>() / n,
    };
    debug!(
        contours = estimate.contours,
        mean_angle = estimate.mean_angle,
        mean_aspect_ratio = estimate.mean_aspect_ratio,
        "Orientation estimate"
    );
    estimate
}

/// Rotate counter-clockwise by `degrees` about the centre, keeping the canvas
/// size and filling uncovered pixels with white
pub fn rotate_ccw(image: &DynamicImage, degrees: f64) -> DynamicImage {
    // imageproc rotates clockwise
    let theta = -(degrees.to_radians() as f32);
    match image {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(rotate_about_center(
            buf,
            theta,
            Interpolation::Bilinear,
            Luma([255]),
        )),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(rotate_about_center(
            buf,
            theta,
            Interpolation::Bilinear,
            Rgb([255, 255, 255]),
        )),
        other => DynamicImage::ImageRgba8(rotate_about_center(
            &other.to_rgba8(),
            theta,
            Interpolation::Bilinear,
            Rgba([255, 255, 255, 255]),
        )),
    }
}

/// Apply the fixed correction for `estimate`: 180°, then 90° counter-clockwise,
/// then `180 + skew` degrees counter-clockwise. Returns a clone when no
/// correction is needed.
pub fn apply(image: &DynamicImage, estimate: &OrientationEstimate) -> DynamicImage {
    if !estimate.needs_correction() {
        return image.clone();
    }
    let skew = estimate.skew_angle();
    debug!(skew, "Rotating image");
    let turned = image.rotate180().rotate270();
    rotate_ccw(&turned, 180.0 + skew)
}

/// Analyse and correct in one step. Never fails.
pub fn correct(image: &DynamicImage) -> DynamicImage {
    let estimate = analyze(image);
    apply(image, &estimate)
}

/// Decode, correct, and re-encode in the input's format
pub fn correct_encoded(bytes: &[u8]) -> Result<Vec<u8>, PageSplitError> {
    let raster = RasterImage::decode(bytes)?;
    let corrected = RasterImage {
        image: correct(&raster.image),
        format: raster.format,
    };
    corrected.encode()
}
