//! Face alignment via 4-DOF similarity transform.
//!
//! Warps detected faces onto the canonical 112×112 ArcFace template using the
//! five InsightFace reference landmarks and a least-squares fit.

use crate::types::BoundingBox;
use image::{imageops, Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// Side length of an aligned face crop.
pub const ALIGNED_SIZE: u32 = 112;

/// Sum of squared landmark distances from their centroid (px²) below which
/// the points are treated as collapsed.
const MIN_LANDMARK_SPREAD: f32 = 1.0;

/// Similarity transform `dst = [a -b; b a] * src + [tx; ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` points onto `dst` points.
    ///
    /// Each point pair contributes two rows to the overdetermined system
    /// `M · [a, b, tx, ty]ᵀ = d`:
    /// ```text
    /// [ sx  -sy  1  0 ]        [ dx ]
    /// [ sy   sx  0  1 ] · p  = [ dy ]
    /// ```
    /// solved through the 4×4 normal equations.
    ///
    /// Returns `None` when the source points are collapsed or the fit is not
    /// invertible.
    fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Option<Self> {
        let (mx, my) = src
            .iter()
            .fold((0.0f32, 0.0f32), |(ax, ay), &(x, y)| (ax + x / 5.0, ay + y / 5.0));
        let spread: f32 = src.iter().map(|&(x, y)| (x - mx).powi(2) + (y - my).powi(2)).sum();
        if !spread.is_finite() || spread < MIN_LANDMARK_SPREAD {
            return None;
        }

        let mut normal = [[0.0f32; 5]; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            for (row, rhs) in [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)] {
                for j in 0..4 {
                    for k in 0..4 {
                        normal[j][k] += row[j] * row[k];
                    }
                    normal[j][4] += row[j] * rhs;
                }
            }
        }

        let [a, b, tx, ty] = solve_augmented(normal)?;
        let fit = Self { a, b, tx, ty };
        let usable = [a, b, tx, ty].iter().all(|v| v.is_finite()) && a * a + b * b > 1e-12;
        usable.then_some(fit)
    }

    /// Map a destination pixel back into the source image.
    fn invert_point(&self, x: f32, y: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let dx = x - self.tx;
        let dy = y - self.ty;
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Gaussian elimination with partial pivoting on a 4×5 augmented matrix.
/// Returns `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve_augmented(mut m: [[f32; 5]; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&r1, &r2| m[r1][col].abs().total_cmp(&m[r2][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (m[i][4] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample with black outside the image.
fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let texel = |x: i64, y: i64| -> [f32; 3] {
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = image.get_pixel(x as u32, y as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (texel(x0, y0), texel(x0 + 1, y0), texel(x0, y0 + 1), texel(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = tl[c] * (1.0 - fx) * (1.0 - fy)
            + tr[c] * fx * (1.0 - fy)
            + bl[c] * (1.0 - fx) * fy
            + br[c] * fx * fy;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn warp(image: &RgbImage, transform: &Similarity, out_size: u32) -> RgbImage {
    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample_bilinear(image, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}

/// Align a detected face to a canonical 112×112 RGB crop.
///
/// `None` if the landmarks do not determine a transform (all points
/// coincide, or contain NaN).
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5]) -> Option<RgbImage> {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS_112)?;
    Some(warp(image, &transform, ALIGNED_SIZE))
}

/// Square crop around a bounding box, resized to 112×112.
///
/// Used when the detector supplies no landmarks. The square is centred on the
/// box, sized to its longer side, and clipped to the image.
pub fn crop_square(image: &RgbImage, face: &BoundingBox) -> RgbImage {
    let side = face.width.max(face.height).max(1.0);
    let cx = face.x + face.width / 2.0;
    let cy = face.y + face.height / 2.0;

    let clamp_x = |v: f32| v.round().clamp(0.0, image.width().saturating_sub(1) as f32) as u32;
    let clamp_y = |v: f32| v.round().clamp(0.0, image.height().saturating_sub(1) as f32) as u32;
    let x0 = clamp_x(cx - side / 2.0);
    let y0 = clamp_y(cy - side / 2.0);
    let x1 = clamp_x(cx + side / 2.0).max(x0 + 1).min(image.width());
    let y1 = clamp_y(cy + side / 2.0).max(y0 + 1).min(image.height());

    let region = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    imageops::resize(&region, ALIGNED_SIZE, ALIGNED_SIZE, imageops::FilterType::Triangle)
}
