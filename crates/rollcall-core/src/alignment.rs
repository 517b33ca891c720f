//! Five-point face alignment.
//!
//! Fits a similarity transform (scale, rotation, translation) from detected
//! landmarks to the canonical 112×112 template shared by ArcFace and SFace,
//! then resamples the face into that template.

use crate::types::Frame;

/// Canonical landmark positions in a 112×112 crop.
pub const TEMPLATE_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: usize = 112;

/// Maps `(x, y)` to `(a·x − b·y + tx, b·x + a·y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    const IDENTITY: Similarity = Similarity {
        a: 1.0,
        b: 0.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Least-squares fit of `src → dst`.
    ///
    /// Each point pair contributes the rows `[x, −y, 1, 0]·p = dx` and
    /// `[y, x, 0, 1]·p = dy`; the normal equations are solved directly.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        let mut normal = [[0.0f32; 5]; 4];

        for (&(x, y), &(dx, dy)) in src.iter().zip(dst) {
            let rows = [([x, -y, 1.0, 0.0], dx), ([y, x, 0.0, 1.0], dy)];
            for (row, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        normal[j][k] += row[j] * row[k];
                    }
                    normal[j][4] += row[j] * rhs;
                }
            }
        }

        match solve(normal) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self::IDENTITY,
        }
    }

    pub fn apply(&self, (x, y): (f32, f32)) -> (f32, f32) {
        (
            self.a * x - self.b * y + self.tx,
            self.b * x + self.a * y + self.ty,
        )
    }

    /// Inverse mapping, or `None` for a degenerate (zero-scale) transform.
    pub fn invert(&self, (x, y): (f32, f32)) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det < 1e-12 {
            return None;
        }
        let (dx, dy) = (x - self.tx, y - self.ty);
        Some((
            (self.a * dx + self.b * dy) / det,
            (-self.b * dx + self.a * dy) / det,
        ))
    }
}

/// Gauss-Jordan on a 4×5 augmented system with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve(mut m: [[f32; 5]; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4).max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))?;
        m.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }
        for j in col..5 {
            m[col][j] /= pivot;
        }
        for row in 0..4 {
            if row != col {
                let factor = m[row][col];
                for j in col..5 {
                    m[row][j] -= factor * m[col][j];
                }
            }
        }
    }
    Some([m[0][4], m[1][4], m[2][4], m[3][4]])
}

/// Bilinear sample; pixels outside the frame read as black.
fn sample(frame: &Frame, x: f32, y: f32) -> f32 {
    let (w, h) = (frame.width as i64, frame.height as i64);
    let at = |px: i64, py: i64| -> f32 {
        if (0..w).contains(&px) && (0..h).contains(&py) {
            frame.data[(py * w + px) as usize] as f32
        } else {
            0.0
        }
    };

    let (x0, y0) = (x.floor() as i64, y.floor() as i64);
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    at(x0, y0) * (1.0 - fx) * (1.0 - fy)
        + at(x0 + 1, y0) * fx * (1.0 - fy)
        + at(x0, y0 + 1) * (1.0 - fx) * fy
        + at(x0 + 1, y0 + 1) * fx * fy
}

/// Warp the face described by `landmarks` into a 112×112 grayscale crop.
pub fn align_face(frame: &Frame, landmarks: &[(f32, f32); 5]) -> Vec<u8> {
    let transform = Similarity::estimate(landmarks, &TEMPLATE_112);
    let mut out = vec![0u8; ALIGNED_SIZE * ALIGNED_SIZE];

    for oy in 0..ALIGNED_SIZE {
        for ox in 0..ALIGNED_SIZE {
            let Some((sx, sy)) = transform.invert((ox as f32, oy as f32)) else {
                return out;
            };
            out[oy * ALIGNED_SIZE + ox] = sample(frame, sx, sy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_identity() {
        let t = Similarity::estimate(&TEMPLATE_112, &TEMPLATE_112);
        assert!((t.a - 1.0).abs() < 1e-3, "a = {}", t.a);
        assert!(t.b.abs() < 1e-3, "b = {}", t.b);
        assert!(t.tx.abs() < 1e-2 && t.ty.abs() < 1e-2);
    }

    #[test]
    fn test_estimate_half_scale() {
        let doubled = TEMPLATE_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let t = Similarity::estimate(&doubled, &TEMPLATE_112);
        assert!((t.a - 0.5).abs() < 0.01, "a = {}", t.a);
    }

    #[test]
    fn test_apply_then_invert() {
        let t = Similarity {
            a: 0.8,
            b: 0.3,
            tx: 5.0,
            ty: -2.0,
        };
        let (x, y) = t.invert(t.apply((10.0, 20.0))).unwrap();
        assert!((x - 10.0).abs() < 1e-4 && (y - 20.0).abs() < 1e-4);
    }

    #[test]
    fn test_degenerate_transform_has_no_inverse() {
        let t = Similarity {
            a: 0.0,
            b: 0.0,
            tx: 1.0,
            ty: 1.0,
        };
        assert!(t.invert((0.0, 0.0)).is_none());
    }

    #[test]
    fn test_aligned_crop_size() {
        let frame = Frame::new(vec![128; 640 * 480], 640, 480);
        assert_eq!(align_face(&frame, &TEMPLATE_112).len(), ALIGNED_SIZE * ALIGNED_SIZE);
    }

    #[test]
    fn test_landmark_lands_on_template() {
        let (w, h) = (200u32, 200u32);
        let mut data = vec![0u8; (w * h) as usize];
        let landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];

        // Bright 5×5 patch on the left eye.
        for py in 58..63 {
            for px in 78..83 {
                data[py * w as usize + px] = 255;
            }
        }
        let aligned = align_face(&Frame::new(data, w, h), &landmarks);

        let (ex, ey) = (
            TEMPLATE_112[0].0.round() as usize,
            TEMPLATE_112[0].1.round() as usize,
        );
        let brightest = (ey - 1..=ey + 1)
            .flat_map(|y| (ex - 1..=ex + 1).map(move |x| (x, y)))
            .map(|(x, y)| aligned[y * ALIGNED_SIZE + x])
            .max()
            .unwrap();
        assert!(brightest > 100, "left eye not near template, max = {brightest}");
    }
}
