//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto a canonical 112×112 RGB crop using the five
//! reference landmarks the descriptor model was trained with.

use image::{Rgb, RgbImage};

/// Reference landmark positions in a 112×112 aligned crop.
pub(crate) const REFERENCE_LANDMARKS: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: u32 = 112;

/// Similarity transform `dst = [a -b; b a] * src + [tx; ty]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Similarity {
    pub a: f32,
    pub b: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Similarity {
    /// Least-squares fit mapping `src` landmarks onto `dst`.
    pub fn estimate(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Self {
        // Normal equations for the overdetermined system
        //   sx*a - sy*b + tx = dx
        //   sy*a + sx*b + ty = dy
        let mut ata = [[0.0f32; 4]; 4];
        let mut atb = [0.0f32; 4];

        for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
            let rows = [([sx, -sy, 1.0, 0.0], dx), ([sy, sx, 0.0, 1.0], dy)];
            for (row, rhs) in rows {
                for j in 0..4 {
                    for k in 0..4 {
                        ata[j][k] += row[j] * row[k];
                    }
                    atb[j] += row[j] * rhs;
                }
            }
        }

        match solve4(ata, atb) {
            Some([a, b, tx, ty]) => Self { a, b, tx, ty },
            None => Self {
                a: 1.0,
                b: 0.0,
                tx: 0.0,
                ty: 0.0,
            },
        }
    }

    /// Map an aligned-crop coordinate back into the source frame.
    fn invert_point(&self, ox: f32, oy: f32) -> Option<(f32, f32)> {
        let det = self.a * self.a + self.b * self.b;
        if det.abs() < 1e-12 {
            return None;
        }
        let dx = ox - self.tx;
        let dy = oy - self.ty;
        let sx = (self.a * dx + self.b * dy) / det;
        let sy = (-self.b * dx + self.a * dy) / det;
        Some((sx, sy))
    }
}

/// Gaussian elimination with partial pivoting. `None` for a singular system.
#[allow(clippy::needless_range_loop)]
fn solve4(mut m: [[f32; 4]; 4], mut rhs: [f32; 4]) -> Option<[f32; 4]> {
    for col in 0..4 {
        let pivot_row = (col..4)
            .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
            .unwrap_or(col);
        m.swap(col, pivot_row);
        rhs.swap(col, pivot_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return None;
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..4 {
                m[row][j] -= factor * m[col][j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        let tail: f32 = ((i + 1)..4).map(|j| m[i][j] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[i][i];
    }
    Some(x)
}

/// Bilinear sample of one channel; out-of-frame pixels read as black.
fn sample(frame: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (w, h) = (frame.width() as i64, frame.height() as i64);
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let px = |xi: i64, yi: i64| -> [f32; 3] {
        if xi >= 0 && xi < w && yi >= 0 && yi < h {
            let p = frame.get_pixel(xi as u32, yi as u32).0;
            [p[0] as f32, p[1] as f32, p[2] as f32]
        } else {
            [0.0; 3]
        }
    };

    let (tl, tr, bl, br) = (px(x0, y0), px(x0 + 1, y0), px(x0, y0 + 1), px(x0 + 1, y0 + 1));
    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = tl[c] * (1.0 - fx) + tr[c] * fx;
        let bottom = bl[c] * (1.0 - fx) + br[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn warp(frame: &RgbImage, transform: &Similarity, out_size: u32) -> RgbImage {
    RgbImage::from_fn(out_size, out_size, |ox, oy| {
        match transform.invert_point(ox as f32, oy as f32) {
            Some((sx, sy)) => sample(frame, sx, sy),
            None => Rgb([0, 0, 0]),
        }
    })
}

/// Align a detected face to a canonical 112×112 RGB crop.
pub fn align_face(frame: &RgbImage, landmarks: &[(f32, f32); 5]) -> RgbImage {
    let transform = Similarity::estimate(landmarks, &REFERENCE_LANDMARKS);
    warp(frame, &transform, ALIGNED_SIZE)
}
