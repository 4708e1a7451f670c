//! 8×8 inverse DCT.
//!
//! Implements the JPEG IDCT
//!
//! ```text
//! s(y,x) = 1/4 · Σ α(u)·α(v)·C(v,u)·cos((2x+1)uπ/16)·cos((2y+1)vπ/16)
//! ```
//!
//! as two separable unnormalized type-III cosine passes over inputs
//! pre-scaled by 1/16, with row 0 and column 0 additionally scaled by √2.
//! Outputs are rounded half-away-from-zero.

use std::f64::consts::{PI, SQRT_2};

const BLOCK: usize = 8;

/// Inverse DCT evaluator; construct once and reuse across blocks.
pub struct Idct {
    /// `cos[u][x]` = cos((2x+1)·u·π/16).
    cos: [[f64; BLOCK]; BLOCK],
}

impl Idct {
    pub fn new() -> Self {
        let mut cos = [[0.0; BLOCK]; BLOCK];
        for (u, row) in cos.iter_mut().enumerate() {
            for (x, c) in row.iter_mut().enumerate() {
                *c = ((2 * x + 1) as f64 * u as f64 * PI / 16.0).cos();
            }
        }
        Self { cos }
    }

    /// Transforms one dequantized block in natural order into rounded
    /// spatial samples (not yet level-shifted).
    pub fn inverse(&self, coeffs: &[i32; 64]) -> [i16; 64] {
        let mut scaled = [0.0; 64];
        for (i, (out, &c)) in scaled.iter_mut().zip(coeffs).enumerate() {
            let mut v = f64::from(c) / 16.0;
            if i < BLOCK {
                v *= SQRT_2;
            }
            if i % BLOCK == 0 {
                v *= SQRT_2;
            }
            *out = v;
        }

        // Rows: y_x = t_0 + 2·Σ t_u·cos((2x+1)uπ/16), then the same down
        // each column.
        let mut rows = [0.0; 64];
        for r in 0..BLOCK {
            for x in 0..BLOCK {
                let mut acc = scaled[r * BLOCK];
                for u in 1..BLOCK {
                    acc += 2.0 * scaled[r * BLOCK + u] * self.cos[u][x];
                }
                rows[r * BLOCK + x] = acc;
            }
        }

        let mut out = [0; 64];
        for x in 0..BLOCK {
            for y in 0..BLOCK {
                let mut acc = rows[x];
                for v in 1..BLOCK {
                    acc += 2.0 * rows[v * BLOCK + x] * self.cos[v][y];
                }
                out[y * BLOCK + x] = acc.round() as i16;
            }
        }
        out
    }
}
