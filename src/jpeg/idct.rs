//! 8x8 inverse DCT

use std::sync::OnceLock;

/// `basis[x][u] = C(u)/2 * cos((2x + 1) u pi / 16)`, with `C(0) = 1/sqrt(2)`
fn basis() -> &'static [[f32; 8]; 8] {
    static BASIS: OnceLock<[[f32; 8]; 8]> = OnceLock::new();
    BASIS.get_or_init(|| {
        let mut table = [[0f32; 8]; 8];
        for (x, row) in table.iter_mut().enumerate() {
            for (u, cell) in row.iter_mut().enumerate() {
                let c = if u == 0 { std::f64::consts::FRAC_1_SQRT_2 } else { 1.0 };
                let angle = ((2 * x + 1) * u) as f64 * std::f64::consts::PI / 16.0;
                *cell = (0.5 * c * angle.cos()) as f32;
            }
        }
        table
    })
}

/// Inverse-transform one dequantized block (natural order) into `out`.
///
/// Samples are level-shifted by `2^(precision-1)` and clamped to
/// `[0, 2^precision - 1]`.
pub fn idct_block(coefs: &[i32; 64], precision: u8, out: &mut [u16], stride: usize) {
    let shift = (1i32 << (precision - 1)) as f32;
    let max = ((1i32 << precision) - 1) as f32;

    if coefs[1..].iter().all(|&c| c == 0) {
        let value = (coefs[0] as f32 / 8.0 + shift).round().clamp(0.0, max) as u16;
        for y in 0..8 {
            out[y * stride..y * stride + 8].fill(value);
        }
        return;
    }

    let basis = basis();
    let mut rows = [0f32; 64];
    for v in 0..8 {
        let coef_row = &coefs[v * 8..v * 8 + 8];
        if coef_row.iter().all(|&c| c == 0) {
            continue;
        }
        for x in 0..8 {
            let mut acc = 0f32;
            for u in 0..8 {
                acc += basis[x][u] * coef_row[u] as f32;
            }
            rows[v * 8 + x] = acc;
        }
    }

    for y in 0..8 {
        for x in 0..8 {
            let mut acc = 0f32;
            for v in 0..8 {
                acc += basis[y][v] * rows[v * 8 + x];
            }
            out[y * stride + x] = (acc + shift).round().clamp(0.0, max) as u16;
        }
    }
}
