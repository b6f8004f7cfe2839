//! Shared fixtures: a minimal sequential JPEG encoder and container builders

#![allow(dead_code)]

use std::path::Path;

use eij_convert::container::encode_frame;

const ZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Encoder settings; one plane per component, all sampled 1x1
pub struct JpegSpec<'a> {
    pub width: usize,
    pub height: usize,
    pub precision: u8,
    pub planes: &'a [Vec<u16>],
    pub restart_interval: u16,
}

struct BitWriter {
    out: Vec<u8>,
    acc: u32,
    bits: u32,
}

impl BitWriter {
    fn new() -> Self {
        Self { out: Vec::new(), acc: 0, bits: 0 }
    }

    fn put(&mut self, value: u32, len: u32) {
        for i in (0..len).rev() {
            self.acc = (self.acc << 1) | ((value >> i) & 1);
            self.bits += 1;
            if self.bits == 8 {
                let byte = self.acc as u8;
                self.out.push(byte);
                if byte == 0xFF {
                    self.out.push(0x00);
                }
                self.acc = 0;
                self.bits = 0;
            }
        }
    }

    /// Pad the partial byte with ones
    fn flush(&mut self) {
        if self.bits > 0 {
            let pad = 8 - self.bits;
            self.put((1 << pad) - 1, pad);
        }
    }
}

fn category(value: i32) -> u32 {
    32 - value.unsigned_abs().leading_zeros()
}

fn magnitude_bits(value: i32, size: u32) -> u32 {
    if value >= 0 {
        value as u32
    } else {
        (value + (1 << size) - 1) as u32
    }
}

fn ac_symbols() -> Vec<u8> {
    let mut symbols = vec![0x00, 0xF0];
    for run in 0..16u8 {
        for size in 1..=14u8 {
            symbols.push((run << 4) | size);
        }
    }
    symbols
}

fn fdct(block: &[f64; 64]) -> [i32; 64] {
    let mut out = [0i32; 64];
    for v in 0..8 {
        for u in 0..8 {
            let cu = if u == 0 { std::f64::consts::FRAC_1_SQRT_2 } else { 1.0 };
            let cv = if v == 0 { std::f64::consts::FRAC_1_SQRT_2 } else { 1.0 };
            let mut sum = 0.0;
            for y in 0..8 {
                for x in 0..8 {
                    sum += block[y * 8 + x]
                        * (((2 * x + 1) * u) as f64 * std::f64::consts::PI / 16.0).cos()
                        * (((2 * y + 1) * v) as f64 * std::f64::consts::PI / 16.0).cos();
                }
            }
            out[v * 8 + u] = (0.25 * cu * cv * sum).round() as i32;
        }
    }
    out
}

fn segment(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
    out.extend_from_slice(&[0xFF, marker]);
    out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(body);
}

/// Encode with unit quantization. Flat 8x8 blocks round-trip exactly.
pub fn encode_jpeg(spec: &JpegSpec<'_>) -> Vec<u8> {
    let ncomp = spec.planes.len();
    let mut out = vec![0xFF, 0xD8];

    // Quantization table 0, all ones
    let mut dqt = Vec::new();
    if spec.precision > 8 {
        dqt.push(0x10);
        for _ in 0..64 {
            dqt.extend_from_slice(&1u16.to_be_bytes());
        }
    } else {
        dqt.push(0x00);
        dqt.extend_from_slice(&[1u8; 64]);
    }
    segment(&mut out, 0xDB, &dqt);

    let mut sof = vec![spec.precision];
    sof.extend_from_slice(&(spec.height as u16).to_be_bytes());
    sof.extend_from_slice(&(spec.width as u16).to_be_bytes());
    sof.push(ncomp as u8);
    for c in 0..ncomp {
        sof.extend_from_slice(&[c as u8 + 1, 0x11, 0x00]);
    }
    segment(&mut out, if spec.precision > 8 { 0xC1 } else { 0xC0 }, &sof);

    // DC: categories 0..=15 with 5-bit codes. AC: 226 symbols with 8-bit codes.
    let mut dht = vec![0x00];
    let mut counts = [0u8; 16];
    counts[4] = 16;
    dht.extend_from_slice(&counts);
    dht.extend(0..16u8);
    let ac = ac_symbols();
    dht.push(0x10);
    let mut counts = [0u8; 16];
    counts[7] = ac.len() as u8;
    dht.extend_from_slice(&counts);
    dht.extend_from_slice(&ac);
    segment(&mut out, 0xC4, &dht);

    let mut ac_code = [u32::MAX; 256];
    for (code, &sym) in ac.iter().enumerate() {
        ac_code[sym as usize] = code as u32;
    }

    if spec.restart_interval > 0 {
        segment(&mut out, 0xDD, &spec.restart_interval.to_be_bytes());
    }

    let mut sos = vec![ncomp as u8];
    for c in 0..ncomp {
        sos.extend_from_slice(&[c as u8 + 1, 0x00]);
    }
    sos.extend_from_slice(&[0, 63, 0]);
    segment(&mut out, 0xDA, &sos);

    let shift = (1i32 << (spec.precision - 1)) as f64;
    let blocks_x = spec.width.div_ceil(8);
    let blocks_y = spec.height.div_ceil(8);
    let mut bits = BitWriter::new();
    let mut preds = vec![0i32; ncomp];
    let mut restarts = 0u8;

    for mcu in 0..blocks_x * blocks_y {
        if spec.restart_interval > 0 && mcu > 0 && mcu % spec.restart_interval as usize == 0 {
            bits.flush();
            bits.out.extend_from_slice(&[0xFF, 0xD0 + (restarts % 8)]);
            restarts += 1;
            preds.iter_mut().for_each(|p| *p = 0);
        }
        let (bx, by) = (mcu % blocks_x, mcu / blocks_x);
        for (c, plane) in spec.planes.iter().enumerate() {
            let mut block = [0f64; 64];
            for y in 0..8 {
                for x in 0..8 {
                    let sx = (bx * 8 + x).min(spec.width - 1);
                    let sy = (by * 8 + y).min(spec.height - 1);
                    block[y * 8 + x] = plane[sy * spec.width + sx] as f64 - shift;
                }
            }
            let coefs = fdct(&block);

            let diff = coefs[0] - preds[c];
            preds[c] = coefs[0];
            let size = category(diff);
            bits.put(size, 5);
            bits.put(magnitude_bits(diff, size), size);

            let mut run = 0;
            for &natural in &ZIGZAG[1..] {
                let value = coefs[natural];
                if value == 0 {
                    run += 1;
                    continue;
                }
                while run > 15 {
                    bits.put(ac_code[0xF0], 8);
                    run -= 16;
                }
                let size = category(value);
                assert!(size <= 14, "AC coefficient {} too large for fixture encoder", value);
                bits.put(ac_code[((run << 4) | size) as usize], 8);
                bits.put(magnitude_bits(value, size), size);
                run = 0;
            }
            if run > 0 {
                bits.put(ac_code[0x00], 8);
            }
        }
    }
    bits.flush();
    out.extend_from_slice(&bits.out);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}

/// Single-channel image at the given precision
pub fn gray_jpeg(
    width: usize,
    height: usize,
    precision: u8,
    pixel: impl Fn(usize, usize) -> u16,
) -> Vec<u8> {
    let plane: Vec<u16> = (0..height)
        .flat_map(|y| (0..width).map(move |x| (x, y)))
        .map(|(x, y)| pixel(x, y))
        .collect();
    encode_jpeg(&JpegSpec {
        width,
        height,
        precision,
        planes: &[plane],
        restart_interval: 0,
    })
}

pub fn flat_gray_12(width: usize, height: usize, value: u16) -> Vec<u8> {
    gray_jpeg(width, height, 12, |_, _| value)
}

/// Multi-component flat image; component values given per channel
pub fn flat_components_12(width: usize, height: usize, values: &[u16]) -> Vec<u8> {
    let planes: Vec<Vec<u16>> = values.iter().map(|&v| vec![v; width * height]).collect();
    encode_jpeg(&JpegSpec {
        width,
        height,
        precision: 12,
        planes: &planes,
        restart_interval: 0,
    })
}

pub fn container(frames: &[(u32, Vec<u8>)]) -> Vec<u8> {
    frames
        .iter()
        .flat_map(|(index, payload)| encode_frame(*index, payload))
        .collect()
}

pub fn write_container(path: &Path, frames: &[(u32, Vec<u8>)]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, container(frames)).unwrap();
}

pub fn png_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|n| n.ends_with(".png"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
