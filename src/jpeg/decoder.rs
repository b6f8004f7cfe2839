//! Sequential DCT decoding (SOF0/SOF1) at 8- or 12-bit precision

use ndarray::Array3;
use tracing::trace;

use super::huffman::{extend, BitReader, HuffmanTable};
use super::idct::idct_block;
use super::JpegError;

/// Natural-order position of each zigzag index
const UNZIGZAG: [usize; 64] = [
    0, 1, 8, 16, 9, 2, 3, 10, 17, 24, 32, 25, 18, 11, 4, 5, 12, 19, 26, 33, 40, 48, 41, 34, 27,
    20, 13, 6, 7, 14, 21, 28, 35, 42, 49, 56, 57, 50, 43, 36, 29, 22, 15, 23, 30, 37, 44, 51, 58,
    59, 52, 45, 38, 31, 39, 46, 53, 60, 61, 54, 47, 55, 62, 63,
];

/// Upper bound on decoded samples per frame, summed over component planes
pub const MAX_FRAME_SAMPLES: usize = 1 << 28;

mod marker {
    pub const SOF0: u8 = 0xC0;
    pub const SOF1: u8 = 0xC1;
    pub const SOF2: u8 = 0xC2;
    pub const SOF3: u8 = 0xC3;
    pub const DHT: u8 = 0xC4;
    pub const DAC: u8 = 0xCC;
    pub const SOI: u8 = 0xD8;
    pub const EOI: u8 = 0xD9;
    pub const SOS: u8 = 0xDA;
    pub const DQT: u8 = 0xDB;
    pub const DNL: u8 = 0xDC;
    pub const DRI: u8 = 0xDD;
    pub const APP14: u8 = 0xEE;
}

/// Coding processes left to the fallback decoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Process {
    Progressive,
    Lossless,
}

/// Raw, precision-native samples for one decoded image
#[derive(Debug)]
pub struct RawImage {
    pub samples: Array3<u16>,
    pub precision: u8,
}

/// What could be learned before entropy decoding
pub enum Outcome {
    Decoded(RawImage),
    /// Coding process handled elsewhere; carries the declared precision
    Delegate { process: Process, precision: u8 },
}

struct Component {
    id: u8,
    h: usize,
    v: usize,
    tq: usize,
    blocks_w: usize,
    blocks_h: usize,
    plane: Vec<u16>,
    dc_pred: i32,
    decoded: bool,
}

struct Frame {
    precision: u8,
    width: usize,
    height: usize,
    hmax: usize,
    vmax: usize,
    mcus_x: usize,
    mcus_y: usize,
    components: Vec<Component>,
}

struct ScanComponent {
    index: usize,
    dc: usize,
    ac: usize,
}

#[derive(Default)]
struct Decoder {
    qtables: [Option<[u16; 64]>; 4],
    dc_tables: [Option<HuffmanTable>; 4],
    ac_tables: [Option<HuffmanTable>; 4],
    restart_interval: usize,
    adobe_transform: Option<u8>,
    frame: Option<Frame>,
}

pub fn decode(data: &[u8]) -> Result<Outcome, JpegError> {
    if data.len() < 2 || data[0] != 0xFF || data[1] != marker::SOI {
        return Err(JpegError::NotJpeg);
    }
    let mut decoder = Decoder::default();
    let mut pos = 2;

    loop {
        let (code, after) = match next_marker(data, pos) {
            Ok(found) => found,
            // Tolerate a missing EOI once image data has been seen
            Err(_) if decoder.has_scan() => break,
            Err(e) => return Err(e),
        };
        pos = after;
        match code {
            marker::EOI => break,
            0xD0..=0xD7 => continue,
            _ => {}
        }

        let (segment, after) = read_segment(data, pos)?;
        pos = after;
        match code {
            marker::SOF0 | marker::SOF1 => decoder.parse_frame(segment)?,
            marker::SOF2 | marker::SOF3 => {
                let precision = *segment.first().ok_or(JpegError::Truncated)?;
                let process = if code == marker::SOF2 {
                    Process::Progressive
                } else {
                    Process::Lossless
                };
                return Ok(Outcome::Delegate { process, precision });
            }
            0xC5..=0xC7 | 0xC9..=0xCB | 0xCD..=0xCF | marker::DAC => {
                return Err(JpegError::Unsupported(format!(
                    "coding process 0xFF{:02X}",
                    code
                )));
            }
            marker::DHT => decoder.parse_huffman(segment)?,
            marker::DQT => decoder.parse_quant(segment)?,
            marker::DRI => {
                if segment.len() < 2 {
                    return Err(JpegError::Truncated);
                }
                decoder.restart_interval = u16::from_be_bytes([segment[0], segment[1]]) as usize;
            }
            marker::DNL => return Err(JpegError::Unsupported("DNL marker".into())),
            marker::APP14 => {
                if segment.len() >= 12 && segment.starts_with(b"Adobe") {
                    decoder.adobe_transform = Some(segment[11]);
                }
            }
            marker::SOS => pos = decoder.decode_scan(data, segment, pos)?,
            _ => trace!("skipping segment 0xFF{:02X} ({} bytes)", code, segment.len()),
        }
    }

    decoder.finish().map(Outcome::Decoded)
}

/// Locate the next marker at or after `pos`; returns (code, position after it).
fn next_marker(data: &[u8], mut pos: usize) -> Result<(u8, usize), JpegError> {
    while pos < data.len() && data[pos] != 0xFF {
        pos += 1;
    }
    while pos < data.len() && data[pos] == 0xFF {
        pos += 1;
    }
    match data.get(pos) {
        Some(&code) => Ok((code, pos + 1)),
        None => Err(JpegError::Truncated),
    }
}

fn read_segment(data: &[u8], pos: usize) -> Result<(&[u8], usize), JpegError> {
    if pos + 2 > data.len() {
        return Err(JpegError::Truncated);
    }
    let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    if len < 2 || pos + len > data.len() {
        return Err(JpegError::Truncated);
    }
    Ok((&data[pos + 2..pos + len], pos + len))
}

impl Decoder {
    fn has_scan(&self) -> bool {
        self.frame
            .as_ref()
            .is_some_and(|f| f.components.iter().any(|c| c.decoded))
    }

    fn parse_frame(&mut self, seg: &[u8]) -> Result<(), JpegError> {
        if self.frame.is_some() {
            return Err(JpegError::Malformed("multiple frame headers".into()));
        }
        if seg.len() < 6 {
            return Err(JpegError::Truncated);
        }
        let precision = seg[0];
        if precision != 8 && precision != 12 {
            return Err(JpegError::Malformed(format!(
                "invalid sample precision {} for DCT",
                precision
            )));
        }
        let height = u16::from_be_bytes([seg[1], seg[2]]) as usize;
        let width = u16::from_be_bytes([seg[3], seg[4]]) as usize;
        let count = seg[5] as usize;
        if height == 0 {
            return Err(JpegError::Unsupported("image height defined by DNL".into()));
        }
        if width == 0 || count == 0 {
            return Err(JpegError::Malformed("empty frame".into()));
        }
        if !matches!(count, 1 | 3 | 4) {
            return Err(JpegError::Unsupported(format!("{} components", count)));
        }
        if seg.len() < 6 + count * 3 {
            return Err(JpegError::Truncated);
        }

        let mut components = Vec::with_capacity(count);
        for c in seg[6..6 + count * 3].chunks_exact(3) {
            let (h, v) = ((c[1] >> 4) as usize, (c[1] & 0x0F) as usize);
            if !(1..=4).contains(&h) || !(1..=4).contains(&v) || c[2] > 3 {
                return Err(JpegError::Malformed(format!(
                    "invalid component {} parameters",
                    c[0]
                )));
            }
            components.push(Component {
                id: c[0],
                h,
                v,
                tq: c[2] as usize,
                blocks_w: 0,
                blocks_h: 0,
                plane: Vec::new(),
                dc_pred: 0,
                decoded: false,
            });
        }

        let hmax = components.iter().map(|c| c.h).max().unwrap_or(1);
        let vmax = components.iter().map(|c| c.v).max().unwrap_or(1);
        let mcus_x = width.div_ceil(8 * hmax);
        let mcus_y = height.div_ceil(8 * vmax);
        let planned: usize = components
            .iter()
            .map(|c| mcus_x * c.h * 8 * mcus_y * c.v * 8)
            .sum();
        if planned.max(width * height * count) > MAX_FRAME_SAMPLES {
            return Err(JpegError::Unsupported(format!(
                "{}x{} frame with {} components exceeds {} samples",
                width, height, count, MAX_FRAME_SAMPLES
            )));
        }
        for c in components.iter_mut() {
            c.blocks_w = mcus_x * c.h;
            c.blocks_h = mcus_y * c.v;
            c.plane = vec![0u16; c.blocks_w * 8 * c.blocks_h * 8];
        }

        self.frame = Some(Frame {
            precision,
            width,
            height,
            hmax,
            vmax,
            mcus_x,
            mcus_y,
            components,
        });
        Ok(())
    }

    fn parse_huffman(&mut self, mut seg: &[u8]) -> Result<(), JpegError> {
        while !seg.is_empty() {
            if seg.len() < 17 {
                return Err(JpegError::Truncated);
            }
            let class = seg[0] >> 4;
            let id = (seg[0] & 0x0F) as usize;
            if class > 1 || id > 3 {
                return Err(JpegError::Malformed("invalid huffman table id".into()));
            }
            let mut counts = [0u8; 16];
            counts.copy_from_slice(&seg[1..17]);
            let total: usize = counts.iter().map(|&c| c as usize).sum();
            if seg.len() < 17 + total {
                return Err(JpegError::Truncated);
            }
            let table = HuffmanTable::new(&counts, &seg[17..17 + total])?;
            if class == 0 {
                self.dc_tables[id] = Some(table);
            } else {
                self.ac_tables[id] = Some(table);
            }
            seg = &seg[17 + total..];
        }
        Ok(())
    }

    fn parse_quant(&mut self, mut seg: &[u8]) -> Result<(), JpegError> {
        while !seg.is_empty() {
            let pq = seg[0] >> 4;
            let id = (seg[0] & 0x0F) as usize;
            if pq > 1 || id > 3 {
                return Err(JpegError::Malformed("invalid quantization table id".into()));
            }
            let size = if pq == 0 { 64 } else { 128 };
            if seg.len() < 1 + size {
                return Err(JpegError::Truncated);
            }
            let mut table = [0u16; 64];
            for (k, q) in table.iter_mut().enumerate() {
                *q = if pq == 0 {
                    seg[1 + k] as u16
                } else {
                    u16::from_be_bytes([seg[1 + 2 * k], seg[2 + 2 * k]])
                };
            }
            self.qtables[id] = Some(table);
            seg = &seg[1 + size..];
        }
        Ok(())
    }

    /// Decode the entropy-coded data following a scan header. Returns the
    /// position of the marker that ends the scan.
    fn decode_scan(&mut self, data: &[u8], header: &[u8], pos: usize) -> Result<usize, JpegError> {
        let frame = self
            .frame
            .as_mut()
            .ok_or_else(|| JpegError::Malformed("scan before frame header".into()))?;

        let count = *header.first().ok_or(JpegError::Truncated)? as usize;
        if count == 0 || count > 4 || header.len() < 1 + count * 2 + 3 {
            return Err(JpegError::Malformed("invalid scan header".into()));
        }
        let mut scan = Vec::with_capacity(count);
        for s in header[1..1 + count * 2].chunks_exact(2) {
            let index = frame
                .components
                .iter()
                .position(|c| c.id == s[0])
                .ok_or_else(|| {
                    JpegError::Malformed(format!("scan references unknown component {}", s[0]))
                })?;
            let (dc, ac) = ((s[1] >> 4) as usize, (s[1] & 0x0F) as usize);
            if dc > 3 || ac > 3 || self.dc_tables[dc].is_none() || self.ac_tables[ac].is_none() {
                return Err(JpegError::Malformed("scan references missing huffman table".into()));
            }
            if self.qtables[frame.components[index].tq].is_none() {
                return Err(JpegError::Malformed(
                    "component references missing quantization table".into(),
                ));
            }
            scan.push(ScanComponent { index, dc, ac });
        }
        let spectral = &header[1 + count * 2..];
        if spectral[0] != 0 || spectral[1] != 63 || spectral[2] != 0 {
            return Err(JpegError::Malformed("sequential scan with spectral selection".into()));
        }

        for c in frame.components.iter_mut() {
            c.dc_pred = 0;
        }

        let mut bits = BitReader::new(data, pos);
        let precision = frame.precision;
        let restart = self.restart_interval;

        // One block per MCU for single-component scans, sized by the component grid
        let (units_x, units_y) = if scan.len() == 1 {
            let c = &frame.components[scan[0].index];
            let cw = (frame.width * c.h).div_ceil(frame.hmax);
            let ch = (frame.height * c.v).div_ceil(frame.vmax);
            (cw.div_ceil(8), ch.div_ceil(8))
        } else {
            (frame.mcus_x, frame.mcus_y)
        };
        let total = units_x * units_y;

        let mut coefs = [0i32; 64];
        for unit in 0..total {
            if restart > 0 && unit > 0 && unit % restart == 0 {
                bits.restart()?;
                for c in frame.components.iter_mut() {
                    c.dc_pred = 0;
                }
            }
            let (ux, uy) = (unit % units_x, unit / units_x);

            for sc in &scan {
                let dc_table = self.dc_tables[sc.dc].as_ref().ok_or(JpegError::Truncated)?;
                let ac_table = self.ac_tables[sc.ac].as_ref().ok_or(JpegError::Truncated)?;
                let component = &mut frame.components[sc.index];
                let qtable = self.qtables[component.tq].as_ref().ok_or(JpegError::Truncated)?;

                let (bw, bh) = if scan.len() == 1 { (1, 1) } else { (component.h, component.v) };
                for by in 0..bh {
                    for bx in 0..bw {
                        decode_block(
                            &mut bits,
                            dc_table,
                            ac_table,
                            qtable,
                            &mut component.dc_pred,
                            &mut coefs,
                        )?;
                        let row = uy * bh + by;
                        let col = ux * bw + bx;
                        let stride = component.blocks_w * 8;
                        let start = row * 8 * stride + col * 8;
                        idct_block(&coefs, precision, &mut component.plane[start..], stride);
                    }
                }
                component.decoded = true;
            }
        }

        Ok(bits.finish())
    }

    fn finish(mut self) -> Result<RawImage, JpegError> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| JpegError::Malformed("no frame header".into()))?;
        if frame.components.iter().any(|c| !c.decoded) {
            return Err(JpegError::Truncated);
        }

        let channels = frame.components.len();
        let mut samples = Array3::<u16>::zeros((frame.height, frame.width, channels));
        for (ch, c) in frame.components.iter().enumerate() {
            let stride = c.blocks_w * 8;
            for y in 0..frame.height {
                let sy = y * c.v / frame.vmax;
                let row = &c.plane[sy * stride..(sy + 1) * stride];
                for x in 0..frame.width {
                    samples[[y, x, ch]] = row[x * c.h / frame.hmax];
                }
            }
        }

        if channels == 3 && self.wants_color_transform(&frame) {
            ycbcr_to_rgb(&mut samples, frame.precision);
        }

        Ok(RawImage {
            samples,
            precision: frame.precision,
        })
    }

    fn wants_color_transform(&self, frame: &Frame) -> bool {
        match self.adobe_transform {
            Some(t) => t != 0,
            None => {
                let ids: Vec<u8> = frame.components.iter().map(|c| c.id).collect();
                ids != b"RGB"
            }
        }
    }
}

fn decode_block(
    bits: &mut BitReader<'_>,
    dc_table: &HuffmanTable,
    ac_table: &HuffmanTable,
    qtable: &[u16; 64],
    dc_pred: &mut i32,
    coefs: &mut [i32; 64],
) -> Result<(), JpegError> {
    coefs.fill(0);

    let t = dc_table.decode(bits)? as u32;
    if t > 16 {
        return Err(JpegError::Malformed("DC magnitude category out of range".into()));
    }
    let diff = extend(bits.receive(t)?, t);
    *dc_pred = dc_pred.wrapping_add(diff);
    coefs[0] = dc_pred.wrapping_mul(qtable[0] as i32);

    let mut k = 1;
    while k < 64 {
        let rs = ac_table.decode(bits)?;
        let (run, size) = ((rs >> 4) as usize, (rs & 0x0F) as u32);
        if size == 0 {
            if run == 15 {
                k += 16;
                continue;
            }
            break;
        }
        k += run;
        if k > 63 {
            return Err(JpegError::Malformed("AC coefficient index out of range".into()));
        }
        let value = extend(bits.receive(size)?, size);
        coefs[UNZIGZAG[k]] = value * qtable[k] as i32;
        k += 1;
    }
    Ok(())
}

/// JFIF YCbCr to RGB, in place, at the given precision.
fn ycbcr_to_rgb(samples: &mut Array3<u16>, precision: u8) {
    let center = (1u32 << (precision - 1)) as f32;
    let max = ((1u32 << precision) - 1) as f32;
    for mut px in samples.rows_mut() {
        let y = px[0] as f32;
        let cb = px[1] as f32 - center;
        let cr = px[2] as f32 - center;
        px[0] = (y + 1.402 * cr).round().clamp(0.0, max) as u16;
        px[1] = (y - 0.344_136 * cb - 0.714_136 * cr).round().clamp(0.0, max) as u16;
        px[2] = (y + 1.772 * cb).round().clamp(0.0, max) as u16;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unzigzag_is_permutation() {
        let mut seen = [false; 64];
        for &i in UNZIGZAG.iter() {
            assert!(!seen[i]);
            seen[i] = true;
        }
        assert_eq!(UNZIGZAG[2], 8);
        assert_eq!(UNZIGZAG[63], 63);
    }

    #[test]
    fn test_rejects_missing_soi() {
        assert!(matches!(decode(b"not a jpeg"), Err(JpegError::NotJpeg)));
        assert!(matches!(decode(&[]), Err(JpegError::NotJpeg)));
    }

    #[test]
    fn test_soi_eoi_without_frame_is_malformed() {
        assert!(matches!(
            decode(&[0xFF, 0xD8, 0xFF, 0xD9]),
            Err(JpegError::Malformed(_))
        ));
    }

    #[test]
    fn test_progressive_header_is_delegated() {
        // SOI, SOF2 (precision 8, 1x1, one component)
        let data = [
            0xFF, 0xD8, 0xFF, 0xC2, 0x00, 0x0B, 0x08, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11,
            0x00,
        ];
        match decode(&data) {
            Ok(Outcome::Delegate { process, precision }) => {
                assert_eq!(process, Process::Progressive);
                assert_eq!(precision, 8);
            }
            _ => panic!("expected delegation"),
        }
    }

    fn sof1(width: u16, height: u16, count: u8) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8, 0xFF, 0xC1];
        data.extend_from_slice(&(8 + 3 * count as u16).to_be_bytes());
        data.push(12);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.push(count);
        for id in 0..count {
            data.extend_from_slice(&[id, 0x11, 0x00]);
        }
        data
    }

    #[test]
    fn test_oversized_frame_is_rejected_before_allocation() {
        assert!(matches!(
            decode(&sof1(65535, 65535, 1)),
            Err(JpegError::Unsupported(_))
        ));
        assert!(matches!(
            decode(&sof1(65535, 65535, 4)),
            Err(JpegError::Unsupported(_))
        ));
    }

    #[test]
    fn test_component_count_must_be_1_3_or_4() {
        for count in [2u8, 5, 255] {
            assert!(
                matches!(decode(&sof1(8, 8, count)), Err(JpegError::Unsupported(_))),
                "{} components",
                count
            );
        }
        // Accepted header, no scan follows
        assert!(matches!(decode(&sof1(8, 8, 3)), Err(JpegError::Truncated)));
    }

    #[test]
    fn test_arithmetic_coding_unsupported() {
        let data = [
            0xFF, 0xD8, 0xFF, 0xC9, 0x00, 0x0B, 0x0C, 0x00, 0x01, 0x00, 0x01, 0x01, 0x01, 0x11,
            0x00,
        ];
        assert!(matches!(decode(&data), Err(JpegError::Unsupported(_))));
    }

    #[test]
    fn test_ycbcr_neutral_chroma_is_gray() {
        let mut samples = Array3::<u16>::zeros((1, 2, 3));
        samples[[0, 0, 0]] = 1000;
        samples[[0, 0, 1]] = 2048;
        samples[[0, 0, 2]] = 2048;
        samples[[0, 1, 0]] = 4095;
        samples[[0, 1, 1]] = 2048;
        samples[[0, 1, 2]] = 4095;
        ycbcr_to_rgb(&mut samples, 12);
        assert_eq!(samples[[0, 0, 0]], 1000);
        assert_eq!(samples[[0, 0, 1]], 1000);
        assert_eq!(samples[[0, 0, 2]], 1000);
        // Strong red clamps
        assert_eq!(samples[[0, 1, 0]], 4095);
        assert_eq!(samples[[0, 1, 2]], 4095);
    }
}
