//! 12-bit JPEG payload decoding
//!
//! Frames in `.8ij` containers are extended-sequential JPEGs with 12-bit
//! sample precision, which common decoders either reject or truncate.
//! Sequential DCT streams are decoded here at full precision. Progressive
//! and lossless streams go to `jpeg-decoder`.
//!
//! Every decoded buffer is normalized to the 12-bit domain `[0, 4095]` so
//! depth reduction sees one sample range regardless of source precision.

mod decoder;
mod huffman;
mod idct;

use ndarray::Array3;
use thiserror::Error;

use decoder::{Outcome, Process, RawImage};

/// Upper bound of the normalized sample domain
pub const SAMPLE_MAX: u16 = 4095;
const SAMPLE_PRECISION: u8 = 12;

#[derive(Debug, Error)]
pub enum JpegError {
    #[error("Not a JPEG stream (missing SOI)")]
    NotJpeg,

    #[error("JPEG stream is truncated")]
    Truncated,

    #[error("Malformed JPEG: {0}")]
    Malformed(String),

    #[error("Unsupported JPEG feature: {0}")]
    Unsupported(String),

    #[error("Fallback decoder failed: {0}")]
    Fallback(#[from] jpeg_decoder::Error),
}

/// Decoded samples, `height x width x channels`, in `[0, SAMPLE_MAX]`
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    pub samples: Array3<u16>,
    /// Bits per sample of the encoded stream
    pub source_precision: u8,
}

impl SampleBuffer {
    pub fn height(&self) -> usize {
        self.samples.dim().0
    }

    pub fn width(&self) -> usize {
        self.samples.dim().1
    }

    pub fn channels(&self) -> usize {
        self.samples.dim().2
    }
}

/// Decode one JPEG payload.
pub fn decode(payload: &[u8]) -> Result<SampleBuffer, JpegError> {
    let raw = match decoder::decode(payload)? {
        Outcome::Decoded(raw) => raw,
        Outcome::Delegate { process, precision } => decode_fallback(payload, process, precision)?,
    };
    Ok(normalize(raw))
}

fn decode_fallback(payload: &[u8], process: Process, precision: u8) -> Result<RawImage, JpegError> {
    use jpeg_decoder::PixelFormat;

    tracing::debug!("delegating {:?} JPEG ({}-bit) to jpeg-decoder", process, precision);

    let mut decoder = jpeg_decoder::Decoder::new(payload);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or_else(|| JpegError::Malformed("missing frame info".into()))?;
    let (height, width) = (info.height as usize, info.width as usize);

    let (channels, precision, values): (usize, u8, Vec<u16>) = match info.pixel_format {
        PixelFormat::L8 => (1, 8, pixels.iter().map(|&v| v as u16).collect()),
        PixelFormat::L16 => (
            1,
            precision.clamp(2, 16),
            pixels
                .chunks_exact(2)
                .map(|b| u16::from_be_bytes([b[0], b[1]]))
                .collect(),
        ),
        PixelFormat::RGB24 => (3, 8, pixels.iter().map(|&v| v as u16).collect()),
        PixelFormat::CMYK32 => (4, 8, pixels.iter().map(|&v| v as u16).collect()),
    };

    let samples = Array3::from_shape_vec((height, width, channels), values)
        .map_err(|e| JpegError::Malformed(format!("fallback output shape: {}", e)))?;
    Ok(RawImage { samples, precision })
}

/// Rescale samples of any precision into `[0, SAMPLE_MAX]`.
fn normalize(raw: RawImage) -> SampleBuffer {
    let RawImage {
        mut samples,
        precision,
    } = raw;

    if precision != SAMPLE_PRECISION {
        let source_max = ((1u32 << precision) - 1) as f64;
        let factor = SAMPLE_MAX as f64 / source_max;
        samples.mapv_inplace(|v| {
            ((v.min(source_max as u16) as f64) * factor).round().min(SAMPLE_MAX as f64) as u16
        });
    }

    SampleBuffer {
        samples,
        source_precision: precision,
    }
}
