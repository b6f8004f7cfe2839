//! 8-bit frame output

use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

use crate::depth::RasterBuffer;
use crate::error::{ConvertError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Tiff,
}

impl OutputFormat {
    pub fn extension(&self) -> &str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Tiff => "tiff",
        }
    }

    fn image_format(&self) -> ImageFormat {
        match self {
            OutputFormat::Png => ImageFormat::Png,
            OutputFormat::Tiff => ImageFormat::Tiff,
        }
    }
}

/// `{stem}_frame_{index:06}.{ext}`; zero padding keeps lexical order equal
/// to frame order.
pub fn frame_file_name(stem: &str, frame_index: u32, format: OutputFormat) -> String {
    format!("{}_frame_{:06}.{}", stem, frame_index, format.extension())
}

/// Create `dir` and its parents. Succeeds if another worker got there first.
pub fn ensure_dir(dir: impl AsRef<Path>) -> Result<()> {
    std::fs::create_dir_all(dir.as_ref())?;
    Ok(())
}

/// Write one frame into `dir`, returning the file path.
///
/// One channel is saved as grayscale, three as RGB. Anything else is
/// rejected without touching the filesystem.
pub fn write_frame(
    raster: &RasterBuffer,
    dir: &Path,
    stem: &str,
    frame_index: u32,
    format: OutputFormat,
) -> Result<PathBuf> {
    let (height, width, channels) = raster.pixels.dim();
    if channels != 1 && channels != 3 {
        return Err(ConvertError::UnexpectedShape { channels });
    }

    let data: Vec<u8> = match raster.pixels.as_slice() {
        Some(slice) => slice.to_vec(),
        None => raster.pixels.iter().copied().collect(),
    };

    let path = dir.join(frame_file_name(stem, frame_index, format));
    let (w, h) = (width as u32, height as u32);
    let shape_error = || ConvertError::UnexpectedShape { channels };

    if channels == 1 {
        GrayImage::from_raw(w, h, data)
            .ok_or_else(shape_error)?
            .save_with_format(&path, format.image_format())?;
    } else {
        RgbImage::from_raw(w, h, data)
            .ok_or_else(shape_error)?
            .save_with_format(&path, format.image_format())?;
    }

    Ok(path)
}
