use thiserror::Error;

use crate::jpeg::JpegError;

/// Conditions that end parsing of one container stream.
#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("Invalid frame magic {found:?} at offset {offset}")]
    BadMagic { offset: u64, found: [u8; 4] },

    #[error("Incomplete frame {frame_index} at offset {offset}: declared {declared} bytes, {available} available")]
    Incomplete {
        frame_index: u32,
        offset: u64,
        declared: u32,
        available: u64,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Container error: {0}")]
    Container(#[from] ContainerError),

    #[error("Decode failed: {0}")]
    Decode(#[from] JpegError),

    #[error("Unexpected image shape: {channels} channels")]
    UnexpectedShape { channels: usize },

    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, ConvertError>;
