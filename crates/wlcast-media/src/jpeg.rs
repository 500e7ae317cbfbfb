/// JPEG encode and decode for video frames.

use std::io::Cursor;

use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::{ImageBuffer, ImageDecoder, RgbImage};
use tracing::debug;

use crate::capture::RawFrame;
use crate::error::{DecodeError, EncodeError};

/// Compresses raw frames at an adjustable quality (1..=100).
pub trait FrameEncoder {
    fn encode(&mut self, frame: &RawFrame) -> Result<Vec<u8>, EncodeError>;
    fn set_quality(&mut self, quality: u8);
    fn quality(&self) -> u8;
}

/// Decompresses received frames.
pub trait FrameDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<DecodedImage, DecodeError>;
}

/// Packed top-down RGB888 image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

pub struct JpegFrameEncoder {
    quality: u8,
}

impl JpegFrameEncoder {
    pub fn new(quality: u8) -> Self {
        JpegFrameEncoder {
            quality: quality.clamp(1, 100),
        }
    }
}

impl FrameEncoder for JpegFrameEncoder {
    fn encode(&mut self, frame: &RawFrame) -> Result<Vec<u8>, EncodeError> {
        let rgb = frame.to_rgb()?;
        let img: RgbImage = ImageBuffer::from_raw(frame.width, frame.height, rgb)
            .ok_or(EncodeError::Dimensions(frame.width, frame.height))?;

        let mut buf = Cursor::new(Vec::new());
        let encoder = JpegEncoder::new_with_quality(&mut buf, self.quality);
        img.write_with_encoder(encoder)?;
        Ok(buf.into_inner())
    }

    fn set_quality(&mut self, quality: u8) {
        let quality = quality.clamp(1, 100);
        if quality != self.quality {
            debug!(from = self.quality, to = quality, "jpeg quality changed");
        }
        self.quality = quality;
    }

    fn quality(&self) -> u8 {
        self.quality
    }
}

#[derive(Default)]
pub struct JpegFrameDecoder;

impl FrameDecoder for JpegFrameDecoder {
    fn decode(&mut self, data: &[u8]) -> Result<DecodedImage, DecodeError> {
        let decoder = JpegDecoder::new(Cursor::new(data))?;
        let (width, height) = decoder.dimensions();
        let total_bytes = decoder.total_bytes() as usize;

        let mut rgb = vec![0u8; total_bytes];
        decoder.read_image(&mut rgb)?;

        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(DecodeError::SizeMismatch {
                expected,
                got: rgb.len(),
            });
        }
        Ok(DecodedImage { width, height, rgb })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{FrameSource, TestPattern};

    #[test]
    fn encode_then_decode_keeps_dimensions() {
        let frame = TestPattern::new(64, 48, 0).next_frame().unwrap();
        let mut encoder = JpegFrameEncoder::new(80);
        let jpeg = encoder.encode(&frame).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);

        let image = JpegFrameDecoder.decode(&jpeg).unwrap();
        assert_eq!((image.width, image.height), (64, 48));
        assert_eq!(image.rgb.len(), 64 * 48 * 3);
    }

    #[test]
    fn lower_quality_shrinks_output() {
        let frame = TestPattern::new(128, 96, 0).next_frame().unwrap();
        let mut encoder = JpegFrameEncoder::new(95);
        let high = encoder.encode(&frame).unwrap();
        encoder.set_quality(30);
        assert_eq!(encoder.quality(), 30);
        let low = encoder.encode(&frame).unwrap();
        assert!(low.len() < high.len(), "{} >= {}", low.len(), high.len());
    }

    #[test]
    fn quality_clamped() {
        let mut encoder = JpegFrameEncoder::new(0);
        assert_eq!(encoder.quality(), 1);
        encoder.set_quality(200);
        assert_eq!(encoder.quality(), 100);
    }

    #[test]
    fn garbage_does_not_decode() {
        assert!(JpegFrameDecoder.decode(b"not a jpeg").is_err());
        assert!(JpegFrameDecoder.decode(&[]).is_err());
    }
}
