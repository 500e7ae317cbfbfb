/// Frame capture: the source interface and a synthetic test source.
///
/// Real screen capture sits behind [`FrameSource`]; the producer loop only
/// sees [`RawFrame`]s.

use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::CaptureError;

/// Pixel layout of a captured frame. Four-byte formats name channels from
/// most to least significant byte of a little-endian u32.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Bytes in memory: B, G, R, X.
    Xrgb8888,
    /// Bytes in memory: R, G, B, X.
    Xbgr8888,
    /// Bytes in memory: R, G, B.
    Rgb888,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Xrgb8888 | PixelFormat::Xbgr8888 => 4,
            PixelFormat::Rgb888 => 3,
        }
    }

    #[inline]
    fn rgb_at(self, px: &[u8]) -> [u8; 3] {
        match self {
            PixelFormat::Xrgb8888 => [px[2], px[1], px[0]],
            PixelFormat::Xbgr8888 | PixelFormat::Rgb888 => [px[0], px[1], px[2]],
        }
    }
}

/// One captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, at least `width * bytes_per_pixel`.
    pub stride: usize,
    pub format: PixelFormat,
    pub data: Vec<u8>,
    /// Rows are stored bottom-up.
    pub y_invert: bool,
}

impl RawFrame {
    fn check(&self) -> Result<(), CaptureError> {
        let row = self.width as usize * self.format.bytes_per_pixel();
        let needed = if self.height == 0 {
            0
        } else {
            self.stride * (self.height as usize - 1) + row
        };
        if self.stride < row || self.data.len() < needed {
            return Err(CaptureError::ShortBuffer {
                len: self.data.len(),
                width: self.width,
                height: self.height,
                stride: self.stride,
            });
        }
        Ok(())
    }

    /// Packed top-down RGB888 copy of the frame.
    pub fn to_rgb(&self) -> Result<Vec<u8>, CaptureError> {
        self.check()?;
        let bpp = self.format.bytes_per_pixel();
        let (w, h) = (self.width as usize, self.height as usize);
        let mut rgb = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            let src_y = if self.y_invert { h - 1 - y } else { y };
            let row = &self.data[src_y * self.stride..src_y * self.stride + w * bpp];
            for px in row.chunks_exact(bpp) {
                rgb.extend_from_slice(&self.format.rgb_at(px));
            }
        }
        Ok(rgb)
    }

    /// Copy out a sub-rectangle, keeping format and orientation. Region
    /// coordinates are in display space (top-down).
    pub fn crop(&self, region: &Region) -> Result<RawFrame, CaptureError> {
        self.check()?;
        if !region.fits(self.width, self.height) {
            return Err(CaptureError::RegionOutOfBounds {
                region: region.to_string(),
                width: self.width,
                height: self.height,
            });
        }
        let bpp = self.format.bytes_per_pixel();
        let row_bytes = region.width as usize * bpp;
        let mut data = Vec::with_capacity(row_bytes * region.height as usize);
        for y in 0..region.height as usize {
            let display_y = region.y as usize + y;
            let src_y = if self.y_invert {
                self.height as usize - 1 - display_y
            } else {
                display_y
            };
            let start = src_y * self.stride + region.x as usize * bpp;
            data.extend_from_slice(&self.data[start..start + row_bytes]);
        }
        if self.y_invert {
            // Rows were gathered top-down; restore bottom-up storage.
            let rows: Vec<&[u8]> = data.chunks_exact(row_bytes).rev().collect();
            data = rows.concat();
        }
        Ok(RawFrame {
            width: region.width,
            height: region.height,
            stride: row_bytes,
            format: self.format,
            data,
            y_invert: self.y_invert,
        })
    }
}

/// Capture rectangle in display coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn fits(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.checked_add(self.width).is_some_and(|r| r <= width)
            && self.y.checked_add(self.height).is_some_and(|b| b <= height)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

impl FromStr for Region {
    type Err = String;

    /// Parses `x,y,w,h`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("bad region {s:?}: {e}"))?;
        match parts.as_slice() {
            [x, y, w, h] if *w > 0 && *h > 0 => Ok(Region {
                x: *x,
                y: *y,
                width: *w,
                height: *h,
            }),
            _ => Err(format!("bad region {s:?}: expected x,y,w,h with non-zero size")),
        }
    }
}

/// Source of raw frames. `next_frame` may block until a frame is ready.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        (**self).next_frame()
    }
}

/// Applies a fixed capture region to another source.
pub struct Cropped<S> {
    inner: S,
    region: Region,
}

impl<S: FrameSource> Cropped<S> {
    pub fn new(inner: S, region: Region) -> Self {
        Cropped { inner, region }
    }
}

impl<S: FrameSource> FrameSource for Cropped<S> {
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        self.inner.next_frame()?.crop(&self.region)
    }
}

/// Synthetic XRGB8888 source: a diagonal gradient that scrolls one step per
/// frame, delivered at a fixed refresh rate like a compositor would.
pub struct TestPattern {
    width: u32,
    height: u32,
    refresh: Option<Duration>,
    frame: u32,
    last: Option<Instant>,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, refresh_hz: u32) -> Self {
        let refresh = if refresh_hz == 0 {
            None
        } else {
            Some(Duration::from_secs(1) / refresh_hz)
        };
        TestPattern {
            width,
            height,
            refresh,
            frame: 0,
            last: None,
        }
    }

    fn render(&self) -> RawFrame {
        let stride = self.width as usize * 4;
        let mut data = vec![0u8; stride * self.height as usize];
        let shift = self.frame as usize * 4;
        for (y, row) in data.chunks_exact_mut(stride).enumerate() {
            for (x, px) in row.chunks_exact_mut(4).enumerate() {
                let v = (x + y + shift) as u8;
                px[0] = v;
                px[1] = (y * 255 / self.height.max(1) as usize) as u8;
                px[2] = v.wrapping_mul(3);
                px[3] = 0xFF;
            }
        }
        RawFrame {
            width: self.width,
            height: self.height,
            stride,
            format: PixelFormat::Xrgb8888,
            data,
            y_invert: false,
        }
    }
}

impl FrameSource for TestPattern {
    fn next_frame(&mut self) -> Result<RawFrame, CaptureError> {
        if let (Some(refresh), Some(last)) = (self.refresh, self.last) {
            let elapsed = last.elapsed();
            if elapsed < refresh {
                thread::sleep(refresh - elapsed);
            }
        }
        self.last = Some(Instant::now());
        let frame = self.render();
        self.frame = self.frame.wrapping_add(1);
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_2x2(format: PixelFormat, y_invert: bool) -> RawFrame {
        // Top-left red, top-right green, bottom-left blue, bottom-right white,
        // with two bytes of row padding.
        let px = |r: u8, g: u8, b: u8| -> Vec<u8> {
            match format {
                PixelFormat::Xrgb8888 => vec![b, g, r, 0],
                PixelFormat::Xbgr8888 => vec![r, g, b, 0],
                PixelFormat::Rgb888 => vec![r, g, b],
            }
        };
        let mut top = [px(255, 0, 0), px(0, 255, 0)].concat();
        top.extend_from_slice(&[9, 9]);
        let mut bottom = [px(0, 0, 255), px(255, 255, 255)].concat();
        bottom.extend_from_slice(&[9, 9]);
        let stride = top.len();
        let data = if y_invert {
            [bottom, top].concat()
        } else {
            [top, bottom].concat()
        };
        RawFrame {
            width: 2,
            height: 2,
            stride,
            format,
            data,
            y_invert,
        }
    }

    const EXPECTED: [u8; 12] = [255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255];

    #[test]
    fn converts_every_format_to_rgb() {
        for format in [PixelFormat::Xrgb8888, PixelFormat::Xbgr8888, PixelFormat::Rgb888] {
            for invert in [false, true] {
                let rgb = frame_2x2(format, invert).to_rgb().unwrap();
                assert_eq!(rgb, EXPECTED, "{format:?} invert={invert}");
            }
        }
    }

    #[test]
    fn short_buffer_rejected() {
        let mut frame = frame_2x2(PixelFormat::Xrgb8888, false);
        frame.data.truncate(10);
        assert!(matches!(frame.to_rgb(), Err(CaptureError::ShortBuffer { .. })));
    }

    #[test]
    fn crop_respects_orientation() {
        let region = Region {
            x: 1,
            y: 1,
            width: 1,
            height: 1,
        };
        for invert in [false, true] {
            let cropped = frame_2x2(PixelFormat::Xbgr8888, invert).crop(&region).unwrap();
            assert_eq!(cropped.to_rgb().unwrap(), vec![255, 255, 255]);
        }

        let bottom_row = Region {
            x: 0,
            y: 1,
            width: 2,
            height: 1,
        };
        let cropped = frame_2x2(PixelFormat::Rgb888, true).crop(&bottom_row).unwrap();
        assert_eq!(cropped.to_rgb().unwrap(), EXPECTED[6..].to_vec());
    }

    #[test]
    fn crop_out_of_bounds() {
        let region = Region {
            x: 1,
            y: 0,
            width: 2,
            height: 1,
        };
        let err = frame_2x2(PixelFormat::Rgb888, false).crop(&region).unwrap_err();
        assert!(matches!(err, CaptureError::RegionOutOfBounds { .. }));
    }

    #[test]
    fn region_parsing() {
        let r: Region = "10, 20,640,480".parse().unwrap();
        assert_eq!(
            r,
            Region {
                x: 10,
                y: 20,
                width: 640,
                height: 480
            }
        );
        assert_eq!(r.to_string(), "10,20,640,480");
        assert!("1,2,3".parse::<Region>().is_err());
        assert!("0,0,0,10".parse::<Region>().is_err());
        assert!("a,b,c,d".parse::<Region>().is_err());
    }

    #[test]
    fn test_pattern_moves() {
        let mut source = TestPattern::new(16, 8, 0);
        let a = source.next_frame().unwrap();
        let b = source.next_frame().unwrap();
        assert_eq!(a.data.len(), 16 * 8 * 4);
        assert_ne!(a.data, b.data);
        assert_eq!(a.to_rgb().unwrap().len(), 16 * 8 * 3);
    }

    #[test]
    fn cropped_source() {
        let region = Region {
            x: 4,
            y: 2,
            width: 8,
            height: 4,
        };
        let mut source = Cropped::new(TestPattern::new(16, 8, 0), region);
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 4));
    }
}
