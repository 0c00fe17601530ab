use crate::error::DetectError;

/// Pixel layout of a caller-supplied buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// Grayscale image with row-major pixel data.
#[derive(Debug, Clone)]
pub struct ImageU8 {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub buf: Vec<u8>,
}

/// The camera frame handed to the detector.
pub type Frame = ImageU8;

impl ImageU8 {
    /// Create a new image filled with zeros.
    pub fn new(width: u32, height: u32) -> Self {
        let stride = width;
        let buf = vec![0u8; (stride * height) as usize];
        Self {
            width,
            height,
            stride,
            buf,
        }
    }

    /// Create an image filled with `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> Self {
        let mut img = Self::new(width, height);
        img.buf.fill(value);
        img
    }

    /// Create an image from existing grayscale pixel data.
    pub fn from_buf(width: u32, height: u32, stride: u32, buf: Vec<u8>) -> Result<Self, DetectError> {
        if stride < width {
            return Err(DetectError::InvalidInput(format!(
                "stride {stride} is smaller than width {width}"
            )));
        }
        let needed = stride as usize * height as usize;
        if buf.len() < needed {
            return Err(DetectError::InvalidInput(format!(
                "buffer holds {} bytes, {width}x{height} with stride {stride} needs {needed}",
                buf.len()
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            buf,
        })
    }

    /// Convert a tightly packed buffer in any supported format to grayscale
    /// (ITU-R BT.601 luma).
    pub fn from_pixels(
        width: u32,
        height: u32,
        format: PixelFormat,
        pixels: &[u8],
    ) -> Result<Self, DetectError> {
        let channels = format.channels();
        let needed = width as usize * height as usize * channels;
        if pixels.len() < needed {
            return Err(DetectError::InvalidInput(format!(
                "{format:?} buffer holds {} bytes, {width}x{height} needs {needed}",
                pixels.len()
            )));
        }
        let buf = match format {
            PixelFormat::Gray8 => pixels[..needed].to_vec(),
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => pixels[..needed]
                .chunks_exact(channels)
                .map(|px| {
                    let y = 299 * px[0] as u32 + 587 * px[1] as u32 + 114 * px[2] as u32;
                    ((y + 500) / 1000) as u8
                })
                .collect(),
        };
        Self::from_buf(width, height, width, buf)
    }

    /// True when the image has no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get the pixel value at (x, y).
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> u8 {
        self.buf[(y * self.stride + x) as usize]
    }

    /// Set the pixel value at (x, y).
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, val: u8) {
        self.buf[(y * self.stride + x) as usize] = val;
    }

    /// Bilinear interpolation at sub-pixel coordinates.
    ///
    /// Pixel `(i, j)` has its centre at `(i + 0.5, j + 0.5)`; samples outside
    /// the image are clamped to the border.
    pub fn interpolate(&self, px: f64, py: f64) -> f64 {
        let x = px - 0.5;
        let y = py - 0.5;
        let x0 = x.floor() as i64;
        let y0 = y.floor() as i64;
        let x1 = x0 + 1;
        let y1 = y0 + 1;

        let fx = x - x0 as f64;
        let fy = y - y0 as f64;

        let w = self.width as i64;
        let h = self.height as i64;

        let clamp_x = |v: i64| v.clamp(0, w - 1) as u32;
        let clamp_y = |v: i64| v.clamp(0, h - 1) as u32;

        let v00 = self.get(clamp_x(x0), clamp_y(y0)) as f64;
        let v10 = self.get(clamp_x(x1), clamp_y(y0)) as f64;
        let v01 = self.get(clamp_x(x0), clamp_y(y1)) as f64;
        let v11 = self.get(clamp_x(x1), clamp_y(y1)) as f64;

        v00 * (1.0 - fx) * (1.0 - fy)
            + v10 * fx * (1.0 - fy)
            + v01 * (1.0 - fx) * fy
            + v11 * fx * fy
    }
}
