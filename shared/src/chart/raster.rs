//! RGB raster canvas and PNG encoding.
//!
//! The canvas supports the handful of primitives a line chart needs. Encoding
//! writes an 8-bit truecolor PNG with a zlib-compressed image stream. The
//! encoder is deterministic for a given canvas and title.

use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{self, Write as _};

/// An RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// A fixed-size RGB image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Canvas {
    /// Creates a canvas filled with `background`.
    #[must_use]
    pub fn new(width: u32, height: u32, background: Rgb) -> Self {
        let len = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(len * 3);
        for _ in 0..len {
            pixels.extend_from_slice(&[background.0, background.1, background.2]);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Canvas width in pixels.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Canvas height in pixels.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the color at `(x, y)`, if inside the canvas.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgb> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some(Rgb(self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]))
    }

    /// Sets a pixel; coordinates outside the canvas are ignored.
    pub fn set(&mut self, x: i64, y: i64, color: Rgb) {
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return;
        };
        if x >= self.width || y >= self.height {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[i] = color.0;
        self.pixels[i + 1] = color.1;
        self.pixels[i + 2] = color.2;
    }

    /// Draws a straight line between two points (Bresenham).
    pub fn line(&mut self, from: (i64, i64), to: (i64, i64), color: Rgb) {
        let (mut x, mut y) = from;
        let dx = (to.0 - x).abs();
        let dy = -(to.1 - y).abs();
        let sx = if x < to.0 { 1 } else { -1 };
        let sy = if y < to.1 { 1 } else { -1 };
        let mut err = dx + dy;

        loop {
            self.set(x, y, color);
            if x == to.0 && y == to.1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Fills a square of side `2 * radius + 1` centred on `(x, y)`.
    pub fn dot(&mut self, x: i64, y: i64, radius: i64, color: Rgb) {
        for py in (y - radius)..=(y + radius) {
            for px in (x - radius)..=(x + radius) {
                self.set(px, py, color);
            }
        }
    }

    /// Encodes the canvas as PNG, embedding `title` as a `tEXt` chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the image stream cannot be compressed.
    pub fn to_png(&self, title: &str) -> io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1024);
        out.extend_from_slice(&PNG_SIGNATURE);

        let mut header = Vec::with_capacity(13);
        header.extend_from_slice(&self.width.to_be_bytes());
        header.extend_from_slice(&self.height.to_be_bytes());
        // bit depth 8, color type 2 (RGB), deflate, adaptive filtering, no interlace
        header.extend_from_slice(&[8, 2, 0, 0, 0]);
        write_chunk(&mut out, b"IHDR", &header);

        let mut text = b"Title\0".to_vec();
        text.extend(title.chars().map(|c| u8::try_from(c).unwrap_or(b'?')));
        write_chunk(&mut out, b"tEXt", &text);

        let row_len = self.width as usize * 3;
        let mut raw = Vec::with_capacity((row_len + 1) * self.height as usize);
        for row in self.pixels.chunks(row_len.max(1)) {
            raw.push(0); // filter type: none
            raw.extend_from_slice(row);
        }
        write_chunk(&mut out, b"IDAT", &zlib(&raw)?);
        write_chunk(&mut out, b"IEND", &[]);
        Ok(out)
    }
}

fn write_chunk(out: &mut Vec<u8>, kind: &[u8; 4], data: &[u8]) {
    let len = u32::try_from(data.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(kind);
    out.extend_from_slice(data);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(kind);
    hasher.update(data);
    out.extend_from_slice(&hasher.finalize().to_be_bytes());
}

fn zlib(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 8), Compression::best());
    encoder.write_all(data)?;
    encoder.finish()
}
