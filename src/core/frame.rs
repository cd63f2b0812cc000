//! Decoded frame handle and fetch errors
//!
//! **Why**: The cache hands the same image to the player, the renderer and
//! the control API. `Frame` is a cheap `Arc` clone so a cache hit never copies
//! pixels, and identity can be checked with [`Frame::ptr_eq`].
//!
//! **Used by**: FrameSource implementations (decode), FrameProvider (cache
//! values), PlayerModel (fit geometry), PlayerUpdateEvent (render snapshot)

use std::sync::Arc;

use image::RgbaImage;

/// Immutable decoded image data
#[derive(Debug)]
struct FrameData {
    index: i32,
    width: u32,
    height: u32,
    pixels: RgbaImage,
}

/// One decoded frame of the sequence
#[derive(Debug, Clone)]
pub struct Frame {
    data: Arc<FrameData>,
}

/// Frame fetch/decode errors
#[derive(Debug, Clone, PartialEq)]
pub enum FetchError {
    /// Transport failed before a response arrived (connect, timeout, IO)
    Transport(String),
    /// Server answered with a non-success status
    Status(u16),
    /// Payload could not be decoded as an image
    Decode(String),
    /// Frame index has no backing image
    NotFound(i32),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transport(e) => write!(f, "Transport error: {}", e),
            FetchError::Status(code) => write!(f, "Server returned HTTP {}", code),
            FetchError::Decode(e) => write!(f, "Decode error: {}", e),
            FetchError::NotFound(idx) => write!(f, "Frame {} not found", idx),
        }
    }
}

impl std::error::Error for FetchError {}

impl Frame {
    /// Wrap already decoded RGBA pixels
    pub fn from_rgba(index: i32, pixels: RgbaImage) -> Self {
        let (width, height) = pixels.dimensions();
        Self {
            data: Arc::new(FrameData {
                index,
                width,
                height,
                pixels,
            }),
        }
    }

    /// Decode an encoded image payload (PNG, JPEG, TIFF, BMP)
    pub fn decode(index: i32, bytes: &[u8]) -> Result<Self, FetchError> {
        let img = image::load_from_memory(bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(Self::from_rgba(index, img.to_rgba8()))
    }

    /// Solid placeholder frame (tests, synthetic sources)
    pub fn solid(index: i32, width: u32, height: u32) -> Self {
        let pixels = RgbaImage::from_pixel(width, height, image::Rgba([0, 100, 0, 255]));
        Self::from_rgba(index, pixels)
    }

    pub fn index(&self) -> i32 {
        self.data.index
    }

    pub fn width(&self) -> u32 {
        self.data.width
    }

    pub fn height(&self) -> u32 {
        self.data.height
    }

    /// Raw RGBA8 pixels, row-major
    pub fn pixels(&self) -> &[u8] {
        self.data.pixels.as_raw()
    }

    /// Approximate memory footprint in bytes
    pub fn mem(&self) -> usize {
        self.data.pixels.as_raw().len()
    }

    /// True if both handles point at the same decoded image
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageFormat;
    use std::io::Cursor;

    #[test]
    fn test_decode_png() {
        let img = RgbaImage::from_pixel(4, 3, image::Rgba([255, 0, 0, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png).unwrap();

        let frame = Frame::decode(7, &bytes).unwrap();
        assert_eq!(frame.index(), 7);
        assert_eq!((frame.width(), frame.height()), (4, 3));
        assert_eq!(&frame.pixels()[0..4], &[255, 0, 0, 255]);
        assert_eq!(frame.mem(), 4 * 3 * 4);
    }

    #[test]
    fn test_decode_garbage_is_error() {
        let err = Frame::decode(0, b"definitely not an image").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn test_clone_shares_data() {
        let a = Frame::solid(0, 2, 2);
        let b = a.clone();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&Frame::solid(0, 2, 2)));
    }
}
