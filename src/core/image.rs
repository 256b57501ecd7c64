use std::io::Cursor;
use std::path::Path;

use crate::core::Result;

/// A decoded RGB8 image.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl ImageData {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != (width * height * 3) as usize {
            anyhow::bail!(
                "pixel buffer length {} does not match {}x{} rgb image",
                pixels.len(),
                width,
                height
            );
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let img: image::RgbImage =
            image::ImageBuffer::from_raw(self.width, self.height, self.pixels.clone())
                .ok_or_else(|| anyhow::anyhow!("invalid image buffer"))?;
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    pub fn save_png(&self, path: &Path) -> Result<()> {
        let img: image::RgbImage =
            image::ImageBuffer::from_raw(self.width, self.height, self.pixels.clone())
                .ok_or_else(|| anyhow::anyhow!("invalid image buffer"))?;
        img.save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_length_checked() {
        assert!(ImageData::new(2, 2, vec![0; 12]).is_ok());
        assert!(ImageData::new(2, 2, vec![0; 11]).is_err());
    }

    #[test]
    fn test_png_roundtrip() {
        let img = ImageData::new(2, 1, vec![255, 0, 0, 0, 255, 0]).unwrap();
        let png = img.to_png_bytes().unwrap();
        let decoded = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(decoded.width(), 2);
        assert_eq!(decoded.height(), 1);
        assert_eq!(decoded.into_raw(), img.pixels);
    }
}
