//! Continuity frame resizing.

use std::io::Cursor;

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};

use crate::error::{MediaError, MediaResult};

/// Resizes an encoded image to exact pixel dimensions.
#[async_trait]
pub trait FrameResizer: Send + Sync {
    /// Scale `bytes` to `width`x`height` (fill; aspect ratio is not kept)
    /// and return JPEG bytes.
    async fn resize(&self, bytes: Vec<u8>, width: u32, height: u32) -> MediaResult<Vec<u8>>;
}

/// [`FrameResizer`] backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageResizer {
    pub jpeg_quality: u8,
}

impl Default for ImageResizer {
    fn default() -> Self {
        Self { jpeg_quality: 92 }
    }
}

impl ImageResizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn resize_blocking(bytes: &[u8], width: u32, height: u32, quality: u8) -> MediaResult<Vec<u8>> {
        if width == 0 || height == 0 {
            return Err(MediaError::image_failed(format!(
                "invalid target size {}x{}",
                width, height
            )));
        }

        let img = image::load_from_memory(bytes)
            .map_err(|e| MediaError::image_failed(format!("decode failed: {}", e)))?;

        let resized = if img.width() == width && img.height() == height {
            img
        } else {
            img.resize_exact(width, height, FilterType::Lanczos3)
        };

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
        let mut out = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Jpeg(quality))
            .map_err(|e| MediaError::image_failed(format!("encode failed: {}", e)))?;
        Ok(out)
    }
}

#[async_trait]
impl FrameResizer for ImageResizer {
    async fn resize(&self, bytes: Vec<u8>, width: u32, height: u32) -> MediaResult<Vec<u8>> {
        let quality = self.jpeg_quality;
        tokio::task::spawn_blocking(move || Self::resize_blocking(&bytes, width, height, quality))
            .await
            .map_err(|e| MediaError::internal(format!("resize task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbaImage;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(
            width,
            height,
            image::Rgba([200, 40, 40, 255]),
        ));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), ImageOutputFormat::Png)
            .unwrap();
        out
    }

    #[tokio::test]
    async fn test_resize_fills_exact_dimensions() {
        let resizer = ImageResizer::new();
        let out = resizer.resize(png(16, 9), 72, 128).await.unwrap();

        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (72, 128));
        assert_eq!(&out[..2], &[0xFF, 0xD8], "output is JPEG");
    }

    #[tokio::test]
    async fn test_resize_rejects_garbage() {
        let resizer = ImageResizer::new();
        let err = resizer.resize(b"not an image".to_vec(), 10, 10).await.unwrap_err();
        assert!(matches!(err, MediaError::ImageFailed(_)));
    }

    #[tokio::test]
    async fn test_resize_rejects_zero_size() {
        let resizer = ImageResizer::new();
        assert!(resizer.resize(png(4, 4), 0, 10).await.is_err());
    }
}
