//! Rendered page bitmaps and their encodings.

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use pdf_engine::RgbaImage;
use std::io::Cursor;

/// Compressed bitmap encoding for rendered pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFormat {
    /// Lossy; `quality` is 1-100.
    Jpeg { quality: u8 },
    Png,
}

impl PageFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            PageFormat::Jpeg { .. } => "image/jpeg",
            PageFormat::Png => "image/png",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            PageFormat::Jpeg { .. } => "jpg",
            PageFormat::Png => "png",
        }
    }
}

impl Default for PageFormat {
    fn default() -> Self {
        PageFormat::Jpeg { quality: 70 }
    }
}

/// One rasterized page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    /// Zero-based page index
    pub index: u32,

    /// Bitmap width in pixels
    pub width: u32,

    /// Bitmap height in pixels
    pub height: u32,

    pub format: PageFormat,

    /// Encoded image bytes
    pub bytes: Vec<u8>,
}

impl RenderedPage {
    /// Encode a raw RGBA surface.
    pub fn encode(
        index: u32,
        surface: RgbaImage,
        format: PageFormat,
    ) -> Result<Self, image::ImageError> {
        let (width, height) = surface.dimensions();
        let mut bytes = Vec::new();

        match format {
            PageFormat::Jpeg { quality } => {
                // JPEG has no alpha channel.
                let rgb = DynamicImage::ImageRgba8(surface).to_rgb8();
                let mut encoder = JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100));
                encoder.encode_image(&rgb)?;
            }
            PageFormat::Png => {
                surface.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
            }
        }

        Ok(Self { index, width, height, format, bytes })
    }

    pub fn mime_type(&self) -> &'static str {
        self.format.mime_type()
    }

    /// `data:` URI carrying the encoded bitmap.
    pub fn data_uri(&self) -> String {
        let payload = base64::engine::general_purpose::STANDARD.encode(&self.bytes);
        format!("data:{};base64,{}", self.mime_type(), payload)
    }

    /// Bytes held by this page.
    pub fn memory_size(&self) -> usize {
        self.bytes.len()
    }

    /// 1-based page number, as shown to readers.
    pub fn number(&self) -> u32 {
        self.index + 1
    }
}
