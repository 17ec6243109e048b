use crate::config::UploadConfig;
use image::{DynamicImage, ImageFormat, ImageReader, Limits};
use std::io::Cursor;
use thiserror::Error;

pub const SUPPORTED_FORMATS: [ImageFormat; 4] = [
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
];

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unrecognized image data")]
    UnknownFormat,
    #[error("Unsupported image format: {0:?}")]
    UnsupportedFormat(ImageFormat),
    #[error("Image dimensions {width}x{height} exceed the limit of {max_pixels} pixels")]
    DimensionsTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },
    #[error("Image has zero width or height")]
    EmptyImage,
    #[error("Corrupt or unsupported image data: {0}")]
    Malformed(#[from] image::ImageError),
    #[error("Failed to read image data: {0}")]
    Io(#[from] std::io::Error),
}

/// An uploaded image decoded to 8 bits per channel with 1, 3 or 4 channels.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: DynamicImage,
    format: ImageFormat,
}

impl DecodedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        self.image.color().channel_count()
    }

    pub fn format_name(&self) -> &'static str {
        format_name(self.format)
    }

    /// Row-major interleaved pixel buffer.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_bytes()
    }

    pub fn image(&self) -> &DynamicImage {
        &self.image
    }
}

pub fn format_name(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "JPEG",
        ImageFormat::Png => "PNG",
        ImageFormat::Tiff => "TIFF",
        ImageFormat::Bmp => "BMP",
        _ => "UNKNOWN",
    }
}

/// Decodes uploaded bytes, sniffing the format from the data itself.
///
/// The header dimensions are checked against `max_image_pixels` before any
/// pixel buffer is allocated, and the decoder itself runs under `max_decode_alloc`.
pub fn decode_image(bytes: &[u8], limits: &UploadConfig) -> Result<DecodedImage, DecodeError> {
    let format = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .format()
        .ok_or(DecodeError::UnknownFormat)?;

    if !SUPPORTED_FORMATS.contains(&format) {
        return Err(DecodeError::UnsupportedFormat(format));
    }

    let (width, height) = ImageReader::with_format(Cursor::new(bytes), format).into_dimensions()?;
    if width == 0 || height == 0 {
        return Err(DecodeError::EmptyImage);
    }
    if u64::from(width) * u64::from(height) > limits.max_image_pixels {
        return Err(DecodeError::DimensionsTooLarge {
            width,
            height,
            max_pixels: limits.max_image_pixels,
        });
    }

    let mut decoder_limits = Limits::default();
    decoder_limits.max_image_width = Some(width);
    decoder_limits.max_image_height = Some(height);
    decoder_limits.max_alloc = Some(limits.max_decode_alloc);

    let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
    reader.limits(decoder_limits);
    let image = reader.decode()?;

    tracing::debug!(
        "Decoded {} image {}x{} ({:?})",
        format_name(format),
        image.width(),
        image.height(),
        image.color()
    );

    Ok(DecodedImage {
        image: to_eight_bit(image),
        format,
    })
}

// Gray+alpha collapses to gray; wider sample types are narrowed to u8.
fn to_eight_bit(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => {
            image
        }
        other => match other.color().channel_count() {
            1 | 2 => DynamicImage::ImageLuma8(other.to_luma8()),
            3 => DynamicImage::ImageRgb8(other.to_rgb8()),
            _ => DynamicImage::ImageRgba8(other.to_rgba8()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, LumaA, Rgb, RgbImage, Rgba, RgbaImage};

    fn encode(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 8) as u8, (y * 8) as u8, 128])
        }))
    }

    #[test]
    fn test_decodes_all_supported_formats() {
        let source = gradient(16, 12);
        for (format, name) in [
            (ImageFormat::Png, "PNG"),
            (ImageFormat::Jpeg, "JPEG"),
            (ImageFormat::Tiff, "TIFF"),
            (ImageFormat::Bmp, "BMP"),
        ] {
            let decoded = decode_image(&encode(&source, format), &UploadConfig::default())
                .unwrap_or_else(|e| panic!("{} failed to decode: {}", name, e));
            assert_eq!(decoded.width(), 16);
            assert_eq!(decoded.height(), 12);
            assert_eq!(decoded.channels(), 3);
            assert_eq!(decoded.format_name(), name);
            assert_eq!(decoded.pixels().len(), 16 * 12 * 3);
        }
    }

    #[test]
    fn test_rejects_garbage_bytes() {
        let result = decode_image(b"definitely not an image", &UploadConfig::default());
        assert!(matches!(result, Err(DecodeError::UnknownFormat)));
    }

    #[test]
    fn test_rejects_truncated_jpeg() {
        let bytes = encode(&gradient(64, 64), ImageFormat::Jpeg);
        let truncated = &bytes[..20];
        assert!(decode_image(truncated, &UploadConfig::default()).is_err());
    }

    #[test]
    fn test_rejects_unsupported_container() {
        let bytes = encode(&gradient(8, 8), ImageFormat::Gif);
        let result = decode_image(&bytes, &UploadConfig::default());
        assert!(matches!(
            result,
            Err(DecodeError::UnsupportedFormat(ImageFormat::Gif))
        ));
    }

    #[test]
    fn test_rejects_dimensions_over_pixel_ceiling() {
        let limits = UploadConfig {
            max_image_pixels: 50,
            ..UploadConfig::default()
        };
        let bytes = encode(&gradient(10, 10), ImageFormat::Png);
        let result = decode_image(&bytes, &limits);
        assert!(matches!(
            result,
            Err(DecodeError::DimensionsTooLarge {
                width: 10,
                height: 10,
                max_pixels: 50
            })
        ));
    }

    #[test]
    fn test_crafted_header_is_rejected_before_allocation() {
        // 54-byte BMP header announcing 40000x40000 at 24 bpp, with no pixel data.
        let mut bmp = Vec::new();
        bmp.extend_from_slice(b"BM");
        bmp.extend_from_slice(&54u32.to_le_bytes());
        bmp.extend_from_slice(&0u32.to_le_bytes());
        bmp.extend_from_slice(&54u32.to_le_bytes());
        bmp.extend_from_slice(&40u32.to_le_bytes());
        bmp.extend_from_slice(&40_000i32.to_le_bytes());
        bmp.extend_from_slice(&40_000i32.to_le_bytes());
        bmp.extend_from_slice(&1u16.to_le_bytes());
        bmp.extend_from_slice(&24u16.to_le_bytes());
        bmp.extend_from_slice(&[0u8; 24]);

        assert!(decode_image(&bmp, &UploadConfig::default()).is_err());
    }

    #[test]
    fn test_canonicalizes_channel_layouts() {
        let limits = UploadConfig::default();
        let gray_alpha = GrayAlphaImage::from_pixel(4, 4, LumaA([90, 255]));
        let png = encode(&DynamicImage::ImageLumaA8(gray_alpha), ImageFormat::Png);
        let decoded = decode_image(&png, &limits).unwrap();
        assert_eq!(decoded.channels(), 1);
        assert!(decoded.pixels().iter().all(|&p| p == 90));

        let rgba = RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 4]));
        let png = encode(&DynamicImage::ImageRgba8(rgba), ImageFormat::Png);
        let decoded = decode_image(&png, &limits).unwrap();
        assert_eq!(decoded.channels(), 4);

        let wide = image::ImageBuffer::from_pixel(4, 4, Rgb([65535u16, 0, 0]));
        let png = encode(&DynamicImage::ImageRgb16(wide), ImageFormat::Png);
        let decoded = decode_image(&png, &limits).unwrap();
        assert_eq!(decoded.channels(), 3);
        assert_eq!(&decoded.pixels()[..3], &[255, 0, 0]);
    }
}
