//! Image codec adapter: bytes in, normalized RGB bitmap, bytes out

use crate::error::{Error, Result};
use image::{DynamicImage, ImageFormat, RgbImage, imageops::FilterType};
use std::io::Cursor;

/// Square side the model works at
pub const TARGET_SIZE: u32 = 512;

/// Format of the outgoing reply
pub const REPLY_FORMAT: ImageFormat = ImageFormat::Png;

/// Decode an image of any supported format, guessed from its content
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).map_err(|e| Error::Decode(e.to_string()))
}

/// Convert to RGB and resize to `TARGET_SIZE` x `TARGET_SIZE`.
///
/// The aspect ratio is not preserved.
pub fn normalize(image: DynamicImage) -> RgbImage {
    normalize_to(image, TARGET_SIZE)
}

pub fn normalize_to(image: DynamicImage, size: u32) -> RgbImage {
    let rgb = image.into_rgb8();
    if rgb.dimensions() == (size, size) {
        return rgb;
    }
    image::imageops::resize(&rgb, size, size, FilterType::CatmullRom)
}

pub fn encode(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, format)
        .map_err(|e| Error::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, Rgba, RgbaImage};

    fn sample_rgb(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 200]))
    }

    #[test]
    fn test_decode_jpeg_and_png() {
        let rgb = sample_rgb(40, 30);
        for format in [ImageFormat::Jpeg, ImageFormat::Png] {
            let bytes = encode(&rgb, format).unwrap();
            let decoded = decode(&bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (40, 30));
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode(b"definitely not an image"), Err(Error::Decode(_))));
        assert!(matches!(decode(&[]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_decode_rejects_truncated_jpeg() {
        let bytes = encode(&sample_rgb(64, 64), ImageFormat::Jpeg).unwrap();
        assert!(matches!(decode(&bytes[..16]), Err(Error::Decode(_))));
    }

    #[test]
    fn test_normalize_any_color_mode() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(100, 37, Luma([9])));
        let rgba = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 900, Rgba([1, 2, 3, 4])));
        let rgb = DynamicImage::ImageRgb8(sample_rgb(1024, 768));

        for input in [gray, rgba, rgb] {
            let normalized = normalize(input);
            assert_eq!(normalized.dimensions(), (TARGET_SIZE, TARGET_SIZE));
        }
    }

    #[test]
    fn test_normalize_gray_expands_channels() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(8, 8, Luma([77])));
        let normalized = normalize_to(gray, 8);
        assert_eq!(normalized.get_pixel(0, 0), &Rgb([77, 77, 77]));
    }

    #[test]
    fn test_encode_png_is_decodable() {
        let normalized = normalize(DynamicImage::ImageRgb8(sample_rgb(20, 10)));
        let png = encode(&normalized, REPLY_FORMAT).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);

        let back = decode(&png).unwrap().into_rgb8();
        assert_eq!(back, normalized);
    }
}
