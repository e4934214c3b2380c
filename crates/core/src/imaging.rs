use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, ImageOutputFormat};
use thiserror::Error;

/// Errors produced while processing uploaded artwork.
#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("cannot decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("cannot encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Region cut out of the source image before resizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropBox {
    /// Computes the centred crop of a `src_width`x`src_height` image matching
    /// the aspect ratio of the `dst_width`x`dst_height` box.
    pub fn centered(src_width: u32, src_height: u32, dst_width: u32, dst_height: u32) -> Self {
        let src_ratio = f64::from(src_width) / f64::from(src_height);
        let dst_ratio = f64::from(dst_width) / f64::from(dst_height);

        let (x, y, crop_width, crop_height) = if dst_ratio < src_ratio {
            let crop_height = f64::from(src_height);
            let crop_width = crop_height * dst_ratio;
            let x = ((f64::from(src_width) - crop_width) / 2.0) as u32;
            (x, 0, crop_width, crop_height)
        } else {
            let crop_width = f64::from(src_width);
            let crop_height = crop_width / dst_ratio;
            let y = ((f64::from(src_height) - crop_height) / 2.0) as u32;
            (0, y, crop_width, crop_height)
        };

        Self {
            x,
            y,
            width: (crop_width as u32).max(1),
            height: (crop_height as u32).max(1),
        }
    }
}

/// PNG bytes produced by [`ImageScaler::scale`].
#[derive(Debug, Clone)]
pub struct ScaledImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub crop: CropBox,
}

/// Crops and scales uploads into a fixed box, always re-encoding as PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageScaler {
    width: u32,
    height: u32,
}

impl ImageScaler {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    /// Decodes `data`, crops it to the target aspect ratio around the centre,
    /// resizes it with a Lanczos filter and encodes the result as PNG.
    ///
    /// Pixel formats other than RGB8 and RGBA8 are converted to RGB8.
    pub fn scale(&self, data: &[u8]) -> Result<ScaledImage, ImagingError> {
        let source = image::load_from_memory(data).map_err(ImagingError::Decode)?;
        let crop = CropBox::centered(source.width(), source.height(), self.width, self.height);

        let resized = source
            .crop_imm(crop.x, crop.y, crop.width, crop.height)
            .resize_exact(self.width, self.height, FilterType::Lanczos3);

        let output = match resized {
            DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => resized,
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        };

        let mut bytes = Vec::new();
        output
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .map_err(ImagingError::Encode)?;

        Ok(ScaledImage {
            bytes,
            width: output.width(),
            height: output.height(),
            crop,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), format)
            .expect("encode fixture");
        bytes
    }

    /// 400x300 image: red band on the left 50px, blue band on the right 50px, green otherwise.
    fn banded_landscape() -> Vec<u8> {
        let image = RgbImage::from_fn(400, 300, |x, _| {
            if x < 50 {
                Rgb([255, 0, 0])
            } else if x >= 350 {
                Rgb([0, 0, 255])
            } else {
                Rgb([0, 255, 0])
            }
        });
        encode(DynamicImage::ImageRgb8(image), ImageFormat::Png)
    }

    #[test]
    fn landscape_crops_center_square() {
        assert_eq!(
            CropBox::centered(400, 300, 256, 256),
            CropBox {
                x: 50,
                y: 0,
                width: 300,
                height: 300
            }
        );
    }

    #[test]
    fn portrait_crops_vertically() {
        assert_eq!(
            CropBox::centered(300, 400, 256, 256),
            CropBox {
                x: 0,
                y: 50,
                width: 300,
                height: 300
            }
        );
    }

    #[test]
    fn offsets_truncate() {
        // 101x50 into a square: crop width 50, offset 25.5 truncates to 25.
        assert_eq!(CropBox::centered(101, 50, 10, 10).x, 25);
    }

    #[test]
    fn scales_landscape_into_square_box() {
        let scaler = ImageScaler::new(256, 256);
        let scaled = scaler.scale(&banded_landscape()).expect("scale");

        assert_eq!((scaled.width, scaled.height), (256, 256));
        assert!(scaled.bytes.starts_with(PNG_SIGNATURE));

        let decoded = image::load_from_memory(&scaled.bytes)
            .expect("decode output")
            .to_rgb8();
        assert_eq!(decoded.dimensions(), (256, 256));
        // The coloured bands were cropped away before resizing.
        for (x, y) in [(0, 0), (255, 0), (0, 255), (255, 255), (128, 128)] {
            let pixel = decoded.get_pixel(x, y);
            assert!(pixel[0] < 16 && pixel[1] > 240 && pixel[2] < 16, "{pixel:?}");
        }
    }

    #[test]
    fn jpeg_input_is_reencoded_as_png() {
        let image = RgbImage::from_pixel(64, 32, Rgb([10, 20, 30]));
        let jpeg = encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg);

        let scaled = ImageScaler::new(16, 16).scale(&jpeg).expect("scale");
        assert!(scaled.bytes.starts_with(PNG_SIGNATURE));
    }

    #[test]
    fn grayscale_is_converted_to_rgb() {
        let image = GrayImage::from_pixel(20, 20, Luma([128]));
        let png = encode(DynamicImage::ImageLuma8(image), ImageFormat::Png);

        let scaled = ImageScaler::new(8, 8).scale(&png).expect("scale");
        let decoded = image::load_from_memory(&scaled.bytes).expect("decode");
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn rgba_keeps_alpha_channel() {
        let image = RgbaImage::from_pixel(20, 10, Rgba([1, 2, 3, 100]));
        let png = encode(DynamicImage::ImageRgba8(image), ImageFormat::Png);

        let scaled = ImageScaler::new(8, 8).scale(&png).expect("scale");
        let decoded = image::load_from_memory(&scaled.bytes).expect("decode");
        assert!(matches!(decoded, DynamicImage::ImageRgba8(_)));
    }

    #[test]
    fn rejects_unreadable_input() {
        let err = ImageScaler::new(8, 8)
            .scale(b"definitely not an image")
            .expect_err("garbage must fail");
        assert!(matches!(err, ImagingError::Decode(_)));
    }
}
