use std::io::Cursor;

use camino::Utf8Path;
use image::{DynamicImage, ImageFormat};

use crate::error::ImageError;

/// A crop rectangle: `width` × `height` taken at offset (`x`, `y`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crop {
    pub width: u32,
    pub height: u32,
    pub x: u32,
    pub y: u32,
}

/// Every card image shares the same layout, so a single rectangle around the
/// card name banner is enough to produce decklist thumbnails.
pub const CARD_THUMBNAIL: Crop = Crop {
    width: 120,
    height: 40,
    x: 80,
    y: 110,
};

impl Crop {
    /// Cut the rectangle out of `image`.
    ///
    /// The rectangle is never clamped: if it doesn't fit entirely inside the
    /// image the crop fails, so every produced thumbnail has exactly the
    /// configured dimensions.
    pub fn apply(&self, image: &DynamicImage) -> Result<DynamicImage, ImageError> {
        let (image_width, image_height) = (image.width(), image.height());

        let fits_x = self.x.checked_add(self.width).is_some_and(|r| r <= image_width);
        let fits_y = self.y.checked_add(self.height).is_some_and(|b| b <= image_height);

        if !fits_x || !fits_y {
            return Err(ImageError::OutOfBounds {
                width: self.width,
                height: self.height,
                x: self.x,
                y: self.y,
                image_width,
                image_height,
            });
        }

        Ok(image.crop_imm(self.x, self.y, self.width, self.height))
    }
}

/// Free-function form of [`Crop::apply`].
pub fn crop(image: &DynamicImage, crop: Crop) -> Result<DynamicImage, ImageError> {
    crop.apply(image)
}

/// Decode `data`, crop it and encode the result back in the source format.
pub(crate) fn crop_encoded(path: &Utf8Path, data: &[u8], crop: Crop) -> Result<Vec<u8>, ImageError> {
    let format = match ImageFormat::from_path(path) {
        Ok(format) => format,
        Err(_) => image::guess_format(data)?,
    };

    let image = image::load_from_memory_with_format(data, format)?;
    let thumbnail = crop.apply(&image)?;

    let mut buffer = Cursor::new(Vec::new());
    thumbnail.write_to(&mut buffer, format)?;

    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use image::{GenericImageView, Rgba, RgbaImage};

    use super::*;

    /// Image whose pixels encode their own coordinates.
    fn gradient(width: u32, height: u32) -> DynamicImage {
        let buffer = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, (x / 256) as u8, 255])
        });
        DynamicImage::ImageRgba8(buffer)
    }

    #[test]
    fn test_crop_dimensions_and_offset() {
        let source = gradient(800, 600);

        let thumbnail = CARD_THUMBNAIL.apply(&source).unwrap();

        assert_eq!(thumbnail.dimensions(), (120, 40));
        // top-left pixel of the thumbnail is (80, 110) of the source
        assert_eq!(thumbnail.get_pixel(0, 0), Rgba([80, 110, 0, 255]));
        assert_eq!(thumbnail.get_pixel(119, 39), Rgba([199, 149, 0, 255]));
    }

    #[test]
    fn test_crop_out_of_bounds_fails() {
        let source = gradient(50, 50);

        let err = CARD_THUMBNAIL.apply(&source).unwrap_err();

        assert!(matches!(
            err,
            ImageError::OutOfBounds {
                image_width: 50,
                image_height: 50,
                ..
            }
        ));
    }

    #[test]
    fn test_crop_exact_fit() {
        let source = gradient(200, 150);
        let thumbnail = crop(&source, CARD_THUMBNAIL).unwrap();
        assert_eq!(thumbnail.dimensions(), (120, 40));
    }

    #[test]
    fn test_crop_encoded_keeps_format() {
        let mut png = Cursor::new(Vec::new());
        gradient(800, 600)
            .write_to(&mut png, ImageFormat::Png)
            .unwrap();

        let out = crop_encoded(Utf8Path::new("cards/imp.png"), png.get_ref(), CARD_THUMBNAIL)
            .unwrap();

        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.dimensions(), (120, 40));
    }

    #[test]
    fn test_crop_encoded_rejects_garbage() {
        let err = crop_encoded(Utf8Path::new("cards/broken.png"), b"nope", CARD_THUMBNAIL);
        assert!(matches!(err, Err(ImageError::Image(_))));
    }
}
