use anyhow::{anyhow, ensure, Result};
use image::{GenericImageView, ImageBuffer, Luma, Pixel, Primitive, Rgb};
use num_traits::AsPrimitive;

use crate::imageops_ai::get_max_value;

/// Composites `image` over black using `mask` as alpha.
///
/// A mask value of zero turns the pixel black, a saturated value keeps it
/// unchanged.
pub fn composite_over_black<I, M, SI, SM>(
    image: &I,
    mask: &M,
) -> Result<ImageBuffer<Rgb<SI>, Vec<SI>>>
where
    I: GenericImageView<Pixel = Rgb<SI>>,
    M: GenericImageView<Pixel = Luma<SM>>,
    Rgb<SI>: Pixel<Subpixel = SI>,
    SI: Primitive + 'static + AsPrimitive<f32>,
    SM: Primitive + 'static + AsPrimitive<f32>,
    f32: AsPrimitive<SI>,
{
    ensure!(
        image.dimensions() == mask.dimensions(),
        "Image and mask dimensions do not match: image {:?}, mask {:?}",
        image.dimensions(),
        mask.dimensions()
    );

    let sm_max: f32 = get_max_value::<SM>().as_();

    let processed_pixels = image
        .pixels()
        .zip(mask.pixels())
        .flat_map(|(image_pixel, mask_pixel)| {
            let Rgb(channels) = image_pixel.2;
            let Luma([mask_value]) = mask_pixel.2;
            let alpha = (mask_value.as_() / sm_max).clamp(0.0, 1.0);
            channels.map(|c| {
                let value: SI = (c.as_() * alpha).round().as_();
                value
            })
        })
        .collect::<Vec<SI>>();

    ImageBuffer::from_raw(image.width(), image.height(), processed_pixels)
        .ok_or_else(|| anyhow!("Failed to create ImageBuffer from processed pixels"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};

    #[test]
    fn test_zero_mask_blackens_and_full_mask_keeps() -> Result<()> {
        let image = RgbImage::from_pixel(2, 1, Rgb([120, 200, 40]));
        let mut mask = GrayImage::new(2, 1);
        mask.put_pixel(1, 0, Luma([255]));

        let out = composite_over_black(&image, &mask)?;
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([120, 200, 40]));
        Ok(())
    }

    #[test]
    fn test_float_mask_scales_channels() -> Result<()> {
        let image = RgbImage::from_pixel(1, 1, Rgb([200, 100, 50]));
        let mask: ImageBuffer<Luma<f32>, Vec<f32>> = ImageBuffer::from_pixel(1, 1, Luma([0.5]));

        let out = composite_over_black(&image, &mask)?;
        assert_eq!(out.get_pixel(0, 0), &Rgb([100, 50, 25]));
        Ok(())
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let image = RgbImage::new(2, 2);
        let mask = GrayImage::new(3, 2);
        assert!(composite_over_black(&image, &mask).is_err());
    }
}
