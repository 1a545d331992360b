use crate::errors::{LeafDiseaseError, Result};
use crate::prediction::CLASS_NAMES;
use crate::preprocess::CLASSIFIER_INPUT_SIZE;
use crate::segmentation::BoundingBox;
use crate::traits::{BackgroundRemover, DiseaseClassifier};
use image::{Rgb, RgbImage};
use ndarray::prelude::*;

/// Classifier stub that always returns the same probabilities.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    pub image_size: u32,
    pub probabilities: Vec<f32>,
}

impl FixedClassifier {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self {
            image_size: CLASSIFIER_INPUT_SIZE,
            probabilities,
        }
    }

    /// All probability mass on the class at `index`.
    pub fn certain(index: usize) -> Self {
        let mut probabilities = vec![0.0; CLASS_NAMES.len()];
        probabilities[index] = 1.0;
        Self::new(probabilities)
    }
}

impl DiseaseClassifier for FixedClassifier {
    fn input_size(&self) -> u32 {
        self.image_size
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>> {
        if tensor.shape()[0] != 1 {
            return Err(LeafDiseaseError::Validation {
                field: "tensor".to_string(),
                reason: format!("expected batch size 1, got {}", tensor.shape()[0]),
            });
        }
        Ok(self.probabilities.clone())
    }
}

/// Background remover stub that keeps one rectangle and blacks out the rest.
#[derive(Debug, Clone, Copy)]
pub struct RectBackgroundRemover {
    pub keep: BoundingBox,
}

impl BackgroundRemover for RectBackgroundRemover {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage> {
        let mut out = image.clone();
        for (col, row, pixel) in out.enumerate_pixels_mut() {
            let inside = (self.keep.min_row..self.keep.max_row).contains(&row)
                && (self.keep.min_col..self.keep.max_col).contains(&col);
            if !inside {
                *pixel = Rgb([0, 0, 0]);
            }
        }
        Ok(out)
    }
}

/// Background remover stub that returns an image of the wrong size.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShrinkingBackgroundRemover;

impl BackgroundRemover for ShrinkingBackgroundRemover {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage> {
        let (width, height) = image.dimensions();
        Ok(RgbImage::new(width / 2, height / 2))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certain_classifier() -> Result<()> {
        let classifier = FixedClassifier::certain(3);
        assert_eq!(classifier.input_size(), 224);

        let tensor = Array4::<f32>::zeros((1, 224, 224, 3));
        let probabilities = classifier.predict(tensor.view())?;
        assert_eq!(probabilities.len(), 10);
        assert_eq!(probabilities[3], 1.0);
        Ok(())
    }

    #[test]
    fn test_rect_remover_blacks_out_outside() -> Result<()> {
        let remover = RectBackgroundRemover {
            keep: BoundingBox {
                min_row: 1,
                min_col: 1,
                max_row: 2,
                max_col: 3,
            },
        };
        let image = RgbImage::from_pixel(4, 3, Rgb([9, 9, 9]));

        let out = remover.remove_background(&image)?;
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 1), &Rgb([9, 9, 9]));
        assert_eq!(out.get_pixel(2, 1), &Rgb([9, 9, 9]));
        assert_eq!(out.get_pixel(3, 1), &Rgb([0, 0, 0]));
        Ok(())
    }
}
