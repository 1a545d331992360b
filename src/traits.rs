use crate::errors::Result;
use image::RgbImage;
use ndarray::prelude::*;

/// Removes the background around the leaf.
///
/// Implementations must return an image with the same dimensions as the
/// input where background pixels are driven toward black and leaf pixels are
/// kept. The output must be deterministic for a given input.
pub trait BackgroundRemover: Send + Sync {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage>;
}

/// Pretrained disease classifier.
pub trait DiseaseClassifier: Send + Sync {
    /// Side length of the square input the model expects.
    fn input_size(&self) -> u32;

    /// Runs inference on a batch-of-one tensor and returns the class
    /// probabilities in `CLASS_NAMES` order.
    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>>;
}

impl<T: BackgroundRemover + ?Sized> BackgroundRemover for Box<T> {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage> {
        (**self).remove_background(image)
    }
}

impl<T: DiseaseClassifier + ?Sized> DiseaseClassifier for Box<T> {
    fn input_size(&self) -> u32 {
        (**self).input_size()
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>> {
        (**self).predict(tensor)
    }
}
