pub mod config;
pub mod errors;
pub mod imageops_ai;
pub mod mocks;
pub mod model;
pub mod prediction;
pub mod preprocess;
pub mod segmentation;
pub mod traits;

use std::path::Path;

use image::RgbImage;
use ndarray::Array4;
use tracing::{debug, info};

pub use config::Config;
pub use errors::{LeafDiseaseError, Result};
pub use model::{OnnxBackgroundRemover, OnnxClassifier, PassthroughBackgroundRemover};
pub use prediction::{Prediction, CLASS_NAMES};
pub use preprocess::{Normalization, CLASSIFIER_INPUT_SIZE};
pub use segmentation::{BoundingBox, Region, FOREGROUND_THRESHOLD};
pub use traits::*;

/// A leaf cropped out of a photograph and ready for the classifier.
#[derive(Debug, Clone)]
pub struct PreparedLeaf {
    pub region: Region,
    pub tensor: Array4<f32>,
    /// The crop resized to the classifier resolution, for display.
    pub display_image: RgbImage,
}

#[derive(Debug, Clone)]
pub struct Diagnosis {
    pub prediction: Prediction,
    pub region: Region,
    pub display_image: RgbImage,
}

/// Read-only context for diagnosing leaf photographs.
///
/// Built once at startup and shared by reference; every call works on its
/// own buffers, so one instance can serve concurrent requests.
pub struct LeafDiagnoser<B: BackgroundRemover, C: DiseaseClassifier> {
    remover: B,
    classifier: C,
    normalization: Normalization,
}

impl<B: BackgroundRemover, C: DiseaseClassifier> LeafDiagnoser<B, C> {
    pub const fn new(remover: B, classifier: C, normalization: Normalization) -> Self {
        Self {
            remover,
            classifier,
            normalization,
        }
    }

    /// Removes the background and returns the largest foreground region.
    pub fn locate_leaf(&self, image: &RgbImage) -> Result<Region> {
        let image_no_bg = self.remover.remove_background(image)?;
        if image_no_bg.dimensions() != image.dimensions() {
            return Err(LeafDiseaseError::Validation {
                field: "background removal output".to_string(),
                reason: format!(
                    "has dimensions {:?}, expected {:?}",
                    image_no_bg.dimensions(),
                    image.dimensions()
                ),
            });
        }

        let mask = segmentation::segment(&image_no_bg);
        let regions = segmentation::label_regions(&mask);
        segmentation::select_leaf(&regions)
    }

    /// Everything up to, but not including, inference.
    pub fn prepare(&self, image: &RgbImage) -> Result<PreparedLeaf> {
        let region = self.locate_leaf(image)?;
        let (tensor, display_image) = preprocess::crop_and_prepare(
            image,
            &region,
            self.classifier.input_size(),
            &self.normalization,
        )?;

        Ok(PreparedLeaf {
            region,
            tensor,
            display_image,
        })
    }

    pub fn diagnose(&self, image: &RgbImage) -> Result<Diagnosis> {
        let PreparedLeaf {
            region,
            tensor,
            display_image,
        } = self.prepare(image)?;

        let probabilities = self.classifier.predict(tensor.view())?;
        debug!(?probabilities, "classifier output");
        let prediction = Prediction::from_probabilities(&probabilities)?;
        info!(
            label = prediction.label,
            confidence = prediction.confidence,
            "predicted disease"
        );

        Ok(Diagnosis {
            prediction,
            region,
            display_image,
        })
    }

    /// Decodes JPEG/PNG bytes, as received from an upload or a camera, and
    /// diagnoses the result.
    pub fn diagnose_bytes(&self, bytes: &[u8]) -> Result<Diagnosis> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| LeafDiseaseError::ImageProcessing {
                path: "<memory>".to_string(),
                operation: "image decoding".to_string(),
                source: Box::new(e),
            })?
            .into_rgb8();
        self.diagnose(&image)
    }

    pub fn diagnose_path(&self, path: &Path) -> Result<Diagnosis> {
        let image = image::open(path)
            .map_err(|e| LeafDiseaseError::ImageProcessing {
                path: path.display().to_string(),
                operation: "image loading".to_string(),
                source: Box::new(e),
            })?
            .into_rgb8();
        self.diagnose(&image)
    }
}
