use std::path::Path;

use crate::{
    errors::{LeafDiseaseError, Result},
    imageops_ai::mask::composite_over_black,
    prediction::softmax,
    preprocess::{
        ChannelOrder, Normalization, TensorLayout, CLASSIFIER_INPUT_SIZE, IMAGENET_MEAN,
        IMAGENET_STD,
    },
    traits::{BackgroundRemover, DiseaseClassifier},
};
use image::{imageops, imageops::FilterType, GrayImage, RgbImage};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Input resolution of the U^2-Net family when the model leaves it dynamic.
const DEFAULT_SEGMENTATION_SIZE: u32 = 320;

fn build_session(model_path: &Path, device_id: i32) -> Result<Session> {
    let session = SessionBuilder::new()
        .map_err(|e| LeafDiseaseError::model("session builder initialization", e))?
        .with_execution_providers([
            TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
        ])
        .map_err(|e| LeafDiseaseError::model("execution provider setup", e))?
        .with_memory_pattern(true)
        .map_err(|e| LeafDiseaseError::model("memory pattern setup", e))?
        .commit_from_file(model_path)
        .map_err(|e| {
            LeafDiseaseError::model(format!("model load: {}", model_path.display()), e)
        })?;

    info!(model = %model_path.display(), device_id, "loaded ONNX model");
    Ok(session)
}

/// Names of the first input and first output of a session.
fn io_names(session: &Session) -> Result<(String, String)> {
    let input = session.inputs.first().map(|i| i.name.clone());
    let output = session.outputs.first().map(|o| o.name.clone());
    input.zip(output).ok_or_else(|| LeafDiseaseError::Validation {
        field: "model".to_string(),
        reason: "must have at least one input and one output".to_string(),
    })
}

/// Reads the square spatial size from the session's first input, falling back
/// to `default` when the dimension is dynamic.
fn input_size(session: &Session, layout: TensorLayout, default: u32) -> Result<u32> {
    let shape = session.inputs[0]
        .input_type
        .tensor_shape()
        .ok_or_else(|| LeafDiseaseError::Validation {
            field: "model input".to_string(),
            reason: "is not a tensor".to_string(),
        })?;

    let axis = match layout {
        TensorLayout::Nhwc => 1,
        TensorLayout::Nchw => 2,
    };

    match shape.get(axis) {
        Some(&dim) if dim > 0 => Ok(dim as u32),
        Some(_) => Ok(default),
        None => Err(LeafDiseaseError::Validation {
            field: "model input".to_string(),
            reason: format!("expected a 4-d tensor, got {} dimensions", shape.len()),
        }),
    }
}

/// Leaves the image untouched. For photographs taken against a black
/// background, where thresholding alone isolates the leaf.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughBackgroundRemover;

impl BackgroundRemover for PassthroughBackgroundRemover {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage> {
        Ok(image.clone())
    }
}

/// Salient-object segmentation (U^2-Net, as shipped with rembg) used to black
/// out everything but the leaf.
pub struct OnnxBackgroundRemover {
    pub image_size: u32,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxBackgroundRemover {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let mut session = build_session(model_path, device_id)?;
        let (input_name, output_name) = io_names(&session)?;
        let image_size = input_size(&session, TensorLayout::Nchw, DEFAULT_SEGMENTATION_SIZE)?;

        // warm up
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)?])
            .map_err(|e| LeafDiseaseError::model("segmentation warm-up run", e))?;

        Ok(Self {
            image_size,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }

    pub fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(ort::inputs![
            self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
        ])?;
        let mask = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        Ok(mask)
    }
}

impl BackgroundRemover for OnnxBackgroundRemover {
    fn remove_background(&self, image: &RgbImage) -> Result<RgbImage> {
        let (width, height) = image.dimensions();
        let tensor = preprocess_for_segmentation(image, self.image_size)?;
        let mask = self.predict(tensor.view())?;
        let mask = postprocess_mask(mask.view(), width, height)?;

        composite_over_black(image, &mask).map_err(|e| LeafDiseaseError::ImageProcessing {
            path: "unknown".to_string(),
            operation: "background compositing".to_string(),
            source: e.into(),
        })
    }
}

/// Resizes to the model's square input, scales by the brightest sample and
/// standardizes with the ImageNet statistics.
pub fn preprocess_for_segmentation(image: &RgbImage, image_size: u32) -> Result<Array4<f32>> {
    let resized = imageops::resize(image, image_size, image_size, FilterType::Lanczos3);
    let max = resized.as_raw().iter().copied().max().unwrap_or(0).max(1);
    let normalization = Normalization::new(
        ChannelOrder::Rgb,
        1.0 / f32::from(max),
        IMAGENET_MEAN,
        IMAGENET_STD,
        TensorLayout::Nchw,
    )?;
    Ok(normalization.apply(&resized))
}

/// Min-max normalizes the first mask channel and resizes it back to the
/// source dimensions.
pub fn postprocess_mask(mask: ArrayView4<f32>, width: u32, height: u32) -> Result<GrayImage> {
    let (_, channels, mask_height, mask_width) = mask.dim();
    if channels == 0 {
        return Err(LeafDiseaseError::Validation {
            field: "segmentation output".to_string(),
            reason: "has no channels".to_string(),
        });
    }

    let plane = mask.slice(s![0, 0, .., ..]);
    let min = plane.iter().copied().fold(f32::INFINITY, f32::min);
    let max = plane.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;

    let pixels = plane
        .iter()
        .map(|&v| {
            let v = if range > f32::EPSILON { (v - min) / range } else { v };
            (v.clamp(0.0, 1.0) * 255.0) as u8
        })
        .collect::<Vec<u8>>();

    let mask = GrayImage::from_raw(mask_width as u32, mask_height as u32, pixels).ok_or_else(
        || LeafDiseaseError::Validation {
            field: "segmentation output".to_string(),
            reason: format!("cannot form a {mask_width}x{mask_height} mask"),
        },
    )?;
    debug!(mask_width, mask_height, width, height, "resizing mask");
    Ok(imageops::resize(&mask, width, height, FilterType::Lanczos3))
}

/// Disease classifier exported to ONNX.
pub struct OnnxClassifier {
    pub image_size: u32,
    apply_softmax: bool,
    input_name: String,
    output_name: String,
    session: Mutex<Session>,
}

impl OnnxClassifier {
    /// `layout` must match the layout the normalization produces.
    pub fn new(
        model_path: &Path,
        device_id: i32,
        layout: TensorLayout,
        apply_softmax: bool,
    ) -> Result<Self> {
        let mut session = build_session(model_path, device_id)?;
        let (input_name, output_name) = io_names(&session)?;
        let image_size = input_size(&session, layout, CLASSIFIER_INPUT_SIZE)?;

        let side = image_size as usize;
        let data = match layout {
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, side, side, 3)),
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, side, side)),
        };
        session
            .run(ort::inputs![input_name.as_str() => TensorRef::from_array_view(&data)?])
            .map_err(|e| LeafDiseaseError::model("classifier warm-up run", e))?;

        Ok(Self {
            image_size,
            apply_softmax,
            input_name,
            output_name,
            session: Mutex::new(session),
        })
    }
}

impl DiseaseClassifier for OnnxClassifier {
    fn input_size(&self) -> u32 {
        self.image_size
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Vec<f32>> {
        let scores = {
            let mut binding = self.session.lock();
            let outputs = binding.run(ort::inputs![
                self.input_name.as_str() => TensorRef::from_array_view(&tensor.as_standard_layout())?
            ])?;
            let scores = outputs[self.output_name.as_str()]
                .try_extract_array::<f32>()?
                .iter()
                .copied()
                .collect::<Vec<f32>>();
            scores
        };

        if self.apply_softmax {
            Ok(softmax(&scores))
        } else {
            Ok(scores)
        }
    }
}
