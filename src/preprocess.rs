//! Cropping the leaf out of the original photograph and turning it into the
//! classifier's input tensor.

use clap::ValueEnum;
use image::{imageops, imageops::FilterType, RgbImage};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use tracing::debug;

use crate::errors::{LeafDiseaseError, Result};
use crate::segmentation::Region;

/// Side length of the classifier input.
pub const CLASSIFIER_INPUT_SIZE: u32 = 224;

/// Per-channel means subtracted by ResNet50's "caffe" preprocessing, in
/// B, G, R order.
pub const CAFFE_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.68];

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// (batch, height, width, channels), as Keras models expect.
    Nhwc,
    /// (batch, channels, height, width), as PyTorch exports expect.
    Nchw,
}

/// Named normalization regimes selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum NormalizationPreset {
    #[default]
    Caffe,
    Torch,
}

impl NormalizationPreset {
    pub fn normalization(self) -> Normalization {
        match self {
            Self::Caffe => Normalization::caffe(),
            Self::Torch => Normalization::torch(),
        }
    }
}

/// Maps a u8 sample `v` of channel `c` to `(v * scale - mean[c]) / std[c]`,
/// where channels are counted after reordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalization {
    pub channel_order: ChannelOrder,
    pub scale: f32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
    pub layout: TensorLayout,
}

impl Default for Normalization {
    fn default() -> Self {
        Self::caffe()
    }
}

impl Normalization {
    pub fn new(
        channel_order: ChannelOrder,
        scale: f32,
        mean: [f32; 3],
        std: [f32; 3],
        layout: TensorLayout,
    ) -> Result<Self> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(LeafDiseaseError::Validation {
                field: "scale".to_string(),
                reason: format!("must be a positive finite number, got {scale}"),
            });
        }

        if let Some(m) = mean.iter().find(|m| !m.is_finite()) {
            return Err(LeafDiseaseError::Validation {
                field: "mean".to_string(),
                reason: format!("must be finite, got {m}"),
            });
        }

        for (i, &s) in std.iter().enumerate() {
            if !(s.is_finite() && s > 0.0) {
                return Err(LeafDiseaseError::Validation {
                    field: format!("std[{i}]"),
                    reason: format!("must be a positive finite number, got {s}"),
                });
            }
        }

        Ok(Self {
            channel_order,
            scale,
            mean,
            std,
            layout,
        })
    }

    /// ResNet50 preprocessing as done by Keras: BGR, zero-centered by the
    /// ImageNet channel means, no scaling.
    pub const fn caffe() -> Self {
        Self {
            channel_order: ChannelOrder::Bgr,
            scale: 1.0,
            mean: CAFFE_MEAN_BGR,
            std: [1.0; 3],
            layout: TensorLayout::Nhwc,
        }
    }

    /// torchvision preprocessing: RGB scaled to [0, 1] then standardized.
    pub fn torch() -> Self {
        Self {
            channel_order: ChannelOrder::Rgb,
            scale: 1.0 / 255.0,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            layout: TensorLayout::Nchw,
        }
    }

    /// Converts an RGB image into a batch-of-one tensor.
    pub fn apply(&self, image: &RgbImage) -> Array4<f32> {
        let chw = image.as_ndarray3();
        let chw = match self.channel_order {
            ChannelOrder::Rgb => chw,
            ChannelOrder::Bgr => chw.slice_move(s![..;-1, .., ..]),
        };

        let mut tensor = chw.mapv(f32::from).insert_axis(Axis(0));
        for (c, mut plane) in tensor.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, std) = (self.mean[c], self.std[c]);
            plane.mapv_inplace(|v| (v * self.scale - mean) / std);
        }

        match self.layout {
            TensorLayout::Nchw => tensor,
            TensorLayout::Nhwc => tensor
                .permuted_axes([0, 2, 3, 1])
                .as_standard_layout()
                .into_owned(),
        }
    }
}

/// Crops `original` to the leaf region, resizes the crop to
/// `input_size`x`input_size` and normalizes it.
///
/// `original` must be the photograph before background removal. Returns the
/// tensor and the resized crop, which is only meant for display.
pub fn crop_and_prepare(
    original: &RgbImage,
    region: &Region,
    input_size: u32,
    normalization: &Normalization,
) -> Result<(Array4<f32>, RgbImage)> {
    let bbox = region.bbox;
    let (width, height) = original.dimensions();

    if bbox.is_empty() || bbox.max_col > width || bbox.max_row > height {
        return Err(LeafDiseaseError::DegenerateRegion {
            bbox,
            width,
            height,
        });
    }

    if input_size == 0 {
        return Err(LeafDiseaseError::Validation {
            field: "input_size".to_string(),
            reason: "must be non-zero".to_string(),
        });
    }

    let cropped =
        imageops::crop_imm(original, bbox.min_col, bbox.min_row, bbox.width(), bbox.height())
            .to_image();
    let resized = imageops::resize(&cropped, input_size, input_size, FilterType::Triangle);
    debug!(
        crop_width = bbox.width(),
        crop_height = bbox.height(),
        input_size,
        "cropped leaf"
    );

    let tensor = normalization.apply(&resized);
    Ok((tensor, resized))
}
