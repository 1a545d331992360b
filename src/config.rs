use clap::Parser;
use image::ImageFormat;
use std::path::PathBuf;

use crate::preprocess::NormalizationPreset;

/// Tomato leaf disease detection.
///
/// Removes the background of each photograph, crops the largest leaf-like
/// region and classifies it. Every image is handled as an independent request.
#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Leaf photographs (JPEG/PNG)
    #[arg(required = true)]
    pub images: Vec<PathBuf>,

    /// Disease classifier in ONNX format
    #[arg(short = 'm', long)]
    pub classifier_model: PathBuf,

    /// Background segmentation model (U^2-Net) in ONNX format. Without it the
    /// photographs are expected to have a black background already.
    #[arg(short, long)]
    pub background_model: Option<PathBuf>,

    #[arg(short, long, value_enum, default_value_t = NormalizationPreset::Caffe)]
    pub normalization: NormalizationPreset,

    /// Apply softmax to the classifier output (for models that emit logits)
    #[arg(long)]
    pub apply_softmax: bool,

    /// Directory to save the cropped 224x224 leaf of every image into
    #[arg(short = 'o', long)]
    pub save_crop_dir: Option<PathBuf>,

    #[arg(short, long, default_value = "png", value_parser = check_format)]
    pub format: String,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(short = 't', long, default_value_t = default_threads())]
    pub num_threads: usize,

    /// Log every pipeline stage
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Where the display crop of the `index`-th input goes, if crops are saved.
    ///
    /// The name keeps the whole source file name behind the input index, so
    /// inputs sharing a stem or a file name in different directories never
    /// collide.
    pub fn crop_path(&self, index: usize, image: &std::path::Path) -> Option<PathBuf> {
        let dir = self.save_crop_dir.as_ref()?;
        let file_name = image.file_name()?.to_string_lossy();
        Some(dir.join(format!("{index:04}-{file_name}.{}", self.format)))
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn check_format(s: &str) -> Result<String, String> {
    let supported: Vec<_> = ImageFormat::all()
        .filter(|f| f.writing_enabled())
        .flat_map(|f| f.extensions_str())
        .map(|s| format!("`{}`", s))
        .collect();
    let supported_message = format!("Supported formats: {}", supported.join(", "));

    let format = ImageFormat::from_extension(s)
        .ok_or(format!("{} is not supported. {}", s, supported_message))?;
    if !format.writing_enabled() {
        return Err(format!("{} is not supported. {}", s, supported_message));
    }

    Ok(s.to_string())
}
