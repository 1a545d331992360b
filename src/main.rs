use std::{
    fs,
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use image::ImageFormat;
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use rayon::{prelude::*, ThreadPoolBuilder};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use leaf_disease_rs::{
    BackgroundRemover, Config, DiseaseClassifier, LeafDiagnoser, OnnxBackgroundRemover,
    OnnxClassifier, PassthroughBackgroundRemover,
};

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let config = Config::parse();
    init_logging(config.verbose);

    ensure!(
        config.classifier_model.exists(),
        "Classifier model path does not exist"
    );
    if let Some(background_model) = &config.background_model {
        ensure!(
            background_model.exists(),
            "Background model path does not exist"
        );
    }
    for image in &config.images {
        ensure!(image.exists(), "Image does not exist: {}", image.display());
    }
    if let Some(dir) = &config.save_crop_dir {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create crop directory: {}", dir.display()))?;
    }

    let normalization = config.normalization.normalization();
    let classifier = OnnxClassifier::new(
        &config.classifier_model,
        config.device_id,
        normalization.layout,
        config.apply_softmax,
    )?;
    let remover: Box<dyn BackgroundRemover> = match &config.background_model {
        Some(path) => Box::new(OnnxBackgroundRemover::new(path, config.device_id)?),
        None => {
            warn!("no background model given, expecting images on a black background");
            Box::new(PassthroughBackgroundRemover)
        }
    };
    let diagnoser = LeafDiagnoser::new(remover, classifier, normalization);

    ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build_global()?;

    let progress_bar = ProgressBar::new(config.images.len() as u64);
    progress_bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec} {eta})",
        )?
        .progress_chars("#>-"),
    );

    let no_leaf = AtomicUsize::new(0);
    config
        .images
        .par_iter()
        .enumerate()
        .progress_with(progress_bar.clone())
        .try_for_each(|(index, path)| -> Result<()> {
            match diagnose_one(&diagnoser, index, path, &config, &progress_bar) {
                Ok(()) => Ok(()),
                Err(e) if e.is_no_leaf() => {
                    no_leaf.fetch_add(1, Ordering::Relaxed);
                    progress_bar.suspend(|| println!("{}: Error: {}", path.display(), e));
                    Ok(())
                }
                Err(e) => {
                    error!(image = %path.display(), "{e}");
                    Err(e).with_context(|| format!("Failed to diagnose {}", path.display()))
                }
            }
        })?;

    progress_bar.finish();
    info!(
        images = config.images.len(),
        no_leaf = no_leaf.load(Ordering::Relaxed),
        "done"
    );

    Ok(())
}

fn diagnose_one<B, C>(
    diagnoser: &LeafDiagnoser<B, C>,
    index: usize,
    path: &Path,
    config: &Config,
    progress_bar: &ProgressBar,
) -> leaf_disease_rs::Result<()>
where
    B: BackgroundRemover,
    C: DiseaseClassifier,
{
    let diagnosis = diagnoser.diagnose_path(path)?;

    if let Some(output_path) = config.crop_path(index, path) {
        let format = ImageFormat::from_extension(&config.format).unwrap_or(ImageFormat::Png);
        diagnosis
            .display_image
            .save_with_format(&output_path, format)
            .map_err(|e| leaf_disease_rs::LeafDiseaseError::ImageProcessing {
                path: output_path.display().to_string(),
                operation: "crop saving".to_string(),
                source: Box::new(e),
            })?;
    }

    progress_bar.suspend(|| {
        println!(
            "{}: Predicted Disease: {}",
            path.display(),
            diagnosis.prediction
        )
    });
    Ok(())
}
