use std::fmt;

use crate::errors::{LeafDiseaseError, Result};

/// Disease classes in the order of the classifier's output.
pub const CLASS_NAMES: [&str; 10] = [
    "Bacterial Spot",
    "Early Blight",
    "Late Blight",
    "Leaf Mold",
    "Septoria Leaf Spot",
    "Spider Mites",
    "Target Spot",
    "Tomato Yellow Leaf Curl Virus",
    "Tomato Mosaic Virus",
    "Healthy",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub index: usize,
    pub label: &'static str,
    /// Probability of `label`, in [0, 1].
    pub confidence: f32,
}

impl Prediction {
    /// Picks the most probable class. Ties go to the lowest index.
    ///
    /// NaN or infinite entries reject the whole vector.
    pub fn from_probabilities(probabilities: &[f32]) -> Result<Self> {
        if probabilities.len() != CLASS_NAMES.len() {
            return Err(LeafDiseaseError::Validation {
                field: "probabilities".to_string(),
                reason: format!(
                    "expected {} classes, got {}",
                    CLASS_NAMES.len(),
                    probabilities.len()
                ),
            });
        }
        if let Some(index) = probabilities.iter().position(|p| !p.is_finite()) {
            return Err(LeafDiseaseError::Validation {
                field: "probabilities".to_string(),
                reason: format!(
                    "entry {index} is not finite ({})",
                    probabilities[index]
                ),
            });
        }

        let (index, confidence) = probabilities.iter().copied().enumerate().fold(
            (0, probabilities[0]),
            |(best_index, best), (index, p)| {
                if p > best {
                    (index, p)
                } else {
                    (best_index, best)
                }
            },
        );

        Ok(Self {
            index,
            label: CLASS_NAMES[index],
            confidence,
        })
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} with confidence {:.2}%",
            self.label,
            self.confidence * 100.0
        )
    }
}

/// Numerically stable softmax for classifiers that emit logits.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_late_blight_example() -> Result<()> {
        let probabilities = [0.1, 0.05, 0.6, 0.05, 0.05, 0.05, 0.05, 0.0, 0.0, 0.05];
        let prediction = Prediction::from_probabilities(&probabilities)?;

        assert_eq!(prediction.index, 2);
        assert_eq!(prediction.label, "Late Blight");
        assert_eq!(prediction.confidence, 0.6);
        Ok(())
    }

    #[test]
    fn test_ties_resolve_to_lowest_index() -> Result<()> {
        let mut probabilities = [0.0; 10];
        probabilities[4] = 0.5;
        probabilities[9] = 0.5;

        let prediction = Prediction::from_probabilities(&probabilities)?;
        assert_eq!(prediction.label, "Septoria Leaf Spot");
        Ok(())
    }

    #[test]
    fn test_last_class_is_reachable() -> Result<()> {
        let mut probabilities = [0.01; 10];
        probabilities[9] = 0.91;
        assert_eq!(Prediction::from_probabilities(&probabilities)?.label, "Healthy");
        Ok(())
    }

    #[test]
    fn test_wrong_length_is_rejected() {
        assert!(Prediction::from_probabilities(&[]).is_err());
        assert!(Prediction::from_probabilities(&[1.0; 11]).is_err());
    }

    #[test]
    fn test_non_finite_output_is_rejected() {
        let mut probabilities = [0.0; 10];
        probabilities[0] = f32::NAN;
        probabilities[2] = 0.9;
        let err = Prediction::from_probabilities(&probabilities).unwrap_err();
        assert!(matches!(err, LeafDiseaseError::Validation { .. }));

        probabilities[0] = 0.0;
        probabilities[5] = f32::INFINITY;
        assert!(Prediction::from_probabilities(&probabilities).is_err());
    }

    #[test]
    fn test_display_formats_percentage() -> Result<()> {
        let mut probabilities = [0.0; 10];
        probabilities[1] = 0.9876;
        let prediction = Prediction::from_probabilities(&probabilities)?;
        assert_eq!(prediction.to_string(), "Early Blight with confidence 98.76%");
        Ok(())
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probabilities = softmax(&[1.0, 2.0, 3.0, 1000.0]);
        let sum: f32 = probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probabilities[3] > 0.999);
    }
}
