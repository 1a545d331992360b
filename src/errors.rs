use thiserror::Error;

use crate::segmentation::BoundingBox;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the leaf diagnosis pipeline.
///
/// `NoLeafDetected` is the only expected failure: the photograph had no
/// foreground left after background removal. Every other variant is a
/// genuine fault (unreadable input, broken model, malformed collaborator
/// output) and is propagated as-is.
#[derive(Error, Debug)]
pub enum LeafDiseaseError {
    #[error("No leaf detected in the image!")]
    NoLeafDetected,

    #[error("Degenerate leaf region {bbox:?} for a {width}x{height} image")]
    DegenerateRegion {
        bbox: BoundingBox,
        width: u32,
        height: u32,
    },

    #[error("Image processing error: {operation} failed (file: {path})")]
    ImageProcessing {
        path: String,
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Model error: {operation} failed")]
    Model {
        operation: String,
        #[source]
        source: BoxedSource,
    },

    #[error("Validation error: {field} {reason}")]
    Validation { field: String, reason: String },
}

impl LeafDiseaseError {
    /// Whether this is the expected "nothing to classify" outcome.
    pub const fn is_no_leaf(&self) -> bool {
        matches!(self, Self::NoLeafDetected)
    }

    pub(crate) fn model<E>(operation: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Model {
            operation: operation.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, LeafDiseaseError>;

impl From<ort::Error> for LeafDiseaseError {
    fn from(err: ort::Error) -> Self {
        Self::model("ort operation", err)
    }
}

/// Shape errors only arise while building or reading model tensors, so they
/// are reported as model errors.
impl From<ndarray::ShapeError> for LeafDiseaseError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::model("tensor shape conversion", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_leaf_message_matches_user_facing_text() {
        let err = LeafDiseaseError::NoLeafDetected;
        assert!(err.is_no_leaf());
        assert_eq!(err.to_string(), "No leaf detected in the image!");
    }

    #[test]
    fn test_shape_error_is_a_model_error_with_source() {
        use std::error::Error;

        let shape_err = ndarray::Array::from_shape_vec((2, 2), vec![1.0f32; 3]).unwrap_err();
        let err: LeafDiseaseError = shape_err.into();
        assert!(!err.is_no_leaf());
        assert!(matches!(err, LeafDiseaseError::Model { .. }));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_degenerate_region_display() {
        let err = LeafDiseaseError::DegenerateRegion {
            bbox: BoundingBox {
                min_row: 3,
                min_col: 4,
                max_row: 3,
                max_col: 9,
            },
            width: 10,
            height: 10,
        };
        assert!(err.to_string().contains("10x10"));
    }
}
