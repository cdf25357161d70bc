use crate::{codec::DecodedImage, error::ModelError};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;

/// Class id to class name, as published by the loaded model.
pub type ClassNames = BTreeMap<i32, String>;

/// One raw model output in corner form, source-image pixel units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub class_id: i32,
    pub score: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// A loaded detection model.
///
/// Calls are synchronous and arrive from several worker threads at once.
/// Implementations that cannot run `predict` concurrently report their real
/// limit through [`DetectionModel::concurrency_limit`] and the orchestrator
/// gates access accordingly.
pub trait DetectionModel: Send + Sync + 'static {
    fn predict(
        &self,
        image: &DecodedImage,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>, ModelError>;

    fn class_names(&self) -> &ClassNames;

    /// Encoded segmentation overlay, for models that produce one.
    fn segmentation_overlay(&self, _image: &DecodedImage) -> Result<Option<Vec<u8>>, ModelError> {
        Ok(None)
    }

    /// Maximum number of concurrent `predict` calls, `None` when unbounded.
    fn concurrency_limit(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(1)
    }
}
