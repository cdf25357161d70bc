use crate::{
    class_metadata::ClassMetadata,
    codec::{self, DecodedImage, InferenceRequest, InferenceResponse},
    error::InferenceError,
    model_service::{DetectionModel, RawDetection},
    normalizer::{BboxFormat, Normalizer},
};
use inference_proto::{InferRequest, InferResponse};
use parking_lot::{Condvar, Mutex};
use prost::Message;
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tonic::Status;

/// Per-call progress. A call only ever moves forward through these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CallState {
    Received,
    Decoding,
    Predicting,
    Normalizing,
    Responding,
    Failed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Received => "received",
            CallState::Decoding => "decoding",
            CallState::Predicting => "predicting",
            CallState::Normalizing => "normalizing",
            CallState::Responding => "responding",
            CallState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
struct CallTracker {
    state: CallState,
}

impl CallTracker {
    fn new() -> Self {
        Self {
            state: CallState::Received,
        }
    }

    fn advance(&mut self, next: CallState) {
        debug_assert!(next > self.state, "{} -> {}", self.state, next);
        tracing::trace!(from = %self.state, to = %next, "call state");
        self.state = next;
    }
}

/// Raised by the transport when a call is abandoned (deadline, disconnect).
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Guard that cancels the flag when dropped unless disarmed first.
    pub fn cancel_on_drop(&self) -> CancelOnDrop {
        CancelOnDrop {
            flag: Some(self.clone()),
        }
    }
}

#[derive(Debug)]
pub struct CancelOnDrop {
    flag: Option<CancelFlag>,
}

impl CancelOnDrop {
    pub fn disarm(mut self) {
        self.flag = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = self.flag.take() {
            flag.cancel();
        }
    }
}

/// Counting gate around the model, sized to its real concurrency.
#[derive(Debug)]
struct PredictionGate {
    available: Mutex<usize>,
    released: Condvar,
}

impl PredictionGate {
    fn new(limit: NonZeroUsize) -> Self {
        Self {
            available: Mutex::new(limit.get()),
            released: Condvar::new(),
        }
    }

    fn enter(&self) -> GatePermit<'_> {
        let mut available = self.available.lock();
        while *available == 0 {
            self.released.wait(&mut available);
        }
        *available -= 1;
        GatePermit { gate: self }
    }
}

struct GatePermit<'a> {
    gate: &'a PredictionGate,
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        *self.gate.available.lock() += 1;
        self.gate.released.notify_one();
    }
}

/// A failed call: the error, where it happened, and the payload clients still get.
#[derive(Debug, Clone)]
pub struct CallFailure {
    pub error: InferenceError,
    pub failed_in: CallState,
    pub response: InferResponse,
}

impl From<CallFailure> for Status {
    fn from(failure: CallFailure) -> Self {
        Status::with_details(
            failure.error.code(),
            failure.error.to_string(),
            failure.response.encode_to_vec().into(),
        )
    }
}

struct Prediction {
    detections: Vec<RawDetection>,
    overlay: Vec<u8>,
}

pub struct Orchestrator<M: DetectionModel> {
    model: M,
    model_name: String,
    normalizer: Normalizer,
    class_metadata: Arc<ClassMetadata>,
    gate: Option<PredictionGate>,
}

impl<M: DetectionModel> Orchestrator<M> {
    pub fn new(model: M, model_name: impl Into<String>) -> Self {
        let class_names = Arc::new(model.class_names().clone());
        let class_metadata = Arc::new(ClassMetadata::build(&class_names));
        let gate = model.concurrency_limit().map(PredictionGate::new);
        let model_name = model_name.into();

        tracing::info!(
            model_name = %model_name,
            classes = class_metadata.len(),
            concurrency_limit = ?model.concurrency_limit(),
            "Model loaded"
        );

        Self {
            model,
            model_name,
            normalizer: Normalizer::new(class_names),
            class_metadata,
            gate,
        }
    }

    pub fn handle(
        &self,
        request: InferRequest,
        cancel: &CancelFlag,
    ) -> Result<InferResponse, CallFailure> {
        let mut call = CallTracker::new();
        let requested_format = BboxFormat::parse_or_default(&request.bbox_format);

        call.advance(CallState::Decoding);
        let (request, image) = self
            .decode(request)
            .map_err(|e| self.fail(&mut call, e, requested_format))?;
        self.checkpoint(&mut call, cancel, request.bbox_format)?;

        call.advance(CallState::Predicting);
        let prediction = self
            .predict(&request, &image)
            .map_err(|e| self.fail(&mut call, e, request.bbox_format))?;
        self.checkpoint(&mut call, cancel, request.bbox_format)?;

        call.advance(CallState::Normalizing);
        let boxes = self
            .normalizer
            .normalize(&prediction.detections, request.confidence_threshold);

        call.advance(CallState::Responding);
        tracing::debug!(
            raw = prediction.detections.len(),
            kept = boxes.len(),
            threshold = request.confidence_threshold,
            "Returning detections"
        );

        let response = InferenceResponse {
            model_name: self.model_name.clone(),
            boxes,
            bbox_format: request.bbox_format,
            class_metadata: self.class_metadata.clone(),
            segmentation_overlay: prediction.overlay,
            error: String::new(),
        };
        Ok(codec::encode_response(&response))
    }

    fn decode(
        &self,
        request: InferRequest,
    ) -> Result<(InferenceRequest, DecodedImage), InferenceError> {
        let request = codec::decode_request(request)?;
        let image = codec::decode_image(&request.image_bytes)?;
        Ok((request, image))
    }

    fn predict(
        &self,
        request: &InferenceRequest,
        image: &DecodedImage,
    ) -> Result<Prediction, InferenceError> {
        let _permit = self.gate.as_ref().map(PredictionGate::enter);

        let detections = self.model.predict(image, request.confidence_threshold)?;

        let overlay = if request.include_segmentation {
            match self.model.segmentation_overlay(image)? {
                Some(overlay) => overlay,
                None => {
                    tracing::warn!(
                        model_name = %self.model_name,
                        "Segmentation requested but the model produced none"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        Ok(Prediction {
            detections,
            overlay,
        })
    }

    fn checkpoint(
        &self,
        call: &mut CallTracker,
        cancel: &CancelFlag,
        bbox_format: BboxFormat,
    ) -> Result<(), CallFailure> {
        if cancel.is_cancelled() {
            let error = InferenceError::Cancelled(call.state);
            return Err(self.fail(call, error, bbox_format));
        }
        Ok(())
    }

    fn fail(
        &self,
        call: &mut CallTracker,
        error: InferenceError,
        bbox_format: BboxFormat,
    ) -> CallFailure {
        let failed_in = call.state;
        call.advance(CallState::Failed);

        match &error {
            InferenceError::Cancelled(_) => {
                tracing::info!(state = %failed_in, "Call abandoned by transport")
            }
            InferenceError::Prediction(_) => {
                tracing::error!(state = %failed_in, error = %error, "Inference call failed")
            }
            _ => tracing::warn!(state = %failed_in, error = %error, "Rejected inference call"),
        }

        let response = InferenceResponse {
            model_name: self.model_name.clone(),
            boxes: Vec::new(),
            bbox_format,
            class_metadata: self.class_metadata.clone(),
            segmentation_overlay: Vec::new(),
            error: error.to_string(),
        };

        CallFailure {
            error,
            failed_in,
            response: codec::encode_response(&response),
        }
    }
}
