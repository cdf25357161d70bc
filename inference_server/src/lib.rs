mod inference_service;
#[cfg(feature = "ort-backend")]
mod ort_service;
mod server;

pub mod class_metadata;
pub mod codec;
pub mod config;
pub mod error;
pub mod labels;
pub mod model_service;
pub mod normalizer;
pub mod orchestrator;
pub mod telemetry;

pub use inference_service::InferenceService;
pub use model_service::{ClassNames, DetectionModel, RawDetection};
pub use orchestrator::Orchestrator;
#[cfg(feature = "ort-backend")]
pub use ort_service::YoloDetector;
#[cfg(feature = "ort-backend")]
pub use server::start_server;
pub use server::GrpcServer;
