use crate::{
    model_service::DetectionModel,
    orchestrator::{CancelFlag, Orchestrator},
};
use inference_proto::{inference_methods_server::InferenceMethods, InferRequest, InferResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tonic::{async_trait, Request, Response, Status};

/// Binds the orchestrator to tonic.
///
/// Every call takes a permit from a pool of `worker_pool_size` and runs the
/// synchronous decode/predict/encode pipeline on a blocking thread. The whole
/// call, including the wait for a permit, is bounded by `call_timeout`.
pub struct InferenceService<M: DetectionModel> {
    orchestrator: Arc<Orchestrator<M>>,
    workers: Arc<Semaphore>,
    call_timeout: Duration,
}

impl<M: DetectionModel> Clone for InferenceService<M> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            workers: self.workers.clone(),
            call_timeout: self.call_timeout,
        }
    }
}

impl<M: DetectionModel> InferenceService<M> {
    pub fn new(
        orchestrator: Orchestrator<M>,
        worker_pool_size: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            workers: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            call_timeout,
        }
    }

    /// Runs one call, raising `cancel` if this future is dropped before the
    /// pipeline returns.
    async fn dispatch(
        &self,
        request: InferRequest,
        cancel: CancelFlag,
    ) -> Result<InferResponse, Status> {
        let permit = self
            .workers
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Status::unavailable("worker pool is shut down"))?;

        let guard = cancel.cancel_on_drop();
        let orchestrator = self.orchestrator.clone();

        let outcome = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            orchestrator.handle(request, &cancel)
        })
        .await
        .map_err(|e| {
            tracing::error!("Inference worker panicked: {}", e);
            Status::internal(format!("inference worker failed: {}", e))
        })?;

        guard.disarm();
        outcome.map_err(Status::from)
    }
}

#[async_trait]
impl<M: DetectionModel> InferenceMethods for InferenceService<M> {
    #[tracing::instrument(
        skip(self, request),
        fields(image_bytes = request.get_ref().image_bytes.len())
    )]
    async fn infer(
        &self,
        request: Request<InferRequest>,
    ) -> Result<Response<InferResponse>, Status> {
        let request = request.into_inner();

        let call = self.dispatch(request, CancelFlag::new());
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(response)) => {
                tracing::debug!("Returning {} detections", response.list_bbox.len());
                Ok(Response::new(response))
            }
            Ok(Err(status)) => Err(status),
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "Call deadline exceeded"
                );
                Err(Status::deadline_exceeded(format!(
                    "inference did not finish within {} ms",
                    self.call_timeout.as_millis()
                )))
            }
        }
    }
}
