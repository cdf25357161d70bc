use crate::{
    config::ServerConfig, inference_service::InferenceService, model_service::DetectionModel,
    orchestrator::Orchestrator,
};
use inference_proto::inference_methods_server::InferenceMethodsServer;
use std::future::Future;
use tokio::{net::TcpListener, signal};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::server::NamedService;
use tonic::transport::server::Router;
use tonic::transport::Server;
use tonic_health::{server::HealthReporter, ServingStatus};

pub struct GrpcServer {
    router: Router,
    health_reporter: HealthReporter,
    service_name: &'static str,
    addr: String,
}

impl GrpcServer {
    pub fn new<M: DetectionModel>(
        orchestrator: Orchestrator<M>,
        config: &ServerConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let inference_service = InferenceService::new(
            orchestrator,
            config.worker_pool_size,
            config.request_timeout(),
        );
        let inference_server = InferenceMethodsServer::new(inference_service)
            .max_decoding_message_size(config.max_message_size_bytes)
            .max_encoding_message_size(config.max_message_size_bytes);

        let (health_reporter, health_service) = tonic_health::server::health_reporter();
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(inference_proto::FILE_DESCRIPTOR_SET)
            .build_v1()?;

        let router = Server::builder()
            .tcp_nodelay(true)
            .add_service(health_service)
            .add_service(reflection_service)
            .add_service(inference_server);

        tracing::info!(
            worker_pool_size = config.worker_pool_size,
            max_message_size_bytes = config.max_message_size_bytes,
            request_timeout_ms = config.request_timeout_ms,
            "Configured gRPC server"
        );

        Ok(Self {
            router,
            health_reporter,
            service_name: <InferenceMethodsServer<InferenceService<M>> as NamedService>::NAME,
            addr: config.get_address(),
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr: std::net::SocketAddr = self.addr.parse()?;

        self.mark_serving().await;
        tracing::info!("Inference service listening on {}", self.addr);

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        self.router.serve_with_shutdown(addr, shutdown).await?;
        Ok(())
    }

    /// Serves on an already bound listener until `shutdown` resolves.
    pub async fn run_with_listener(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.mark_serving().await;
        tracing::info!("Inference service listening on {:?}", listener.local_addr()?);

        self.router
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;
        Ok(())
    }

    async fn mark_serving(&self) {
        self.health_reporter
            .set_service_status(self.service_name, ServingStatus::Serving)
            .await;
    }
}

#[cfg(feature = "ort-backend")]
pub async fn start_server(
    config: crate::config::Config,
) -> Result<(), Box<dyn std::error::Error>> {
    let detector = crate::ort_service::YoloDetector::new(&config.model)?;
    let orchestrator = Orchestrator::new(detector, config.model.name.clone());

    let grpc_server = GrpcServer::new(orchestrator, &config.server)?;
    grpc_server.run().await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
