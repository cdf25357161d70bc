use image::{ImageBuffer, Rgb};
use inference_proto::{inference_methods_client::InferenceMethodsClient, InferRequest};
use inference_server::{
    codec::{self, DecodedImage},
    config::ServerConfig,
    error::ModelError,
    ClassNames, DetectionModel, GrpcServer, Orchestrator, RawDetection,
};
use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::{net::TcpListener, sync::oneshot};
use tonic::{transport::Channel, Code, Request};

#[derive(Clone)]
struct FixtureModel {
    class_names: ClassNames,
    scores: Vec<f32>,
    fail: bool,
    delay: Duration,
    calls: Arc<AtomicUsize>,
}

impl FixtureModel {
    fn new(scores: &[f32]) -> Self {
        Self {
            class_names: [
                (0, "scratch".to_string()),
                (1, "Scratch ".to_string()),
                (2, "DENT".to_string()),
            ]
            .into_iter()
            .collect(),
            scores: scores.to_vec(),
            fail: false,
            delay: Duration::ZERO,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl DetectionModel for FixtureModel {
    fn predict(
        &self,
        _image: &DecodedImage,
        _confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>, ModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if self.fail {
            return Err(ModelError::Inference("device lost".to_string()));
        }

        Ok(self
            .scores
            .iter()
            .enumerate()
            .map(|(i, &score)| RawDetection {
                class_id: 2,
                score,
                x1: 5.0 + i as f32,
                y1: 5.0,
                x2: 25.0 + i as f32,
                y2: 45.0,
            })
            .collect())
    }

    fn class_names(&self) -> &ClassNames {
        &self.class_names
    }
}

struct TestServer {
    client: InferenceMethodsClient<Channel>,
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

async fn spawn_server(model: FixtureModel, config: ServerConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = GrpcServer::new(Orchestrator::new(model, "fixture"), &config).unwrap();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .run_with_listener(listener, async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    let client = InferenceMethodsClient::connect(format!("http://{}", addr))
        .await
        .unwrap();

    TestServer {
        client,
        addr,
        _shutdown: shutdown_tx,
    }
}

fn png_bytes() -> Vec<u8> {
    let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(32, 32, Rgb([0, 128, 255]));
    let mut cursor = Cursor::new(Vec::new());
    img.write_to(&mut cursor, image::ImageFormat::Png).unwrap();
    cursor.into_inner()
}

fn infer_request(image_bytes: Vec<u8>, threshold: f32) -> InferRequest {
    InferRequest {
        image_bytes,
        confidence_threshold: threshold,
        bbox_format: "xywh".to_string(),
        include_segmentation: false,
    }
}

#[tokio::test]
async fn test_infer_round_trip() {
    let model = FixtureModel::new(&[0.9, 0.3, 0.5]);
    let mut server = spawn_server(model, ServerConfig::default()).await;

    let response = server
        .client
        .infer(Request::new(infer_request(png_bytes(), 0.5)))
        .await
        .unwrap()
        .into_inner();

    let scores: Vec<f32> = response.list_bbox.iter().map(|b| b.confidence).collect();
    assert_eq!(scores, vec![0.9, 0.5]);
    assert_eq!(response.list_bbox[0].label, "DENT");
    assert_eq!(response.error, "");
    assert!(response.img_segmentation.is_empty());
    assert_eq!(response.model_name, "fixture");

    let legend = response.defect_list;
    assert_eq!(legend.len(), 3);
    assert_eq!(legend[0].ui_color, legend[1].ui_color);
    assert_eq!(legend[0].mask_color, legend[1].mask_color);
}

#[tokio::test]
async fn test_corrupt_image_reports_both_channels() {
    let mut server = spawn_server(FixtureModel::new(&[0.9]), ServerConfig::default()).await;

    let status = server
        .client
        .infer(Request::new(infer_request(vec![0x00, 0x01, 0x02, 0x03], 0.5)))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::InvalidArgument);
    let payload = codec::failure_response(&status).expect("best-effort payload");
    assert!(!payload.error.is_empty());
    assert_eq!(payload.defect_list.len(), 3);
}

#[tokio::test]
async fn test_model_failure_keeps_legend() {
    let mut healthy = spawn_server(FixtureModel::new(&[0.9]), ServerConfig::default()).await;
    let ok = healthy
        .client
        .infer(Request::new(infer_request(png_bytes(), 0.5)))
        .await
        .unwrap()
        .into_inner();

    let mut model = FixtureModel::new(&[0.9]);
    model.fail = true;
    let mut broken = spawn_server(model, ServerConfig::default()).await;
    let status = broken
        .client
        .infer(Request::new(infer_request(png_bytes(), 0.5)))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Internal);
    let payload = codec::failure_response(&status).unwrap();
    assert!(payload.error.contains("device lost"));
    assert_eq!(payload.defect_list, ok.defect_list);
}

#[tokio::test]
async fn test_oversized_request_rejected_before_prediction() {
    let model = FixtureModel::new(&[0.9]);
    let calls = model.calls.clone();
    let config = ServerConfig {
        max_message_size_bytes: 1024,
        ..ServerConfig::default()
    };
    let mut server = spawn_server(model, config).await;

    let status = server
        .client
        .infer(Request::new(infer_request(vec![7u8; 16 * 1024], 0.5)))
        .await
        .unwrap_err();

    assert!(
        matches!(status.code(), Code::OutOfRange | Code::ResourceExhausted),
        "unexpected status {:?}",
        status
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queued_calls_each_get_one_deadline() {
    let mut model = FixtureModel::new(&[0.9]);
    model.delay = Duration::from_millis(1000);
    let calls = model.calls.clone();
    let config = ServerConfig {
        worker_pool_size: 1,
        request_timeout_ms: 200,
        ..ServerConfig::default()
    };
    let server = spawn_server(model, config).await;

    let started = Instant::now();
    let pending: Vec<_> = (0..4)
        .map(|_| {
            let mut client = server.client.clone();
            tokio::spawn(async move {
                let status = client
                    .infer(Request::new(infer_request(png_bytes(), 0.5)))
                    .await
                    .unwrap_err();
                (status.code(), started.elapsed())
            })
        })
        .collect();

    for handle in pending {
        let (code, elapsed) = handle.await.unwrap();
        assert_eq!(code, Code::DeadlineExceeded);
        assert!(
            elapsed < Duration::from_millis(450),
            "call failed after {:?}",
            elapsed
        );
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_health_reports_serving() {
    use tonic_health::pb::{
        health_check_response::ServingStatus, health_client::HealthClient, HealthCheckRequest,
    };

    let server = spawn_server(FixtureModel::new(&[]), ServerConfig::default()).await;
    let channel = Channel::from_shared(format!("http://{}", server.addr))
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut health = HealthClient::new(channel);

    let response = health
        .check(Request::new(HealthCheckRequest {
            service: "inference_service.InferenceMethods".to_string(),
        }))
        .await
        .unwrap()
        .into_inner();

    assert_eq!(response.status(), ServingStatus::Serving);
}
