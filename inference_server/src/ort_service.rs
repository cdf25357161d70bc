use crate::{
    codec::DecodedImage,
    config::{Accelerator, ModelConfig, Validatable},
    error::ModelError,
    labels,
    model_service::{ClassNames, DetectionModel, RawDetection},
};
use image::{imageops::FilterType, GenericImageView};
use ndarray::{Array, ArrayView2, Axis, Ix4};
use ort::{
    execution_providers::{
        CUDAExecutionProvider, ExecutionProviderDispatch, TensorRTExecutionProvider,
    },
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

const NMS_IOU_THRESHOLD: f32 = 0.7;

fn intersection(box1: &RawDetection, box2: &RawDetection) -> f32 {
    let w = box1.x2.min(box2.x2) - box1.x1.max(box2.x1);
    let h = box1.y2.min(box2.y2) - box1.y1.max(box2.y1);
    w.max(0.0) * h.max(0.0)
}

fn union(box1: &RawDetection, box2: &RawDetection) -> f32 {
    ((box1.x2 - box1.x1) * (box1.y2 - box1.y1)) + ((box2.x2 - box2.x1) * (box2.y2 - box2.y1))
        - intersection(box1, box2)
}

fn iou(box1: &RawDetection, box2: &RawDetection) -> f32 {
    let union = union(box1, box2);
    if union <= 0.0 {
        return 0.0;
    }
    intersection(box1, box2) / union
}

fn to_input_tensor(image: &DecodedImage, input_size: u32) -> Array<f32, Ix4> {
    let size = input_size as usize;
    let img = image
        .as_dynamic()
        .resize_exact(input_size, input_size, FilterType::CatmullRom);

    let mut input = Array::zeros((1, 3, size, size));
    for pixel in img.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    input
}

/// Reads YOLO rows laid out as `[cx, cy, w, h, score_0, .., score_n]` in model
/// input coordinates and scales them back to the source image.
fn parse_rows(
    rows: ArrayView2<f32>,
    input_size: u32,
    (img_width, img_height): (u32, u32),
    confidence_threshold: f32,
) -> Vec<RawDetection> {
    let scale_x = img_width as f32 / input_size as f32;
    let scale_y = img_height as f32 / input_size as f32;

    rows.axis_iter(Axis(0))
        .filter_map(|row| {
            let (class_id, score) = row
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })?;

            if score < confidence_threshold {
                return None;
            }

            let xc = row[0] * scale_x;
            let yc = row[1] * scale_y;
            let w = row[2] * scale_x;
            let h = row[3] * scale_y;

            Some(RawDetection {
                class_id: class_id as i32,
                score,
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            })
        })
        .collect()
}

/// Greedy NMS, highest score first.
fn non_max_suppression(mut boxes: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    boxes.sort_by(|box1, box2| box2.score.total_cmp(&box1.score));
    let mut kept: Vec<RawDetection> = Vec::new();

    for candidate in boxes {
        if kept.iter().all(|k| iou(k, &candidate) < iou_threshold) {
            kept.push(candidate);
        }
    }

    kept
}

fn execution_providers(accelerator: Accelerator) -> Vec<ExecutionProviderDispatch> {
    match accelerator {
        Accelerator::Cpu => Vec::new(),
        Accelerator::Cuda => vec![CUDAExecutionProvider::default().build()],
        Accelerator::TensorRt => vec![
            TensorRTExecutionProvider::default()
                .with_engine_cache(true)
                .build(),
            CUDAExecutionProvider::default().build(),
        ],
    }
}

/// YOLO detector on ONNX Runtime. Holds `num_instances` sessions, each usable
/// by one call at a time, handed out round-robin.
pub struct YoloDetector {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    input_size: u32,
    class_names: ClassNames,
}

impl YoloDetector {
    pub fn new(model_config: &ModelConfig) -> Result<Self, ModelError> {
        let class_names = labels::load_class_names(&model_config.get_labels_path())
            .map_err(|e| ModelError::Load(e.to_string()))?;

        ort::init()
            .with_execution_providers(execution_providers(model_config.accelerator))
            .commit()
            .map_err(|e| ModelError::Load(e.to_string()))?;

        let sessions = (0..model_config.num_instances.max(1))
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| ModelError::Load(e.to_string()))?;

        tracing::info!(
            sessions = sessions.len(),
            accelerator = ?model_config.accelerator,
            classes = class_names.len(),
            "Created ONNX sessions"
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            input_size: model_config.input_size,
            class_names,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ndarray::ArrayD<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index].lock();
        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| ModelError::Input(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("failed to extract tensor: {}", e)))?;

        let array = ndarray::ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelError::Inference(format!("invalid tensor shape: {}", e)))?;

        Ok(array)
    }
}

impl DetectionModel for YoloDetector {
    fn predict(
        &self,
        image: &DecodedImage,
        confidence_threshold: f32,
    ) -> Result<Vec<RawDetection>, ModelError> {
        let input = to_input_tensor(image, self.input_size);
        let output = self.run_inference(&input)?;

        if output.ndim() != 3 || output.shape()[1] < 5 {
            return Err(ModelError::Inference(format!(
                "unexpected output shape {:?}",
                output.shape()
            )));
        }

        // [1, 4 + classes, anchors] -> [anchors, 4 + classes]
        let rows = output.index_axis(Axis(0), 0);
        let rows = rows
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| ModelError::Inference(e.to_string()))?
            .reversed_axes();

        let boxes = parse_rows(rows, self.input_size, image.dimensions(), confidence_threshold);
        Ok(non_max_suppression(boxes, NMS_IOU_THRESHOLD))
    }

    fn class_names(&self) -> &ClassNames {
        &self.class_names
    }

    fn concurrency_limit(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.sessions.len())
    }
}
