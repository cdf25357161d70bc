use crate::{
    class_metadata::{ClassMetadata, ClassMetadataEntry, Rgb},
    error::InferenceError,
    normalizer::{BboxFormat, BoundingBox},
};
use image::{DynamicImage, GenericImageView};
use inference_proto::{DefectInfo, InferRequest, InferResponse, RgbColor};
use prost::Message;
use std::io::Cursor;
use std::sync::Arc;
use tonic::Status;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.10;

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub image_bytes: Vec<u8>,
    pub confidence_threshold: f32,
    pub bbox_format: BboxFormat,
    pub include_segmentation: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceResponse {
    pub model_name: String,
    pub boxes: Vec<BoundingBox>,
    pub bbox_format: BboxFormat,
    pub class_metadata: Arc<ClassMetadata>,
    /// Empty when no overlay was produced.
    pub segmentation_overlay: Vec<u8>,
    pub error: String,
}

#[derive(Debug, Clone)]
pub struct DecodedImage {
    image: DynamicImage,
}

impl DecodedImage {
    pub fn new(image: DynamicImage) -> Self {
        Self { image }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn as_dynamic(&self) -> &DynamicImage {
        &self.image
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage, InferenceError> {
    if bytes.is_empty() {
        return Err(InferenceError::InvalidImage("image is empty".to_string()));
    }

    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| InferenceError::InvalidImage(e.to_string()))?;

    if reader.format().is_none() {
        return Err(InferenceError::InvalidImage("unrecognized image container".to_string()));
    }

    let image = reader
        .decode()
        .map_err(|e| InferenceError::InvalidImage(e.to_string()))?;

    if image.width() == 0 || image.height() == 0 {
        return Err(InferenceError::InvalidImage("image has no pixels".to_string()));
    }

    Ok(DecodedImage::new(image))
}

pub fn decode_request(request: InferRequest) -> Result<InferenceRequest, InferenceError> {
    if request.image_bytes.is_empty() {
        return Err(InferenceError::MissingField("image_bytes"));
    }

    let confidence_threshold =
        if request.confidence_threshold.is_finite() && request.confidence_threshold > 0.0 {
            request.confidence_threshold.min(1.0)
        } else {
            DEFAULT_CONFIDENCE_THRESHOLD
        };

    Ok(InferenceRequest {
        image_bytes: request.image_bytes,
        confidence_threshold,
        bbox_format: BboxFormat::parse_or_default(&request.bbox_format),
        include_segmentation: request.include_segmentation,
    })
}

pub fn encode_request(request: &InferenceRequest) -> InferRequest {
    InferRequest {
        image_bytes: request.image_bytes.clone(),
        confidence_threshold: request.confidence_threshold,
        bbox_format: request.bbox_format.as_str().to_string(),
        include_segmentation: request.include_segmentation,
    }
}

pub fn encode_class_metadata(metadata: &ClassMetadata) -> Vec<DefectInfo> {
    metadata
        .entries()
        .iter()
        .map(|entry| DefectInfo {
            name: entry.name.clone(),
            class_id: entry.class_id,
            ui_color: Some(encode_color(entry.ui_color)),
            mask_color: Some(encode_color(entry.mask_color)),
        })
        .collect()
}

pub fn encode_response(response: &InferenceResponse) -> InferResponse {
    let list_bbox = response
        .boxes
        .iter()
        .map(|bbox| {
            let [x, y, w, h] = bbox.to_format(response.bbox_format);
            inference_proto::BoundingBox {
                x,
                y,
                w,
                h,
                label: bbox.label.clone(),
                class_id: bbox.class_id,
                confidence: bbox.confidence,
            }
        })
        .collect();

    InferResponse {
        model_name: response.model_name.clone(),
        list_bbox,
        defect_list: encode_class_metadata(&response.class_metadata),
        img_segmentation: response.segmentation_overlay.clone(),
        error: response.error.clone(),
        bbox_format: response.bbox_format.as_str().to_string(),
    }
}

pub fn decode_response(response: InferResponse) -> InferenceResponse {
    let bbox_format = BboxFormat::parse_or_default(&response.bbox_format);

    let boxes = response
        .list_bbox
        .into_iter()
        .map(|bbox| {
            BoundingBox::from_format(
                bbox_format,
                [bbox.x, bbox.y, bbox.w, bbox.h],
                bbox.label,
                bbox.class_id,
                bbox.confidence,
            )
        })
        .collect();

    let entries = response
        .defect_list
        .into_iter()
        .map(|info| ClassMetadataEntry {
            name: info.name,
            class_id: info.class_id,
            ui_color: decode_color(info.ui_color),
            mask_color: decode_color(info.mask_color),
        })
        .collect();

    InferenceResponse {
        model_name: response.model_name,
        boxes,
        bbox_format,
        class_metadata: Arc::new(ClassMetadata::from_entries(entries)),
        segmentation_overlay: response.img_segmentation,
        error: response.error,
    }
}

/// Best-effort payload attached to a failed call, if the server sent one.
pub fn failure_response(status: &Status) -> Option<InferResponse> {
    if status.details().is_empty() {
        return None;
    }
    InferResponse::decode(status.details()).ok()
}

fn encode_color(color: Rgb) -> RgbColor {
    RgbColor {
        r: color.r.into(),
        g: color.g.into(),
        b: color.b.into(),
    }
}

fn decode_color(color: Option<RgbColor>) -> Rgb {
    let color = color.unwrap_or_default();
    let channel = |value: u32| u8::try_from(value).unwrap_or(u8::MAX);
    Rgb::new(channel(color.r), channel(color.g), channel(color.b))
}
