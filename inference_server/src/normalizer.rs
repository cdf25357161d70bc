use crate::model_service::{ClassNames, RawDetection};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BboxFormat {
    /// Top-left corner plus width and height.
    #[default]
    Xywh,
    /// Top-left and bottom-right corners.
    Xyxy,
}

impl BboxFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            BboxFormat::Xywh => "xywh",
            BboxFormat::Xyxy => "xyxy",
        }
    }

    /// Unrecognized values fall back to `xywh`.
    pub fn parse_or_default(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "xyxy" => BboxFormat::Xyxy,
            _ => BboxFormat::Xywh,
        }
    }
}

/// A detection in canonical form: top-left `xywh`, pixel units.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub label: String,
    pub class_id: i32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn to_format(&self, format: BboxFormat) -> [f32; 4] {
        match format {
            BboxFormat::Xywh => [self.x, self.y, self.w, self.h],
            BboxFormat::Xyxy => [self.x, self.y, self.x + self.w, self.y + self.h],
        }
    }

    pub fn from_format(
        format: BboxFormat,
        coords: [f32; 4],
        label: String,
        class_id: i32,
        confidence: f32,
    ) -> Self {
        let [a, b, c, d] = coords;
        let (w, h) = match format {
            BboxFormat::Xywh => (c, d),
            BboxFormat::Xyxy => (c - a, d - b),
        };
        Self {
            x: a,
            y: b,
            w,
            h,
            label,
            class_id,
            confidence,
        }
    }
}

/// Turns raw model output into [`BoundingBox`] values.
///
/// Detections keep the order the model returned them in. Callers that want
/// them ranked must sort explicitly.
#[derive(Debug, Clone)]
pub struct Normalizer {
    class_names: Arc<ClassNames>,
}

impl Normalizer {
    pub fn new(class_names: Arc<ClassNames>) -> Self {
        Self { class_names }
    }

    pub fn label_for(&self, class_id: i32) -> String {
        match self.class_names.get(&class_id) {
            Some(name) => name.clone(),
            None => {
                tracing::warn!(class_id, "class id missing from the model name table");
                format!("class_{}", class_id)
            }
        }
    }

    pub fn normalize(
        &self,
        detections: &[RawDetection],
        confidence_threshold: f32,
    ) -> Vec<BoundingBox> {
        detections
            .iter()
            // NaN scores fail the comparison and are dropped.
            .filter(|det| det.score >= confidence_threshold)
            .map(|det| {
                let (x, w) = span(det.x1, det.x2);
                let (y, h) = span(det.y1, det.y2);
                BoundingBox {
                    x,
                    y,
                    w,
                    h,
                    label: self.label_for(det.class_id),
                    class_id: det.class_id,
                    confidence: det.score.clamp(0.0, 1.0),
                }
            })
            .collect()
    }
}

fn span(a: f32, b: f32) -> (f32, f32) {
    if a <= b {
        (a, b - a)
    } else {
        (b, a - b)
    }
}
