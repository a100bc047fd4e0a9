use std::fs;
use std::path::Path;
use std::time::Instant;

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageBuffer, Rgb, RgbImage};
use tensorflow::{
    Graph, ImportGraphDefOptions, Operation, Session, SessionOptions, SessionRunArgs, Status,
    Tensor,
};
use thiserror::Error;
use tracing::{debug, info};

/// Square input side of the exported detector.
const INPUT_SIZE: u32 = 640;
const LETTERBOX_FILL: u8 = 114;
/// Anchors below this score never become boxes.
const CANDIDATE_FLOOR: f32 = 0.25;
const NMS_IOU_THRESHOLD: f32 = 0.70;
const MAX_DETECTIONS: usize = 300;

const INPUT_OPERATION: &str = "x";
const OUTPUT_OPERATION: &str = "Identity";

/// One candidate box produced by a detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionBox {
    pub class_id: usize,
    pub confidence: f32,
    /// `[x_min, y_min, x_max, y_max]` in source image pixels.
    pub bbox: [f32; 4],
}

impl DetectionBox {
    fn area(&self) -> f32 {
        (self.bbox[2] - self.bbox[0]).max(0.0) * (self.bbox[3] - self.bbox[1]).max(0.0)
    }

    fn iou(&self, other: &DetectionBox) -> f32 {
        let x1 = self.bbox[0].max(other.bbox[0]);
        let y1 = self.bbox[1].max(other.bbox[1]);
        let x2 = self.bbox[2].min(other.bbox[2]);
        let y2 = self.bbox[3].min(other.bbox[3]);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Boxes found in one image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    pub boxes: Vec<DetectionBox>,
}

/// An object detector the service can run uploads through.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectionResult>, ModelError>;

    /// Name of the class at `class_id`, if the model has one.
    fn class_name(&self, class_id: usize) -> Option<&str>;
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("tensorflow error: {0}")]
    Tensorflow(String),
    #[error("operation `{0}` not found in graph")]
    MissingOperation(&'static str),
    #[error("class list {0} has no entries")]
    EmptyClassList(String),
    #[error("unexpected output shape {dims:?}, expected [1, {rows}, N]")]
    OutputShape { dims: Vec<u64>, rows: usize },
}

impl From<Status> for ModelError {
    fn from(status: Status) -> Self {
        ModelError::Tensorflow(status.to_string())
    }
}

/// Maps letterboxed model coordinates back onto the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    width: f32,
    height: f32,
}

impl Letterbox {
    fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> [f32; 4] {
        let x_min = (cx - w / 2.0 - self.pad_x) / self.scale;
        let y_min = (cy - h / 2.0 - self.pad_y) / self.scale;
        let x_max = (cx + w / 2.0 - self.pad_x) / self.scale;
        let y_max = (cy + h / 2.0 - self.pad_y) / self.scale;

        [
            x_min.clamp(0.0, self.width),
            y_min.clamp(0.0, self.height),
            x_max.clamp(0.0, self.width),
            y_max.clamp(0.0, self.height),
        ]
    }
}

/// YOLO detector exported as a frozen TensorFlow graph.
pub struct YoloModel {
    session: Session,
    graph: Graph,
    labels: Vec<String>,
}

impl YoloModel {
    pub fn load(
        model_path: impl AsRef<Path>,
        labels_path: impl AsRef<Path>,
    ) -> Result<Self, ModelError> {
        let model_path = model_path.as_ref();
        let labels_path = labels_path.as_ref();
        let started = Instant::now();

        info!("loading model graph from {}", model_path.display());
        let model_bytes = fs::read(model_path).map_err(|source| ModelError::Io {
            path: model_path.display().to_string(),
            source,
        })?;
        debug!(
            "model graph size: {:.2} MB",
            model_bytes.len() as f64 / (1024.0 * 1024.0)
        );

        let mut graph = Graph::new();
        graph.import_graph_def(&model_bytes, &ImportGraphDefOptions::new())?;
        operation(&graph, INPUT_OPERATION)?;
        operation(&graph, OUTPUT_OPERATION)?;

        let session = Session::new(&SessionOptions::new(), &graph)?;

        let labels = fs::read_to_string(labels_path).map_err(|source| ModelError::Io {
            path: labels_path.display().to_string(),
            source,
        })?;
        let labels = parse_labels(&labels);
        if labels.is_empty() {
            return Err(ModelError::EmptyClassList(
                labels_path.display().to_string(),
            ));
        }

        info!(
            classes = ?labels,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "model loaded"
        );

        Ok(YoloModel {
            session,
            graph,
            labels,
        })
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    fn preprocess(&self, image: &DynamicImage) -> (Tensor<f32>, Letterbox) {
        let (canvas, letterbox) = letterbox(image, INPUT_SIZE);

        let mut tensor = Tensor::new(&[1, INPUT_SIZE as u64, INPUT_SIZE as u64, 3]);
        for (slot, value) in tensor.iter_mut().zip(canvas.as_raw()) {
            *slot = *value as f32 / 255.0;
        }

        (tensor, letterbox)
    }
}

impl Detector for YoloModel {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectionResult>, ModelError> {
        let started = Instant::now();
        let (input_tensor, letterbox) = self.preprocess(image);

        let input_operation = operation(&self.graph, INPUT_OPERATION)?;
        let output_operation = operation(&self.graph, OUTPUT_OPERATION)?;

        let mut args = SessionRunArgs::new();
        args.add_feed(&input_operation, 0, &input_tensor);
        let output_token = args.request_fetch(&output_operation, 0);
        self.session.run(&mut args)?;
        let output_tensor: Tensor<f32> = args.fetch(output_token)?;

        let boxes = decode_output(
            &output_tensor,
            output_tensor.dims(),
            self.labels.len(),
            &letterbox,
        )?;
        debug!(
            boxes = boxes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "inference finished"
        );

        Ok(vec![DetectionResult { boxes }])
    }

    fn class_name(&self, class_id: usize) -> Option<&str> {
        self.labels.get(class_id).map(String::as_str)
    }
}

fn operation(graph: &Graph, name: &'static str) -> Result<Operation, ModelError> {
    graph
        .operation_by_name(name)
        .map_err(Status::from)?
        .ok_or(ModelError::MissingOperation(name))
}

fn parse_labels(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}

/// Resizes `image` to fit a `size`x`size` square without distortion and
/// centers it on a grey canvas.
fn letterbox(image: &DynamicImage, size: u32) -> (RgbImage, Letterbox) {
    let (width, height) = image.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_width = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_height = ((height as f32 * scale).round() as u32).clamp(1, size);

    let resized =
        image::imageops::resize(&image.to_rgb8(), new_width, new_height, FilterType::Triangle);

    let mut canvas: RgbImage =
        ImageBuffer::from_pixel(size, size, Rgb([LETTERBOX_FILL; 3]));
    let pad_x = (size - new_width) / 2;
    let pad_y = (size - new_height) / 2;
    image::imageops::overlay(&mut canvas, &resized, pad_x as i64, pad_y as i64);

    (
        canvas,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
            width: width as f32,
            height: height as f32,
        },
    )
}

/// Turns a raw `[1, 4 + classes, anchors]` output into suppressed boxes,
/// highest confidence first.
fn decode_output(
    output: &[f32],
    dims: &[u64],
    num_classes: usize,
    letterbox: &Letterbox,
) -> Result<Vec<DetectionBox>, ModelError> {
    let rows = 4 + num_classes;
    let shape_error = || ModelError::OutputShape {
        dims: dims.to_vec(),
        rows,
    };

    let anchors = match dims {
        [1, r, anchors] if *r as usize == rows => *anchors as usize,
        _ => return Err(shape_error()),
    };
    if output.len() != rows * anchors {
        return Err(shape_error());
    }

    let at = |row: usize, anchor: usize| output[row * anchors + anchor];

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0usize;
        let mut best_score = f32::MIN;
        for class_id in 0..num_classes {
            let score = at(4 + class_id, anchor);
            if score > best_score {
                best_score = score;
                best_class = class_id;
            }
        }

        if best_score < CANDIDATE_FLOOR {
            continue;
        }

        candidates.push(DetectionBox {
            class_id: best_class,
            confidence: best_score,
            bbox: letterbox.unmap(at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor)),
        });
    }

    Ok(non_max_suppression(candidates, NMS_IOU_THRESHOLD, MAX_DETECTIONS))
}

/// Class-wise non-maximum suppression.
fn non_max_suppression(
    mut boxes: Vec<DetectionBox>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<DetectionBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<DetectionBox> = Vec::new();
    for candidate in boxes {
        if kept.len() == max_detections {
            break;
        }
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == candidate.class_id && k.iou(&candidate) > iou_threshold);
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}
