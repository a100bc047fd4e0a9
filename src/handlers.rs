use std::sync::Arc;

use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, info, Level};

use crate::error::PredictError;
use crate::model::Detector;
use crate::prediction::{best_guess, BestGuess, PredictionResponse};
use crate::remedy::RemedyTable;

const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub detector: Arc<dyn Detector>,
    pub remedies: Arc<RemedyTable>,
}

impl AppState {
    pub fn new(detector: Arc<dyn Detector>, remedies: RemedyTable) -> Self {
        AppState {
            detector,
            remedies: Arc::new(remedies),
        }
    }
}

/// Builds the service. `body_limit_bytes` of `None` accepts uploads of any size.
pub fn router(state: AppState, body_limit_bytes: Option<usize>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let body_limit = match body_limit_bytes {
        Some(limit) => DefaultBodyLimit::max(limit),
        None => DefaultBodyLimit::disable(),
    };

    Router::new()
        .route("/predict", post(predict_handler))
        .route("/health", get(health_check))
        .layer(body_limit)
        .layer(trace_layer)
        .layer(cors)
        .with_state(state)
}

async fn predict_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, PredictError> {
    // a body that is not multipart carries no file either
    let multipart = multipart.map_err(|rejection| {
        debug!("rejected upload: {}", rejection);
        PredictError::MissingFile
    })?;
    let image_data = read_file_field(multipart)
        .await?
        .ok_or(PredictError::MissingFile)?;
    debug!("received {} bytes", image_data.len());

    let detector = Arc::clone(&state.detector);
    let guess = tokio::task::spawn_blocking(move || run_detection(detector.as_ref(), &image_data))
        .await
        .map_err(|err| PredictError::Internal(err.to_string()))??;

    info!(
        disease = %guess.label,
        confidence = guess.confidence,
        "prediction complete"
    );

    let record = state.remedies.lookup(&guess.label);
    Ok(Json(PredictionResponse::new(&guess, record)))
}

/// Reads the `file` field. A body that cannot be parsed, including one cut
/// short by the body limit, counts as carrying no file.
async fn read_file_field(mut multipart: Multipart) -> Result<Option<Vec<u8>>, PredictError> {
    let upload_error = |err: MultipartError| {
        debug!("unreadable upload: {}", err);
        PredictError::MissingFile
    };

    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() == Some(FILE_FIELD) {
            let bytes = field.bytes().await.map_err(upload_error)?;
            return Ok(Some(bytes.to_vec()));
        }
    }

    Ok(None)
}

fn run_detection(detector: &dyn Detector, image_data: &[u8]) -> Result<BestGuess, PredictError> {
    let image = image::load_from_memory(image_data)?;
    let results = detector.detect(&image)?;
    debug!(
        result_sets = results.len(),
        boxes = results.iter().map(|r| r.boxes.len()).sum::<usize>(),
        "detector finished"
    );

    best_guess(&results, detector)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({ "status": "OK" }))
}
