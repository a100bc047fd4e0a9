use serde::Serialize;

use crate::error::PredictError;
use crate::model::{DetectionResult, Detector};
use crate::remedy::{RemedyRecord, HEALTHY_LABEL};

/// Detections at or below this confidence are ignored.
pub const CONFIDENCE_THRESHOLD: f32 = 0.50;

#[derive(Debug, Clone, PartialEq)]
pub struct BestGuess {
    pub label: String,
    pub confidence: f32,
}

impl Default for BestGuess {
    fn default() -> Self {
        BestGuess {
            label: HEALTHY_LABEL.to_string(),
            confidence: 0.0,
        }
    }
}

impl BestGuess {
    /// Confidence as a percentage rounded to two decimals, ties to even.
    pub fn confidence_percent(&self) -> f64 {
        (f64::from(self.confidence) * 100.0 * 100.0).round_ties_even() / 100.0
    }
}

/// Scans every box and keeps the most confident one above the threshold.
///
/// Both comparisons are strict: a later box with the same confidence as the
/// current best never replaces it.
pub fn best_guess(
    results: &[DetectionResult],
    detector: &dyn Detector,
) -> Result<BestGuess, PredictError> {
    let mut best = BestGuess::default();

    for detection in results.iter().flat_map(|result| &result.boxes) {
        if detection.confidence > CONFIDENCE_THRESHOLD && detection.confidence > best.confidence {
            let label = detector.class_name(detection.class_id).ok_or_else(|| {
                PredictError::Internal(format!("unknown class index {}", detection.class_id))
            })?;
            best = BestGuess {
                label: label.to_string(),
                confidence: detection.confidence,
            };
        }
    }

    Ok(best)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResponse {
    pub disease_name: String,
    pub confidence: f64,
    pub sinhala_advice: String,
    pub english_advice: String,
    pub organic_remedy: String,
    pub chemical_remedy: String,
}

impl PredictionResponse {
    pub fn new(guess: &BestGuess, record: &RemedyRecord) -> Self {
        PredictionResponse {
            disease_name: guess.label.clone(),
            confidence: guess.confidence_percent(),
            sinhala_advice: record.sinhala_advice.to_string(),
            english_advice: record.english_advice.to_string(),
            organic_remedy: record.organic_remedy.to_string(),
            chemical_remedy: record.chemical_remedy.to_string(),
        }
    }
}
