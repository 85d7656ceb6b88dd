//! Predicciones de explotación y patrones de detección derivados.

use crate::error::DomainError;
use crate::taxonomy::ReviewStatus;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Id corto derivado del contenido, estable entre corridas para el mismo
/// input lógico (el upsert por id hace idempotente el re-procesamiento).
fn content_id(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join(":").as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..12].to_string()
}

/// Una predicción concreta de explotación, estructuralmente implicada por las
/// cualidades presentes en la política (nunca especulación libre).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction_id: String,
    pub policy_id: String,
    /// Cantidad de cualidades presentes al momento de predecir.
    pub convergence_score: u32,
    pub mechanics: String,
    /// Cualidades que habilitan la mecánica predicha.
    pub enabling_qualities: Vec<String>,
    #[serde(default)]
    pub actor_profile: Option<String>,
    #[serde(default)]
    pub lifecycle_stage: Option<String>,
    #[serde(default)]
    pub detection_difficulty: Option<String>,
    #[serde(default = "draft_status")]
    pub review_status: ReviewStatus,
}

fn draft_status() -> ReviewStatus {
    ReviewStatus::Draft
}

impl Prediction {
    pub fn new(policy_id: impl Into<String>,
               index: usize,
               convergence_score: u32,
               mechanics: impl Into<String>,
               enabling_qualities: Vec<String>)
               -> Result<Self, DomainError> {
        let policy_id = policy_id.into();
        let mechanics = mechanics.into();
        if mechanics.trim().is_empty() {
            return Err(DomainError::ValidationError(format!(
                "prediction for policy '{policy_id}' has empty mechanics"
            )));
        }
        // El id toma un prefijo de la mecánica por legibilidad del derive;
        // truncado por chars para no partir UTF-8.
        let head: String = mechanics.chars().take(50).collect();
        let prediction_id = content_id(&[&policy_id, &index.to_string(), &head]);
        Ok(Self { prediction_id,
                  policy_id,
                  convergence_score,
                  mechanics,
                  enabling_qualities,
                  actor_profile: None,
                  lifecycle_stage: None,
                  detection_difficulty: None,
                  review_status: ReviewStatus::Draft })
    }
}

/// Prioridad operativa de un patrón de detección.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl PatternPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternPriority::Critical => "critical",
            PatternPriority::High => "high",
            PatternPriority::Medium => "medium",
            PatternPriority::Low => "low",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "critical" => Some(PatternPriority::Critical),
            "high" => Some(PatternPriority::High),
            "medium" => Some(PatternPriority::Medium),
            "low" => Some(PatternPriority::Low),
            _ => None,
        }
    }
}

impl fmt::Display for PatternPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Señal de anomalía monitoreable que delataría la mecánica predicha.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionPattern {
    pub pattern_id: String,
    pub prediction_id: String,
    pub data_source: String,
    pub anomaly_signal: String,
    #[serde(default)]
    pub baseline: Option<String>,
    #[serde(default)]
    pub false_positive_risk: Option<String>,
    #[serde(default)]
    pub detection_latency: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: PatternPriority,
    #[serde(default)]
    pub implementation_notes: Option<String>,
}

fn default_priority() -> PatternPriority {
    PatternPriority::Medium
}

impl DetectionPattern {
    pub fn new(prediction_id: impl Into<String>,
               index: usize,
               data_source: impl Into<String>,
               anomaly_signal: impl Into<String>)
               -> Result<Self, DomainError> {
        let prediction_id = prediction_id.into();
        let data_source = data_source.into();
        let anomaly_signal = anomaly_signal.into();
        if data_source.trim().is_empty() || anomaly_signal.trim().is_empty() {
            return Err(DomainError::ValidationError(format!(
                "pattern for prediction '{prediction_id}' needs data_source and anomaly_signal"
            )));
        }
        let pattern_id = content_id(&[&prediction_id, &index.to_string(), &data_source]);
        Ok(Self { pattern_id,
                  prediction_id,
                  data_source,
                  anomaly_signal,
                  baseline: None,
                  false_positive_risk: None,
                  detection_latency: None,
                  priority: PatternPriority::Medium,
                  implementation_notes: None })
    }
}
