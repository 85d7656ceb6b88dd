//! Estados y registros del stage log.
//!
//! El stage log es append-only: cada intento inserta un registro `running`
//! nuevo y el estado "actual" de un (run, stage) es el del registro más
//! reciente por secuencia. Nunca se muta un registro terminal previo, así un
//! intento reintentado o crasheado no corrompe la historia y el rastro de
//! auditoría completo queda disponible para diagnóstico.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Identificador de un stage (entero pequeño). Los sub-stages de análisis
/// profundo usan la convención decenas: 30 = 3a, 31 = 3b, 32 = 3c.
pub type StageId = i32;

pub const STAGE_INTAKE: StageId = 1;
pub const STAGE_TAXONOMY: StageId = 2;
pub const STAGE_SCANNING: StageId = 3;
pub const STAGE_TRIAGE: StageId = 30;
pub const STAGE_RESEARCH: StageId = 31;
pub const STAGE_ASSESSMENT: StageId = 32;
pub const STAGE_PREDICTION: StageId = 4;
pub const STAGE_DETECTION: StageId = 5;

/// Orden canónico de ejecución del pipeline completo. Los sub-stages 3a..3c
/// son una rama opcional de profundización entre scanning y predicción.
pub const STAGE_ORDER: [StageId; 8] = [STAGE_INTAKE,
                                       STAGE_TAXONOMY,
                                       STAGE_SCANNING,
                                       STAGE_TRIAGE,
                                       STAGE_RESEARCH,
                                       STAGE_ASSESSMENT,
                                       STAGE_PREDICTION,
                                       STAGE_DETECTION];

/// Nombre legible de cada stage para status y reportes.
pub fn stage_name(stage: StageId) -> &'static str {
    match stage {
        STAGE_INTAKE => "Corpus Intake",
        STAGE_TAXONOMY => "Taxonomy Extraction",
        STAGE_SCANNING => "Policy Scanning",
        STAGE_TRIAGE => "Policy Triage (3a)",
        STAGE_RESEARCH => "Deep Research (3b)",
        STAGE_ASSESSMENT => "Risk Assessment (3c)",
        STAGE_PREDICTION => "Exploitation Prediction",
        STAGE_DETECTION => "Detection Patterns",
        _ => "Unknown Stage",
    }
}

/// Estado de un intento de stage.
///
/// Transiciones válidas (siempre sobre el registro `running` más reciente):
/// - `Running` -> `Completed`
/// - `Running` -> `Failed`
/// - `Running` -> `AwaitingApproval`
/// - `AwaitingApproval` -> `Approved` (única transición disparada por un
///   actor externo — el revisor humano — y no por el propio stage).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Running,
    Completed,
    Failed,
    AwaitingApproval,
    Approved,
}

impl StageStatus {
    /// Representación estable en minúsculas, usada en la columna TEXT del log.
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Running => "running",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
            StageStatus::AwaitingApproval => "awaiting_approval",
            StageStatus::Approved => "approved",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "running" => Some(StageStatus::Running),
            "completed" => Some(StageStatus::Completed),
            "failed" => Some(StageStatus::Failed),
            "awaiting_approval" => Some(StageStatus::AwaitingApproval),
            "approved" => Some(StageStatus::Approved),
            _ => None,
        }
    }

    /// Un prerequisito se considera satisfecho sólo en estos dos estados.
    pub fn satisfies_prerequisite(&self) -> bool {
        matches!(self, StageStatus::Completed | StageStatus::Approved)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registro de un intento de ejecución de stage.
///
/// `seq` lo asigna la capa de almacenamiento (nunca el caller) para que el
/// orden entre procesos no dependa de relojes de pared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageAttempt {
    pub seq: u64,
    pub run_id: String,
    pub stage: StageId,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
    /// Token de continuación opaco; sólo presente mientras el intento pasó
    /// por `awaiting_approval` en modo coordinador externo.
    pub gate_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip_is_stable() {
        for s in [StageStatus::Running,
                  StageStatus::Completed,
                  StageStatus::Failed,
                  StageStatus::AwaitingApproval,
                  StageStatus::Approved]
        {
            assert_eq!(StageStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(StageStatus::parse("pending"), None);
    }

    #[test]
    fn only_completed_and_approved_satisfy_prerequisites() {
        assert!(StageStatus::Completed.satisfies_prerequisite());
        assert!(StageStatus::Approved.satisfies_prerequisite());
        assert!(!StageStatus::Running.satisfies_prerequisite());
        assert!(!StageStatus::AwaitingApproval.satisfies_prerequisite());
        assert!(!StageStatus::Failed.satisfies_prerequisite());
    }
}
