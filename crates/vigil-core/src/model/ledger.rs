//! Registro del ProcessingLedger: último digest de entrada por entidad.

use crate::model::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Un registro con hash H para (stage, entidad) significa "la última vez que
/// este stage consideró esta entidad, su digest de entrada era H". La
/// decisión de skip compara sólo (stage, entidad, hash); `run_id` se guarda
/// como procedencia y no participa de la comparación.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingRecord {
    pub stage: StageId,
    pub entity_id: String,
    pub input_hash: String,
    pub run_id: String,
    pub processed_at: DateTime<Utc>,
}
