//! Runs del pipeline: contexto de ejecución nombrado con snapshot de config.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Un run es un contexto de ejecución inmutable: se crea una sola vez, nunca
/// se muta y sólo desaparece ante un reset administrativo explícito.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    /// Snapshot serializado de la configuración vigente al crear el run.
    pub config_snapshot: Value,
    pub notes: String,
}

impl PipelineRun {
    pub fn new(run_id: impl Into<String>, config_snapshot: Value, notes: impl Into<String>) -> Self {
        Self { run_id: run_id.into(),
               created_at: Utc::now(),
               config_snapshot,
               notes: notes.into() }
    }
}

/// Identificador derivado del tiempo, único por construcción para callers que
/// no suministran uno propio (p. ej. `run_20260806_142530`).
pub fn new_run_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Utc::now().format("%Y%m%d_%H%M%S"))
}
