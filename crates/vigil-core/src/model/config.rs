//! Configuración tipada del pipeline.
//!
//! Reemplaza diccionarios sin tipo threaded por todo el call-graph: campos
//! nombrados y validados, construidos una vez al inicio y pasados por
//! referencia. El snapshot serializado queda congelado en `pipeline_runs`.

use crate::constants::{DEFAULT_CONVERGENCE_THRESHOLD, DEFAULT_EXPORT_DIR, DEFAULT_HUMAN_GATES,
                       DEFAULT_MAX_CONCURRENCY};
use crate::model::StageId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Conjunto fijo y chico de stages con gate humano; nunca derivado
    /// dinámicamente.
    pub human_gates: Vec<StageId>,
    /// Tamaño del pool del dispatcher de llamadas externas.
    pub max_concurrency: usize,
    /// Cantidad mínima de cualidades presentes para considerar una política
    /// de alto riesgo en la predicción.
    pub convergence_threshold: u32,
    /// Directorio destino de los exportes de resultados.
    pub export_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { human_gates: DEFAULT_HUMAN_GATES.to_vec(),
               max_concurrency: DEFAULT_MAX_CONCURRENCY,
               convergence_threshold: DEFAULT_CONVERGENCE_THRESHOLD,
               export_dir: DEFAULT_EXPORT_DIR.to_string() }
    }
}

impl PipelineConfig {
    pub fn is_human_gate(&self, stage: StageId) -> bool {
        self.human_gates.contains(&stage)
    }

    /// Normaliza campos fuera de rango en lugar de fallar (concurrencia cero
    /// degrada a ejecución secuencial).
    pub fn normalized(mut self) -> Self {
        if self.max_concurrency == 0 {
            self.max_concurrency = 1;
        }
        self
    }

    /// Snapshot JSON congelado junto al run.
    pub fn snapshot(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
