//! Traits de almacenamiento del core.
//!
//! El core define el contrato; los backends viven afuera (in-memory acá
//! mismo para tests y demos, Postgres en el crate de persistencia con
//! paridad 1:1 de semántica). Todos los métodos toman `&self`: los backends
//! resuelven su propia sincronización interna.

pub mod memory;

use crate::errors::PipelineError;
use crate::model::{StageAttempt, StageId, StageStatus};
use serde_json::Value;
use std::collections::HashMap;

/// Registro de runs del pipeline.
pub trait RunRegistry: Send + Sync {
    /// Inserta un run nuevo. `DuplicateRun` si el identificador ya existe.
    fn create_run(&self, run_id: &str, config_snapshot: &Value, notes: &str) -> Result<(), PipelineError>;

    /// Run más reciente por timestamp de creación, si existe alguno.
    fn latest_run(&self) -> Result<Option<String>, PipelineError>;
}

/// Log append-only de intentos de stage.
pub trait StageLog: Send + Sync {
    /// Inserta un registro `running` nuevo. Siempre inserta: esta capa no
    /// previene intentos concurrentes duplicados para el mismo (run, stage);
    /// dos callers que corran el mismo stage a la vez insertan dos registros
    /// `running` y "most recent wins" puede registrar el desenlace del
    /// intento equivocado. El driver secuencial evita la carrera en la
    /// práctica; cerrarla del todo requiere una clave de idempotencia.
    fn start_stage(&self, run_id: &str, stage: StageId) -> Result<(), PipelineError>;

    /// Transiciona el registro `running` más reciente a `completed`. No-op
    /// idempotente si no hay ninguno (un retry post-recovery es inocuo).
    fn complete_stage(&self, run_id: &str, stage: StageId, metadata: Option<Value>) -> Result<(), PipelineError>;

    /// Simétrico a `complete_stage`, estado destino `failed`.
    fn fail_stage(&self, run_id: &str, stage: StageId, error: &str) -> Result<(), PipelineError>;

    /// Simétrico, estado destino `awaiting_approval`.
    fn mark_awaiting_approval(&self, run_id: &str, stage: StageId) -> Result<(), PipelineError>;

    /// Transiciona el registro `awaiting_approval` más reciente a `approved`.
    /// Devuelve `false` (cero filas) si el estado actual no es
    /// `awaiting_approval`; el caller verifica la precondición por su cuenta.
    fn approve_stage(&self, run_id: &str, stage: StageId) -> Result<bool, PipelineError>;

    /// Estado del registro más reciente, `None` si nunca se intentó.
    fn current_status(&self, run_id: &str, stage: StageId) -> Result<Option<StageStatus>, PipelineError>;

    /// Historia completa de intentos del run, ordenada por secuencia.
    fn stage_history(&self, run_id: &str) -> Result<Vec<StageAttempt>, PipelineError>;

    /// Persiste el token de continuación sobre el registro más reciente del
    /// (run, stage).
    fn store_gate_token(&self, run_id: &str, stage: StageId, token: &str) -> Result<(), PipelineError>;

    /// Token almacenado más reciente para (run, stage), si alguna vez hubo.
    fn latest_gate_token(&self, run_id: &str, stage: StageId) -> Result<Option<String>, PipelineError>;
}

/// Ledger de procesamiento incremental.
pub trait ProcessingLedger: Send + Sync {
    /// Carga en bloque todos los digests conocidos de un stage; se consulta
    /// una vez por corrida de stage, no una vez por entidad.
    fn hashes_for_stage(&self, stage: StageId) -> Result<HashMap<String, String>, PipelineError>;

    /// Upsert de un registro. Llamar únicamente DESPUÉS de persistir el
    /// output nuevo de la entidad: un crash a mitad de procesamiento debe
    /// dejar el ledger apuntando a datos viejos (que se reprocesan en el
    /// retry), nunca a un hash fresco de datos que no se escribieron.
    fn record_processed(&self, stage: StageId, entity_id: &str, digest: &str, run_id: &str)
                        -> Result<(), PipelineError>;
}

/// Contrato completo de almacenamiento del pipeline.
pub trait PipelineStore: RunRegistry + StageLog + ProcessingLedger {}

impl<T: RunRegistry + StageLog + ProcessingLedger> PipelineStore for T {}

pub use memory::InMemoryPipelineStore;
