//! Errores del core de orquestación.
//!
//! Política de propagación: errores locales a una unidad de trabajo (un job
//! del dispatcher) se contienen en esa unidad y NO aparecen acá; errores que
//! amenazan consistencia global (prerequisitos, fallo de stage, storage)
//! se propagan y detienen la operación en curso.

use crate::model::StageId;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum PipelineError {
    /// Colisión de identificador de run; se informa al caller, no se reintenta.
    #[error("run '{0}' already exists")] DuplicateRun(String),
    /// El stage bloqueante se nombra explícitamente junto a su estado real.
    #[error("stage {stage} is '{status}'; it must be 'completed' or 'approved' before stage {requested} can run")]
    PrerequisiteNotSatisfied {
        requested: StageId,
        stage: StageId,
        status: String,
    },
    /// Error no capturado dentro de la lógica de un stage; ya quedó registrado
    /// como `failed` en el stage log antes de re-propagarse.
    #[error("stage {stage} logic failed: {message}")]
    StageLogicFailure { stage: StageId, message: String },
    #[error("no stage logic registered for stage {0}")] UnknownStage(StageId),
    #[error("storage error: {0}")] Storage(String),
    #[error("reasoning client error: {0}")] Client(String),
    #[error("internal: {0}")] Internal(String),
}
