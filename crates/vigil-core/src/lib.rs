//! vigil-core: Motor de orquestación del pipeline de análisis estructural.
//!
//! Responsabilidades del core:
//! - Máquina de estados de stages (log append-only, "most recent wins").
//! - Gates humanos de aprobación con token de continuación opaco.
//! - Recomputación incremental por digest de entrada (ProcessingLedger).
//! - Despacho concurrente acotado de llamadas externas independientes.
//! - Orquestador secuencial con mapa fijo de prerequisitos.
//!
//! El core no conoce Postgres ni el dominio de análisis: expone traits de
//! almacenamiento (`RunRegistry`, `StageLog`, `ProcessingLedger`) con un
//! backend in-memory de paridad, y el contrato `StageLogic` que implementan
//! los stages en crates externos.

pub mod client;
pub mod constants;
pub mod delta;
pub mod dispatch;
pub mod errors;
pub mod gate;
pub mod hashing;
pub mod model;
pub mod orchestrator;
pub mod stage;
pub mod store;

pub use client::{ReasonRequest, ReasoningClient, ScriptedClient};
pub use delta::DeltaIndex;
pub use dispatch::{BatchOutcome, DispatchJob, ParallelDispatcher};
pub use errors::PipelineError;
pub use gate::{GateCoordinator, GateDecision};
pub use model::{new_run_id, stage_name, PipelineConfig, PipelineRun, ProcessingRecord, StageAttempt, StageId,
                StageStatus, STAGE_ASSESSMENT, STAGE_DETECTION, STAGE_INTAKE, STAGE_ORDER, STAGE_PREDICTION,
                STAGE_RESEARCH, STAGE_SCANNING, STAGE_TAXONOMY, STAGE_TRIAGE};
pub use orchestrator::{pipeline_status, prerequisite_for, StageOrchestrator, StageOverview, StageReport};
pub use stage::{StageContext, StageLogic, StageSet};
pub use store::{InMemoryPipelineStore, PipelineStore, ProcessingLedger, RunRegistry, StageLog};
