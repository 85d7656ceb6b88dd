//! Modelo de datos del core: runs, stage log, ledger y configuración tipada.

pub mod config;
pub mod ledger;
pub mod run;
pub mod stage;

pub use config::PipelineConfig;
pub use ledger::ProcessingRecord;
pub use run::{new_run_id, PipelineRun};
pub use stage::{stage_name, StageAttempt, StageId, StageStatus, STAGE_ASSESSMENT, STAGE_DETECTION, STAGE_INTAKE,
                STAGE_ORDER, STAGE_PREDICTION, STAGE_RESEARCH, STAGE_SCANNING, STAGE_TAXONOMY, STAGE_TRIAGE};
