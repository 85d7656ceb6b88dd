//! Stages del pipeline de análisis estructural.
//!
//! Numeración canónica (ver `vigil_core::model::stage`): 1 intake,
//! 2 taxonomía (gate), 3 scanning, 30 triage, 4 predicción (gate),
//! 5 detección. Los sub-stages 31/32 (deep research y assessment) son slots
//! de colaborador externo y no se registran acá.

pub mod detection;
pub mod intake;
pub mod prediction;
pub mod scanning;
pub mod taxonomy;
pub mod triage;

use crate::seed::SeedCorpus;
use std::sync::Arc;
use vigil_core::{PipelineError, StageSet};
use vigil_domain::{AnalysisStore, DomainError};

pub use detection::DetectionStage;
pub use intake::IntakeStage;
pub use prediction::PredictionStage;
pub use scanning::ScanningStage;
pub use taxonomy::TaxonomyStage;
pub use triage::TriageStage;

/// Errores del store de dominio vistos desde la lógica de stage.
pub(crate) fn storage_err(e: DomainError) -> PipelineError {
    PipelineError::Storage(e.to_string())
}

/// Registra el pipeline estándar completo sobre un store de análisis.
pub fn standard_stages(analysis: Arc<dyn AnalysisStore>, seed: SeedCorpus) -> StageSet {
    let mut set = StageSet::new();
    set.register(Box::new(IntakeStage::new(analysis.clone(), seed)));
    set.register(Box::new(TaxonomyStage::new(analysis.clone())));
    set.register(Box::new(ScanningStage::new(analysis.clone())));
    set.register(Box::new(TriageStage::new(analysis.clone())));
    set.register(Box::new(PredictionStage::new(analysis.clone())));
    set.register(Box::new(DetectionStage::new(analysis)));
    set
}
