//! Stage 1: Corpus Intake.
//!
//! Carga la taxonomía curada y las políticas objetivo al store de análisis.
//! Sin llamadas de razonamiento; la adquisición de documentos crudos es
//! territorio del subsistema de retrieval (colaborador externo).

use crate::seed::SeedCorpus;
use crate::stages::storage_err;
use log::info;
use serde_json::json;
use std::sync::Arc;
use vigil_core::{PipelineError, StageContext, StageId, StageLog, StageLogic, STAGE_INTAKE};
use vigil_domain::AnalysisStore;

pub struct IntakeStage {
    analysis: Arc<dyn AnalysisStore>,
    corpus: SeedCorpus,
}

impl IntakeStage {
    pub fn new(analysis: Arc<dyn AnalysisStore>, corpus: SeedCorpus) -> Self {
        Self { analysis, corpus }
    }
}

impl StageLogic for IntakeStage {
    fn stage(&self) -> StageId {
        STAGE_INTAKE
    }

    fn name(&self) -> &str {
        "corpus intake"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        let (qualities, policies) = self.corpus.load(self.analysis.as_ref(), ctx.run_id)?;
        info!("intake loaded {qualities} qualities and {policies} policies");

        // Corpus vacío también es éxito: el run queda listo para ingestas
        // posteriores vía CLI.
        let total_policies = self.analysis.policies().map_err(storage_err)?.len();
        ctx.store.complete_stage(ctx.run_id,
                                 STAGE_INTAKE,
                                 Some(json!({
                                     "qualities_loaded": qualities,
                                     "policies_loaded": policies,
                                     "policies_total": total_policies,
                                 })))
    }
}
