//! Stage 30 (3a): Policy Triage.
//!
//! Primer sub-stage de la rama de profundización: reduce el corpus escaneado
//! a una shortlist de políticas de alta convergencia para los sub-stages de
//! research y assessment (31/32, colaboradores externos). Sin llamadas de
//! razonamiento; el resultado queda en la metadata del stage log.

use crate::stages::storage_err;
use log::info;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use vigil_core::{PipelineError, StageContext, StageId, StageLog, StageLogic, STAGE_TRIAGE};
use vigil_domain::AnalysisStore;

pub struct TriageStage {
    analysis: Arc<dyn AnalysisStore>,
}

impl TriageStage {
    pub fn new(analysis: Arc<dyn AnalysisStore>) -> Self {
        Self { analysis }
    }
}

impl StageLogic for TriageStage {
    fn stage(&self) -> StageId {
        STAGE_TRIAGE
    }

    fn name(&self) -> &str {
        "policy triage"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        let scores = self.analysis.policy_scores(ctx.run_id).map_err(storage_err)?;

        // BTreeMap para shortlist determinista ante empates de score.
        let mut present_counts: BTreeMap<String, u32> = BTreeMap::new();
        for score in &scores {
            if score.present {
                *present_counts.entry(score.policy_id.clone()).or_insert(0) += 1;
            }
        }

        let threshold = ctx.config.convergence_threshold;
        let mut shortlist: Vec<(String, u32)> = present_counts.into_iter()
                                                              .filter(|(_, count)| *count >= threshold)
                                                              .collect();
        shortlist.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        info!("triage shortlisted {} policies at threshold {}", shortlist.len(), threshold);
        let shortlisted: Vec<&str> = shortlist.iter().map(|(id, _)| id.as_str()).collect();
        ctx.store.complete_stage(ctx.run_id,
                                 STAGE_TRIAGE,
                                 Some(json!({
                                     "threshold": threshold,
                                     "shortlisted": shortlisted,
                                     "policies_scored": scores.len(),
                                 })))
    }
}
