//! Stage 4: Exploitation Prediction — GATE HUMANO.
//!
//! Para cada política en o sobre el umbral de convergencia genera
//! predicciones concretas de explotación, restringidas a estar
//! estructuralmente implicadas por las cualidades presentes. El digest de
//! delta por política es su perfil de cualidades más el umbral: si el
//! scoring cambió el perfil (o se recalibró el umbral), la política se
//! re-predice; si no, se saltea. Termina en `awaiting_approval`: un revisor
//! valida las predicciones antes de asignar recursos de detección.

use crate::stages::storage_err;
use log::{info, warn};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use vigil_core::hashing::short_hash;
use vigil_core::{DeltaIndex, DispatchJob, ParallelDispatcher, PipelineError, ProcessingLedger, ReasonRequest,
                 StageContext, StageId, StageLog, StageLogic, STAGE_PREDICTION};
use vigil_domain::{AnalysisStore, Prediction};

const SYSTEM_PROMPT: &str = "You are a structural analyst predicting exploitation patterns. You \
NEVER speculate freely. Every prediction must be CAUSED by a specific vulnerability quality or \
combination of qualities present in the policy. If you cannot cite which structural quality enables \
a predicted behavior, do not include it. The most dangerous schemes exploit the INTERACTION between \
multiple qualities, not just individual ones.";

pub struct PredictionStage {
    analysis: Arc<dyn AnalysisStore>,
}

struct PredictContext {
    policy_id: String,
    digest: String,
    profile: Vec<String>,
}

impl PredictionStage {
    pub fn new(analysis: Arc<dyn AnalysisStore>) -> Self {
        Self { analysis }
    }
}

/// Perfil por política: cualidades presentes, ordenadas. Es el componente
/// principal del digest de delta de este stage.
fn profile_key(profile: &[String]) -> String {
    if profile.is_empty() {
        "none".to_string()
    } else {
        profile.join(":")
    }
}

fn prediction_prompt(policy_name: &str, profile: &[(String, Option<String>)]) -> String {
    let mut quality_block = String::new();
    for (quality_id, evidence) in profile {
        quality_block.push_str(&format!("- {}: {}\n",
                                        quality_id,
                                        evidence.as_deref().unwrap_or("present")));
    }
    format!(
        "Predict exploitation schemes for this policy, given its vulnerability quality profile.\n\n\
         Policy: {policy_name}\nQualities present:\n{quality_block}\n\
         Return JSON: {{\"predictions\": [{{\"mechanics\": \"...\", \"enabling_qualities\": [\"...\"], \
         \"actor_profile\": \"...\", \"lifecycle_stage\": \"...\", \"detection_difficulty\": \"...\"}}]}}"
    )
}

/// Respuesta tolerante de forma: array bajo "predictions", array directo, u
/// objeto único.
pub(crate) fn parse_predictions(value: &Value) -> Vec<Value> {
    if let Some(arr) = value.get("predictions").and_then(Value::as_array) {
        return arr.clone();
    }
    if let Some(arr) = value.as_array() {
        return arr.clone();
    }
    if value.is_object() {
        return vec![value.clone()];
    }
    Vec::new()
}

impl StageLogic for PredictionStage {
    fn stage(&self) -> StageId {
        STAGE_PREDICTION
    }

    fn name(&self) -> &str {
        "exploitation prediction"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        let scores = self.analysis.policy_scores(ctx.run_id).map_err(storage_err)?;
        let policies = self.analysis.policies().map_err(storage_err)?;

        // Perfil de cualidades presentes por política (orden estable).
        let mut profiles: BTreeMap<String, Vec<(String, Option<String>)>> = BTreeMap::new();
        for score in scores {
            if score.present {
                profiles.entry(score.policy_id.clone())
                        .or_default()
                        .push((score.quality_id, score.evidence));
            }
        }

        let threshold = ctx.config.convergence_threshold;
        let high_risk: BTreeMap<String, Vec<(String, Option<String>)>> =
            profiles.into_iter()
                    .filter(|(_, qualities)| qualities.len() as u32 >= threshold)
                    .collect();

        // Sin políticas en el umbral: éxito con cero trabajo, sin gate.
        if high_risk.is_empty() {
            info!("no policies at or above threshold {threshold}");
            return ctx.store.complete_stage(ctx.run_id,
                                            STAGE_PREDICTION,
                                            Some(json!({ "predictions_generated": 0,
                                                         "threshold": threshold })));
        }

        let index = DeltaIndex::load(ctx.store, STAGE_PREDICTION)?;
        let mut jobs = Vec::new();
        let mut skipped = 0usize;
        for (policy_id, qualities) in &high_risk {
            let profile: Vec<String> = qualities.iter().map(|(q, _)| q.clone()).collect();
            let digest = short_hash(&[policy_id, &profile_key(&profile), &threshold.to_string()]);
            if index.is_unchanged(policy_id, &digest) {
                skipped += 1;
                continue;
            }
            let policy_name = policies.iter()
                                      .find(|p| &p.policy_id == policy_id)
                                      .map(|p| p.name.clone())
                                      .unwrap_or_else(|| policy_id.clone());
            let request = ReasonRequest::new(prediction_prompt(&policy_name, qualities))
                .with_system(SYSTEM_PROMPT)
                .with_temperature(0.3);
            jobs.push(DispatchJob::new(policy_id.clone(),
                                       request,
                                       PredictContext { policy_id: policy_id.clone(),
                                                        digest,
                                                        profile }));
        }
        info!("predicting for {} high-risk policies ({} unchanged, skipped)", jobs.len(), skipped);

        if jobs.is_empty() {
            // Todo el trabajo previo sigue vigente; nada nuevo que revisar.
            return ctx.store.complete_stage(ctx.run_id,
                                            STAGE_PREDICTION,
                                            Some(json!({ "predictions_generated": 0,
                                                         "skipped": skipped,
                                                         "threshold": threshold })));
        }

        let job_count = jobs.len();
        let dispatcher = ParallelDispatcher::new(ctx.config.max_concurrency);
        let outcome =
            dispatcher.run(jobs,
                           |request: &ReasonRequest| ctx.client.invoke_json(request),
                           |response, predict: PredictContext| {
                               let items = parse_predictions(&response);
                               let mut stored = 0usize;
                               for (i, item) in items.iter().enumerate() {
                                   let mechanics =
                                       item.get("mechanics").and_then(Value::as_str).unwrap_or_default();
                                   let enabling = item.get("enabling_qualities")
                                                      .and_then(Value::as_array)
                                                      .map(|arr| {
                                                          arr.iter()
                                                             .filter_map(Value::as_str)
                                                             .map(str::to_string)
                                                             .collect::<Vec<_>>()
                                                      })
                                                      .unwrap_or_else(|| predict.profile.clone());
                                   let prediction = Prediction::new(&predict.policy_id,
                                                                    i,
                                                                    predict.profile.len() as u32,
                                                                    mechanics,
                                                                    enabling);
                                   let mut prediction = match prediction {
                                       Ok(p) => p,
                                       Err(e) => {
                                           warn!("discarding malformed prediction: {e}");
                                           continue;
                                       }
                                   };
                                   prediction.actor_profile = item.get("actor_profile")
                                                                  .and_then(Value::as_str)
                                                                  .map(str::to_string);
                                   prediction.lifecycle_stage = item.get("lifecycle_stage")
                                                                    .and_then(Value::as_str)
                                                                    .map(str::to_string);
                                   prediction.detection_difficulty = item.get("detection_difficulty")
                                                                         .and_then(Value::as_str)
                                                                         .map(str::to_string);
                                   match self.analysis.upsert_prediction(ctx.run_id, &prediction) {
                                       Ok(()) => stored += 1,
                                       Err(e) => {
                                           warn!("prediction persist failed for {}: {e}", predict.policy_id);
                                           return 0;
                                       }
                                   }
                               }
                               if stored > 0 {
                                   if let Err(e) = ctx.store.record_processed(STAGE_PREDICTION,
                                                                              &predict.policy_id,
                                                                              &predict.digest,
                                                                              ctx.run_id)
                                   {
                                       warn!("ledger record failed for {}: {e}", predict.policy_id);
                                   }
                               }
                               stored
                           })?;

        if outcome.total == 0 && outcome.failed.len() == job_count {
            return ctx.store.fail_stage(ctx.run_id,
                                        STAGE_PREDICTION,
                                        &format!("all {job_count} prediction jobs failed"));
        }

        let metadata = json!({
            "predictions_generated": outcome.total,
            "skipped": skipped,
            "failed_policies": outcome.failed,
            "threshold": threshold,
        });
        if ctx.config.is_human_gate(STAGE_PREDICTION) {
            ctx.store.mark_awaiting_approval(ctx.run_id, STAGE_PREDICTION)
        } else {
            ctx.store.complete_stage(ctx.run_id, STAGE_PREDICTION, Some(metadata))
        }
    }
}
