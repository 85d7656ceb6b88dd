//! Stage 5: Detection Patterns.
//!
//! Traduce cada predicción aprobada en señales de anomalía monitoreables.
//! Fan-out de una llamada por predicción; delta por hash del contenido de la
//! predicción (una mecánica re-generada produce id nuevo, así que el digest
//! por id cubre también el caso de re-predicción).

use crate::stages::storage_err;
use log::{info, warn};
use serde_json::{json, Value};
use std::sync::Arc;
use vigil_core::hashing::short_hash;
use vigil_core::{DeltaIndex, DispatchJob, ParallelDispatcher, PipelineError, ProcessingLedger, ReasonRequest,
                 StageContext, StageId, StageLog, StageLogic, STAGE_DETECTION};
use vigil_domain::{AnalysisStore, DetectionPattern, PatternPriority, Prediction};

const SYSTEM_PROMPT: &str = "You design detection patterns for predicted exploitation schemes. \
Each pattern must name a concrete data source and a measurable anomaly signal, with an explicit \
baseline and false-positive risk. Prefer signals observable early in the scheme lifecycle.";

pub struct DetectionStage {
    analysis: Arc<dyn AnalysisStore>,
}

struct DetectContext {
    prediction_id: String,
    digest: String,
}

impl DetectionStage {
    pub fn new(analysis: Arc<dyn AnalysisStore>) -> Self {
        Self { analysis }
    }
}

fn detection_prompt(prediction: &Prediction) -> String {
    format!(
        "Design detection patterns for this predicted exploitation scheme.\n\n\
         Mechanics: {}\nEnabling qualities: {}\nActor profile: {}\n\
         Return JSON: {{\"patterns\": [{{\"data_source\": \"...\", \"anomaly_signal\": \"...\", \
         \"baseline\": \"...\", \"false_positive_risk\": \"...\", \"detection_latency\": \"...\", \
         \"priority\": \"critical|high|medium|low\"}}]}}",
        prediction.mechanics,
        prediction.enabling_qualities.join(", "),
        prediction.actor_profile.as_deref().unwrap_or("unspecified")
    )
}

pub(crate) fn parse_patterns(value: &Value) -> Vec<Value> {
    value.get("patterns")
         .and_then(Value::as_array)
         .cloned()
         .or_else(|| value.as_array().cloned())
         .unwrap_or_default()
}

impl StageLogic for DetectionStage {
    fn stage(&self) -> StageId {
        STAGE_DETECTION
    }

    fn name(&self) -> &str {
        "detection patterns"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        let predictions = self.analysis.predictions(ctx.run_id).map_err(storage_err)?;
        let index = DeltaIndex::load(ctx.store, STAGE_DETECTION)?;

        let mut jobs = Vec::new();
        let mut skipped = 0usize;
        for prediction in &predictions {
            let digest = short_hash(&[&prediction.prediction_id, &prediction.mechanics]);
            if index.is_unchanged(&prediction.prediction_id, &digest) {
                skipped += 1;
                continue;
            }
            let request = ReasonRequest::new(detection_prompt(prediction)).with_system(SYSTEM_PROMPT);
            jobs.push(DispatchJob::new(prediction.prediction_id.clone(),
                                       request,
                                       DetectContext { prediction_id: prediction.prediction_id.clone(),
                                                       digest }));
        }
        info!("detection for {} predictions ({} unchanged, skipped)", jobs.len(), skipped);

        if jobs.is_empty() {
            return ctx.store.complete_stage(ctx.run_id,
                                            STAGE_DETECTION,
                                            Some(json!({ "patterns_generated": 0, "skipped": skipped })));
        }

        let job_count = jobs.len();
        let dispatcher = ParallelDispatcher::new(ctx.config.max_concurrency);
        let outcome =
            dispatcher.run(jobs,
                           |request: &ReasonRequest| ctx.client.invoke_json(request),
                           |response, detect: DetectContext| {
                               let items = parse_patterns(&response);
                               let mut stored = 0usize;
                               for (i, item) in items.iter().enumerate() {
                                   let pattern =
                                       DetectionPattern::new(&detect.prediction_id,
                                                             i,
                                                             item.get("data_source")
                                                                 .and_then(Value::as_str)
                                                                 .unwrap_or_default(),
                                                             item.get("anomaly_signal")
                                                                 .and_then(Value::as_str)
                                                                 .unwrap_or_default());
                                   let mut pattern = match pattern {
                                       Ok(p) => p,
                                       Err(e) => {
                                           warn!("discarding malformed pattern: {e}");
                                           continue;
                                       }
                                   };
                                   pattern.baseline =
                                       item.get("baseline").and_then(Value::as_str).map(str::to_string);
                                   pattern.false_positive_risk = item.get("false_positive_risk")
                                                                     .and_then(Value::as_str)
                                                                     .map(str::to_string);
                                   pattern.detection_latency = item.get("detection_latency")
                                                                   .and_then(Value::as_str)
                                                                   .map(str::to_string);
                                   if let Some(priority) = item.get("priority")
                                                               .and_then(Value::as_str)
                                                               .and_then(PatternPriority::parse)
                                   {
                                       pattern.priority = priority;
                                   }
                                   match self.analysis.upsert_detection_pattern(ctx.run_id, &pattern) {
                                       Ok(()) => stored += 1,
                                       Err(e) => {
                                           warn!("pattern persist failed for {}: {e}", detect.prediction_id);
                                           return 0;
                                       }
                                   }
                               }
                               if stored > 0 {
                                   if let Err(e) = ctx.store.record_processed(STAGE_DETECTION,
                                                                              &detect.prediction_id,
                                                                              &detect.digest,
                                                                              ctx.run_id)
                                   {
                                       warn!("ledger record failed for {}: {e}", detect.prediction_id);
                                   }
                               }
                               stored
                           })?;

        if outcome.total == 0 && outcome.failed.len() == job_count {
            return ctx.store.fail_stage(ctx.run_id,
                                        STAGE_DETECTION,
                                        &format!("all {job_count} detection jobs failed"));
        }

        ctx.store.complete_stage(ctx.run_id,
                                 STAGE_DETECTION,
                                 Some(json!({
                                     "patterns_generated": outcome.total,
                                     "skipped": skipped,
                                     "failed_predictions": outcome.failed,
                                 })))
    }
}
