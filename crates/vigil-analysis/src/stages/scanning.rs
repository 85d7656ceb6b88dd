//! Stage 3: Policy Scanning.
//!
//! Evalúa cada política del corpus contra la taxonomía aprobada, con
//! recomputación incremental: el digest de cada política combina su texto
//! estructural con el fingerprint del set aprobado, así una cualidad nueva
//! invalida a TODAS las políticas aunque su propio texto no haya cambiado.
//! El fan-out de llamadas va por el dispatcher acotado; el ledger se graba
//! recién después de persistir los scores de la política.

use crate::stages::storage_err;
use log::{info, warn};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use vigil_core::hashing::{corpus_fingerprint, short_hash};
use vigil_core::{DeltaIndex, DispatchJob, ParallelDispatcher, PipelineError, ProcessingLedger, ReasonRequest,
                 StageContext, StageId, StageLog, StageLogic, STAGE_SCANNING};
use vigil_domain::{AnalysisStore, Policy, PolicyScore, Quality};

const SYSTEM_PROMPT: &str = "You are scoring a policy against a structural vulnerability taxonomy. \
Apply each recognition test precisely. A quality is PRESENT only if the policy clearly exhibits the \
structural property described. If ambiguous, mark ABSENT and note the ambiguity in the evidence \
field. Do not over-score.";

pub struct ScanningStage {
    analysis: Arc<dyn AnalysisStore>,
}

struct ScanContext {
    policy_id: String,
    digest: String,
}

impl ScanningStage {
    pub fn new(analysis: Arc<dyn AnalysisStore>) -> Self {
        Self { analysis }
    }
}

fn scan_prompt(policy: &Policy, taxonomy: &[Quality]) -> String {
    let mut taxonomy_block = String::new();
    for q in taxonomy {
        taxonomy_block.push_str(&format!("- {} ({}): {}\n  Recognition test: {}\n",
                                         q.quality_id, q.name, q.definition, q.recognition_test));
    }
    format!(
        "Score this policy against each vulnerability quality.\n\n\
         Policy: {} ({})\n{}\n\nTaxonomy:\n{}\n\
         Return JSON: {{\"scores\": {{\"<quality_id>\": {{\"present\": true|false, \"evidence\": \"...\"}}}}}}",
        policy.name,
        policy.policy_id,
        policy.scan_text(),
        taxonomy_block
    )
}

/// Interpreta el mapa de scores de la respuesta. Acepta el mapa directo o
/// bajo "scores"; cada entrada puede ser objeto {present, evidence} o bool.
/// Ids fuera del set permitido se descartan.
pub(crate) fn parse_scores(value: &Value, allowed: &HashSet<String>) -> Vec<(String, bool, Option<String>)> {
    let map = value.get("scores")
                   .and_then(Value::as_object)
                   .or_else(|| value.as_object())
                   .cloned()
                   .unwrap_or_default();

    let mut rows = Vec::with_capacity(map.len());
    for (quality_id, entry) in map {
        if !allowed.contains(&quality_id) {
            warn!("discarding score for unknown quality '{quality_id}'");
            continue;
        }
        let (present, evidence) = match &entry {
            Value::Bool(b) => (*b, None),
            Value::Object(o) => (o.get("present").and_then(Value::as_bool).unwrap_or(false),
                                 o.get("evidence").and_then(Value::as_str).map(str::to_string)),
            _ => continue,
        };
        rows.push((quality_id, present, evidence));
    }
    rows
}

impl StageLogic for ScanningStage {
    fn stage(&self) -> StageId {
        STAGE_SCANNING
    }

    fn name(&self) -> &str {
        "policy scanning"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        let taxonomy = self.analysis.approved_taxonomy().map_err(storage_err)?;
        if taxonomy.is_empty() {
            return Err(PipelineError::Internal("no approved taxonomy qualities to scan against".into()));
        }
        let allowed: HashSet<String> = taxonomy.iter().map(|q| q.quality_id.clone()).collect();
        let taxonomy_fp = corpus_fingerprint(taxonomy.iter().map(|q| q.quality_id.as_str()));

        let policies = self.analysis.policies().map_err(storage_err)?;
        let index = DeltaIndex::load(ctx.store, STAGE_SCANNING)?;

        let mut jobs = Vec::new();
        let mut skipped = 0usize;
        for policy in &policies {
            let digest = short_hash(&[&policy.policy_id, policy.scan_text(), &taxonomy_fp]);
            if index.is_unchanged(&policy.policy_id, &digest) {
                skipped += 1;
                continue;
            }
            let request = ReasonRequest::new(scan_prompt(policy, &taxonomy)).with_system(SYSTEM_PROMPT)
                                                                            .with_max_tokens(2048);
            jobs.push(DispatchJob::new(policy.policy_id.clone(),
                                       request,
                                       ScanContext { policy_id: policy.policy_id.clone(),
                                                     digest }));
        }
        info!("scanning {} policies ({} unchanged, skipped)", jobs.len(), skipped);

        // Todas sin cambios: cero trabajo también es éxito.
        if jobs.is_empty() {
            return ctx.store.complete_stage(ctx.run_id,
                                            STAGE_SCANNING,
                                            Some(json!({ "scores_stored": 0, "skipped": skipped })));
        }

        let job_count = jobs.len();
        let dispatcher = ParallelDispatcher::new(ctx.config.max_concurrency);
        let outcome = dispatcher.run(jobs,
                                     |request: &ReasonRequest| ctx.client.invoke_json(request),
                                     |response, scan: ScanContext| {
                                         let rows = parse_scores(&response, &allowed);
                                         let mut stored = 0usize;
                                         for (quality_id, present, evidence) in rows {
                                             let score = PolicyScore { run_id: ctx.run_id.to_string(),
                                                                       policy_id: scan.policy_id.clone(),
                                                                       quality_id,
                                                                       present,
                                                                       evidence };
                                             match self.analysis.upsert_policy_score(&score) {
                                                 Ok(()) => stored += 1,
                                                 Err(e) => {
                                                     warn!("score persist failed for {}: {e}", scan.policy_id);
                                                     return 0;
                                                 }
                                             }
                                         }
                                         // Ledger recién tras persistir: un crash acá deja el
                                         // hash viejo y la política se re-escanea en el retry.
                                         if stored > 0 {
                                             if let Err(e) = ctx.store.record_processed(STAGE_SCANNING,
                                                                                        &scan.policy_id,
                                                                                        &scan.digest,
                                                                                        ctx.run_id)
                                             {
                                                 warn!("ledger record failed for {}: {e}", scan.policy_id);
                                             }
                                         }
                                         stored
                                     })?;

        if outcome.total == 0 && outcome.failed.len() == job_count {
            return ctx.store.fail_stage(ctx.run_id,
                                        STAGE_SCANNING,
                                        &format!("all {job_count} scan jobs failed"));
        }

        ctx.store.complete_stage(ctx.run_id,
                                 STAGE_SCANNING,
                                 Some(json!({
                                     "scores_stored": outcome.total,
                                     "skipped": skipped,
                                     "failed_policies": outcome.failed,
                                 })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> HashSet<String> {
        ["Q1", "Q2"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_scores_accepts_objects_and_bools() {
        let value = json!({"scores": {
            "Q1": {"present": true, "evidence": "clear"},
            "Q2": false
        }});
        let mut rows = parse_scores(&value, &allowed());
        rows.sort();
        assert_eq!(rows,
                   vec![("Q1".to_string(), true, Some("clear".to_string())),
                        ("Q2".to_string(), false, None)]);
    }

    #[test]
    fn parse_scores_drops_unknown_qualities() {
        let value = json!({"Q1": true, "Q9": true});
        let rows = parse_scores(&value, &allowed());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "Q1");
    }
}
