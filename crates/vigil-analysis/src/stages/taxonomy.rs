//! Stage 2: Taxonomy Extraction — GATE HUMANO.
//!
//! Una llamada de razonamiento destila cualidades estructurales candidatas a
//! partir del corpus de políticas. Las candidatas entran como `draft`; el
//! stage termina en `awaiting_approval` y nada downstream corre hasta que un
//! revisor apruebe (las cualidades aprobadas son el corpus upstream de todos
//! los digests de delta posteriores).

use crate::stages::storage_err;
use log::{info, warn};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use vigil_core::{PipelineError, ReasonRequest, StageContext, StageId, StageLog, StageLogic, STAGE_TAXONOMY};
use vigil_domain::{AnalysisStore, Policy, Quality};

const SYSTEM_PROMPT: &str = "You are a structural analyst distilling vulnerability qualities from \
policy corpora. A quality is a recognizable structural property that enables exploitation, stated \
abstractly enough to transfer across policies. Never invent qualities the corpus does not support.";

pub struct TaxonomyStage {
    analysis: Arc<dyn AnalysisStore>,
}

impl TaxonomyStage {
    pub fn new(analysis: Arc<dyn AnalysisStore>) -> Self {
        Self { analysis }
    }
}

fn extraction_prompt(policies: &[Policy]) -> String {
    let mut listing = String::new();
    for p in policies {
        listing.push_str(&format!("- {} ({}): {}\n", p.name, p.policy_id, p.scan_text()));
    }
    format!(
        "Analyze this policy corpus and distill the structural vulnerability qualities it exhibits.\n\n\
         {listing}\n\
         Return JSON: {{\"qualities\": [{{\"quality_id\": \"...\", \"name\": \"...\", \
         \"definition\": \"...\", \"recognition_test\": \"...\", \"exploitation_logic\": \"...\"}}]}}"
    )
}

/// Id derivado del nombre cuando la respuesta no trae uno.
fn derived_quality_id(name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    format!("Q-{}", &hex[..8])
}

/// Interpreta la respuesta con tolerancia de forma: array directo o bajo la
/// clave "qualities". Items inválidos se descartan con warning.
pub(crate) fn parse_qualities(value: &Value) -> Vec<Quality> {
    let items = value.get("qualities")
                     .and_then(Value::as_array)
                     .or_else(|| value.as_array())
                     .cloned()
                     .unwrap_or_default();

    let mut qualities = Vec::with_capacity(items.len());
    for item in items {
        let name = item.get("name").and_then(Value::as_str).unwrap_or_default();
        let quality_id = item.get("quality_id")
                             .and_then(Value::as_str)
                             .map(str::to_string)
                             .unwrap_or_else(|| derived_quality_id(name));
        let quality = Quality::new(quality_id,
                                   name,
                                   item.get("definition").and_then(Value::as_str).unwrap_or_default(),
                                   item.get("recognition_test").and_then(Value::as_str).unwrap_or_default(),
                                   item.get("exploitation_logic").and_then(Value::as_str).unwrap_or_default());
        match quality {
            Ok(q) => qualities.push(q),
            Err(e) => warn!("discarding malformed quality from response: {e}"),
        }
    }
    qualities
}

impl StageLogic for TaxonomyStage {
    fn stage(&self) -> StageId {
        STAGE_TAXONOMY
    }

    fn name(&self) -> &str {
        "taxonomy extraction"
    }

    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError> {
        let policies = self.analysis.policies().map_err(storage_err)?;
        if policies.is_empty() {
            return Err(PipelineError::Internal("taxonomy extraction needs a non-empty policy corpus".into()));
        }

        let request = ReasonRequest::new(extraction_prompt(&policies)).with_system(SYSTEM_PROMPT)
                                                                      .with_temperature(0.3);
        let response = ctx.client.invoke_json(&request)?;
        let qualities = parse_qualities(&response);
        if qualities.is_empty() {
            return Err(PipelineError::Internal("reasoning response contained no usable qualities".into()));
        }

        for quality in &qualities {
            self.analysis.upsert_quality(ctx.run_id, quality).map_err(storage_err)?;
        }
        info!("taxonomy extraction stored {} draft qualities", qualities.len());

        let metadata = json!({ "qualities_extracted": qualities.len() });
        if ctx.config.is_human_gate(STAGE_TAXONOMY) {
            ctx.store.mark_awaiting_approval(ctx.run_id, STAGE_TAXONOMY)
        } else {
            ctx.store.complete_stage(ctx.run_id, STAGE_TAXONOMY, Some(metadata))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_wrapped_and_bare_arrays() {
        let wrapped = json!({"qualities": [
            {"quality_id": "Q1", "name": "n", "definition": "d",
             "recognition_test": "r", "exploitation_logic": "e"}
        ]});
        assert_eq!(parse_qualities(&wrapped).len(), 1);

        let bare = json!([
            {"name": "unnamed id", "definition": "d", "recognition_test": "r", "exploitation_logic": "e"}
        ]);
        let parsed = parse_qualities(&bare);
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].quality_id.starts_with("Q-"));
    }

    #[test]
    fn parse_discards_items_without_name_or_definition() {
        let mixed = json!({"qualities": [
            {"quality_id": "Q1", "name": "", "definition": "d"},
            {"quality_id": "Q2", "name": "ok", "definition": "d",
             "recognition_test": "r", "exploitation_logic": "e"}
        ]});
        let parsed = parse_qualities(&mixed);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].quality_id, "Q2");
    }
}
