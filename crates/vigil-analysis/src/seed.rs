//! Corpus semilla: taxonomía curada y políticas objetivo de escaneo.
//!
//! Todo lo demás (scores, predicciones, patrones) lo producen los stages.

use crate::stages::storage_err;
use serde::{Deserialize, Serialize};
use vigil_core::PipelineError;
use vigil_domain::{AnalysisStore, Policy, Quality};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SeedCorpus {
    #[serde(default)]
    pub qualities: Vec<Quality>,
    #[serde(default)]
    pub policies: Vec<Policy>,
}

impl SeedCorpus {
    pub fn from_json(raw: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(raw).map_err(|e| PipelineError::Internal(format!("seed corpus parse: {e}")))
    }

    /// Vuelca el corpus al store; devuelve (cualidades, políticas) cargadas.
    pub fn load(&self, analysis: &dyn AnalysisStore, run_id: &str) -> Result<(usize, usize), PipelineError> {
        for quality in &self.qualities {
            analysis.upsert_quality(run_id, quality).map_err(storage_err)?;
        }
        for policy in &self.policies {
            analysis.upsert_policy(run_id, policy).map_err(storage_err)?;
        }
        Ok((self.qualities.len(), self.policies.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_domain::InMemoryAnalysisStore;

    #[test]
    fn seed_json_roundtrip_and_load() {
        let raw = r#"{
            "qualities": [
                {"quality_id": "Q1", "name": "Self-reported eligibility",
                 "definition": "Eligibility rests on unverified self-attestation",
                 "recognition_test": "Can a claimant assert the qualifying fact unchecked?",
                 "exploitation_logic": "Attestation without verification invites fabrication",
                 "canonical_examples": [], "review_status": "approved"}
            ],
            "policies": [
                {"policy_id": "POL-1", "name": "Telehealth billing expansion"}
            ]
        }"#;
        let corpus = SeedCorpus::from_json(raw).expect("parse");
        let store = InMemoryAnalysisStore::new();
        let (qualities, policies) = corpus.load(&store, "run_1").expect("load");
        assert_eq!((qualities, policies), (1, 1));
        assert_eq!(store.approved_taxonomy().unwrap().len(), 1);
        assert_eq!(store.policies().unwrap().len(), 1);
    }

    #[test]
    fn malformed_seed_is_an_explicit_error() {
        assert!(SeedCorpus::from_json("{not json").is_err());
    }
}
