//! Contrato de almacenamiento del dominio de análisis.
//!
//! Taxonomía y políticas son corpus global (sobreviven entre runs); scores,
//! predicciones y patrones son resultados por run. Todas las escrituras son
//! upserts completos por clave: escritores concurrentes sobre la MISMA
//! entidad se resuelven por last-write-wins, aceptable porque cada upsert es
//! un reemplazo auto-consistente del registro, no una actualización parcial.

use crate::error::DomainError;
use crate::policy::{Policy, PolicyScore};
use crate::prediction::{DetectionPattern, Prediction};
use crate::taxonomy::{Quality, ReviewStatus};
use dashmap::DashMap;

pub trait AnalysisStore: Send + Sync {
    fn upsert_quality(&self, run_id: &str, quality: &Quality) -> Result<(), DomainError>;
    /// Taxonomía completa, ordenada por quality_id.
    fn taxonomy(&self) -> Result<Vec<Quality>, DomainError>;
    /// Sólo cualidades con revisión aprobada (el corpus upstream del delta).
    fn approved_taxonomy(&self) -> Result<Vec<Quality>, DomainError>;
    /// Cambia el estado de revisión; `false` si la cualidad no existe.
    fn set_quality_review(&self, quality_id: &str, status: ReviewStatus, notes: &str) -> Result<bool, DomainError>;

    fn upsert_policy(&self, run_id: &str, policy: &Policy) -> Result<(), DomainError>;
    fn policies(&self) -> Result<Vec<Policy>, DomainError>;

    fn upsert_policy_score(&self, score: &PolicyScore) -> Result<(), DomainError>;
    fn policy_scores(&self, run_id: &str) -> Result<Vec<PolicyScore>, DomainError>;

    fn upsert_prediction(&self, run_id: &str, prediction: &Prediction) -> Result<(), DomainError>;
    /// Predicciones del run ordenadas por score de convergencia descendente.
    fn predictions(&self, run_id: &str) -> Result<Vec<Prediction>, DomainError>;

    fn upsert_detection_pattern(&self, run_id: &str, pattern: &DetectionPattern) -> Result<(), DomainError>;
    fn detection_patterns(&self, run_id: &str) -> Result<Vec<DetectionPattern>, DomainError>;
}

/// Backend in-memory del dominio, paridad de semántica con el backend
/// Postgres. Para tests y el binario de validación.
#[derive(Default)]
pub struct InMemoryAnalysisStore {
    qualities: DashMap<String, Quality>,
    policies: DashMap<String, Policy>,
    // Clave (run, policy, quality): refleja el unique index del backend SQL.
    scores: DashMap<(String, String, String), PolicyScore>,
    predictions: DashMap<String, (String, Prediction)>,
    patterns: DashMap<String, (String, DetectionPattern)>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnalysisStore for InMemoryAnalysisStore {
    fn upsert_quality(&self, _run_id: &str, quality: &Quality) -> Result<(), DomainError> {
        self.qualities.insert(quality.quality_id.clone(), quality.clone());
        Ok(())
    }

    fn taxonomy(&self) -> Result<Vec<Quality>, DomainError> {
        let mut all: Vec<Quality> = self.qualities.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.quality_id.cmp(&b.quality_id));
        Ok(all)
    }

    fn approved_taxonomy(&self) -> Result<Vec<Quality>, DomainError> {
        Ok(self.taxonomy()?.into_iter().filter(|q| q.is_approved()).collect())
    }

    fn set_quality_review(&self, quality_id: &str, status: ReviewStatus, notes: &str) -> Result<bool, DomainError> {
        match self.qualities.get_mut(quality_id) {
            Some(mut entry) => {
                entry.review_status = status;
                entry.reviewer_notes = if notes.is_empty() { None } else { Some(notes.to_string()) };
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn upsert_policy(&self, _run_id: &str, policy: &Policy) -> Result<(), DomainError> {
        self.policies.insert(policy.policy_id.clone(), policy.clone());
        Ok(())
    }

    fn policies(&self) -> Result<Vec<Policy>, DomainError> {
        let mut all: Vec<Policy> = self.policies.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));
        Ok(all)
    }

    fn upsert_policy_score(&self, score: &PolicyScore) -> Result<(), DomainError> {
        let key = (score.run_id.clone(), score.policy_id.clone(), score.quality_id.clone());
        self.scores.insert(key, score.clone());
        Ok(())
    }

    fn policy_scores(&self, run_id: &str) -> Result<Vec<PolicyScore>, DomainError> {
        let mut rows: Vec<PolicyScore> = self.scores
                                             .iter()
                                             .filter(|e| e.key().0 == run_id)
                                             .map(|e| e.value().clone())
                                             .collect();
        rows.sort_by(|a, b| (&a.policy_id, &a.quality_id).cmp(&(&b.policy_id, &b.quality_id)));
        Ok(rows)
    }

    fn upsert_prediction(&self, run_id: &str, prediction: &Prediction) -> Result<(), DomainError> {
        self.predictions
            .insert(prediction.prediction_id.clone(), (run_id.to_string(), prediction.clone()));
        Ok(())
    }

    fn predictions(&self, run_id: &str) -> Result<Vec<Prediction>, DomainError> {
        let mut rows: Vec<Prediction> = self.predictions
                                            .iter()
                                            .filter(|e| e.value().0 == run_id)
                                            .map(|e| e.value().1.clone())
                                            .collect();
        rows.sort_by(|a, b| b.convergence_score
                             .cmp(&a.convergence_score)
                             .then_with(|| a.prediction_id.cmp(&b.prediction_id)));
        Ok(rows)
    }

    fn upsert_detection_pattern(&self, run_id: &str, pattern: &DetectionPattern) -> Result<(), DomainError> {
        self.patterns
            .insert(pattern.pattern_id.clone(), (run_id.to_string(), pattern.clone()));
        Ok(())
    }

    fn detection_patterns(&self, run_id: &str) -> Result<Vec<DetectionPattern>, DomainError> {
        let mut rows: Vec<DetectionPattern> = self.patterns
                                                  .iter()
                                                  .filter(|e| e.value().0 == run_id)
                                                  .map(|e| e.value().1.clone())
                                                  .collect();
        rows.sort_by(|a, b| a.pattern_id.cmp(&b.pattern_id));
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quality(id: &str, status: ReviewStatus) -> Quality {
        Quality::new(id, format!("name {id}"), "def", "test", "logic").expect("valid")
                                                                      .with_review_status(status)
    }

    #[test]
    fn approved_taxonomy_filters_by_review_status() {
        let store = InMemoryAnalysisStore::new();
        store.upsert_quality("run_1", &quality("Q1", ReviewStatus::Approved)).unwrap();
        store.upsert_quality("run_1", &quality("Q2", ReviewStatus::Draft)).unwrap();
        store.upsert_quality("run_1", &quality("Q3", ReviewStatus::Approved)).unwrap();

        let approved = store.approved_taxonomy().unwrap();
        let ids: Vec<&str> = approved.iter().map(|q| q.quality_id.as_str()).collect();
        assert_eq!(ids, vec!["Q1", "Q3"]);
    }

    #[test]
    fn score_upsert_replaces_by_composite_key() {
        let store = InMemoryAnalysisStore::new();
        let mut score = PolicyScore { run_id: "run_1".into(),
                                      policy_id: "POL-1".into(),
                                      quality_id: "Q1".into(),
                                      present: false,
                                      evidence: None };
        store.upsert_policy_score(&score).unwrap();
        score.present = true;
        score.evidence = Some("clear mechanism".into());
        store.upsert_policy_score(&score).unwrap();

        let rows = store.policy_scores("run_1").unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].present);
    }

    #[test]
    fn per_run_rows_are_isolated() {
        let store = InMemoryAnalysisStore::new();
        let p1 = Prediction::new("POL-1", 0, 4, "mechanics one", vec![]).expect("valid");
        let p2 = Prediction::new("POL-1", 0, 2, "mechanics two", vec![]).expect("valid");
        store.upsert_prediction("run_1", &p1).unwrap();
        store.upsert_prediction("run_2", &p2).unwrap();

        assert_eq!(store.predictions("run_1").unwrap().len(), 1);
        assert_eq!(store.predictions("run_2").unwrap().len(), 1);
    }

    #[test]
    fn set_quality_review_reports_missing_quality() {
        let store = InMemoryAnalysisStore::new();
        assert!(!store.set_quality_review("Q-missing", ReviewStatus::Approved, "").unwrap());
        store.upsert_quality("run_1", &quality("Q1", ReviewStatus::Draft)).unwrap();
        assert!(store.set_quality_review("Q1", ReviewStatus::Approved, "solid").unwrap());
        assert!(store.approved_taxonomy().unwrap().iter().any(|q| q.quality_id == "Q1"));
    }
}
