//! Backend in-memory del almacenamiento del pipeline.
//!
//! Referencia de semántica para el backend Postgres: mismo comportamiento
//! observable en registros, transiciones y ledger. Usado por tests y por el
//! binario de validación end-to-end.

use crate::errors::PipelineError;
use crate::model::{PipelineRun, ProcessingRecord, StageAttempt, StageId, StageStatus};
use crate::store::{ProcessingLedger, RunRegistry, StageLog};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct InMemoryPipelineStore {
    runs: Mutex<Vec<PipelineRun>>,
    log: Mutex<Vec<StageAttempt>>,
    seq: AtomicU64,
    ledger: DashMap<(StageId, String), ProcessingRecord>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Un lock envenenado no invalida el estado acá: cada escritura deja el
    // vector consistente, así que se recupera el guard y se sigue.
    fn lock<'a, T>(m: &'a Mutex<T>) -> MutexGuard<'a, T> {
        m.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Transiciona el registro `running` más reciente del (run, stage).
    fn transition<F>(&self, run_id: &str, stage: StageId, from: StageStatus, apply: F) -> Result<bool, PipelineError>
        where F: FnOnce(&mut StageAttempt)
    {
        let mut log = Self::lock(&self.log);
        let target = log.iter_mut()
                        .rev()
                        .find(|a| a.run_id == run_id && a.stage == stage && a.status == from);
        match target {
            Some(attempt) => {
                apply(attempt);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl RunRegistry for InMemoryPipelineStore {
    fn create_run(&self, run_id: &str, config_snapshot: &Value, notes: &str) -> Result<(), PipelineError> {
        let mut runs = Self::lock(&self.runs);
        if runs.iter().any(|r| r.run_id == run_id) {
            return Err(PipelineError::DuplicateRun(run_id.to_string()));
        }
        runs.push(PipelineRun::new(run_id, config_snapshot.clone(), notes));
        Ok(())
    }

    fn latest_run(&self) -> Result<Option<String>, PipelineError> {
        let runs = Self::lock(&self.runs);
        Ok(runs.iter().max_by_key(|r| r.created_at).map(|r| r.run_id.clone()))
    }
}

impl StageLog for InMemoryPipelineStore {
    fn start_stage(&self, run_id: &str, stage: StageId) -> Result<(), PipelineError> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let attempt = StageAttempt { seq,
                                     run_id: run_id.to_string(),
                                     stage,
                                     status: StageStatus::Running,
                                     started_at: Some(Utc::now()),
                                     completed_at: None,
                                     error_message: None,
                                     metadata: None,
                                     gate_token: None };
        Self::lock(&self.log).push(attempt);
        Ok(())
    }

    fn complete_stage(&self, run_id: &str, stage: StageId, metadata: Option<Value>) -> Result<(), PipelineError> {
        self.transition(run_id, stage, StageStatus::Running, |a| {
                a.status = StageStatus::Completed;
                a.completed_at = Some(Utc::now());
                a.metadata = metadata;
            })?;
        Ok(())
    }

    fn fail_stage(&self, run_id: &str, stage: StageId, error: &str) -> Result<(), PipelineError> {
        self.transition(run_id, stage, StageStatus::Running, |a| {
                a.status = StageStatus::Failed;
                a.completed_at = Some(Utc::now());
                a.error_message = Some(error.to_string());
            })?;
        Ok(())
    }

    fn mark_awaiting_approval(&self, run_id: &str, stage: StageId) -> Result<(), PipelineError> {
        self.transition(run_id, stage, StageStatus::Running, |a| {
                a.status = StageStatus::AwaitingApproval;
                a.completed_at = Some(Utc::now());
            })?;
        Ok(())
    }

    fn approve_stage(&self, run_id: &str, stage: StageId) -> Result<bool, PipelineError> {
        self.transition(run_id, stage, StageStatus::AwaitingApproval, |a| {
            a.status = StageStatus::Approved;
        })
    }

    fn current_status(&self, run_id: &str, stage: StageId) -> Result<Option<StageStatus>, PipelineError> {
        let log = Self::lock(&self.log);
        Ok(log.iter()
              .rev()
              .find(|a| a.run_id == run_id && a.stage == stage)
              .map(|a| a.status))
    }

    fn stage_history(&self, run_id: &str) -> Result<Vec<StageAttempt>, PipelineError> {
        let log = Self::lock(&self.log);
        Ok(log.iter().filter(|a| a.run_id == run_id).cloned().collect())
    }

    fn store_gate_token(&self, run_id: &str, stage: StageId, token: &str) -> Result<(), PipelineError> {
        let mut log = Self::lock(&self.log);
        if let Some(attempt) = log.iter_mut().rev().find(|a| a.run_id == run_id && a.stage == stage) {
            attempt.gate_token = Some(token.to_string());
        }
        Ok(())
    }

    fn latest_gate_token(&self, run_id: &str, stage: StageId) -> Result<Option<String>, PipelineError> {
        let log = Self::lock(&self.log);
        Ok(log.iter()
              .rev()
              .filter(|a| a.run_id == run_id && a.stage == stage)
              .find_map(|a| a.gate_token.clone()))
    }
}

impl ProcessingLedger for InMemoryPipelineStore {
    fn hashes_for_stage(&self, stage: StageId) -> Result<HashMap<String, String>, PipelineError> {
        Ok(self.ledger
               .iter()
               .filter(|entry| entry.key().0 == stage)
               .map(|entry| (entry.key().1.clone(), entry.value().input_hash.clone()))
               .collect())
    }

    fn record_processed(&self, stage: StageId, entity_id: &str, digest: &str, run_id: &str)
                        -> Result<(), PipelineError> {
        let record = ProcessingRecord { stage,
                                        entity_id: entity_id.to_string(),
                                        input_hash: digest.to_string(),
                                        run_id: run_id.to_string(),
                                        processed_at: Utc::now() };
        self.ledger.insert((stage, entity_id.to_string()), record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_run_is_rejected() {
        let store = InMemoryPipelineStore::new();
        store.create_run("run_a", &json!({}), "").expect("primer insert");
        let err = store.create_run("run_a", &json!({}), "").expect_err("segundo insert");
        assert_eq!(err, PipelineError::DuplicateRun("run_a".into()));
    }

    #[test]
    fn ledger_upsert_replaces_whole_record() {
        let store = InMemoryPipelineStore::new();
        store.record_processed(3, "pol-1", "aaa", "run_1").expect("insert");
        store.record_processed(3, "pol-1", "bbb", "run_2").expect("upsert");
        let map = store.hashes_for_stage(3).expect("bulk load");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("pol-1").map(String::as_str), Some("bbb"));
    }

    #[test]
    fn ledger_is_scoped_per_stage() {
        let store = InMemoryPipelineStore::new();
        store.record_processed(3, "pol-1", "aaa", "run_1").expect("insert s3");
        store.record_processed(4, "pol-1", "ccc", "run_1").expect("insert s4");
        assert_eq!(store.hashes_for_stage(3).unwrap().get("pol-1").map(String::as_str),
                   Some("aaa"));
        assert_eq!(store.hashes_for_stage(4).unwrap().get("pol-1").map(String::as_str),
                   Some("ccc"));
    }
}
