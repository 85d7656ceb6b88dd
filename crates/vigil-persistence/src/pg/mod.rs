//! Implementaciones Postgres (Diesel) de los traits del core y del dominio.
//!
//! Objetivo del módulo:
//! - Capa durable con paridad 1:1 respecto a los backends in-memory: mismas
//!   transiciones observables del stage log, mismo comportamiento del ledger.
//! - Operaciones multi-statement que deben ser atómicas (transicionar "la
//!   fila running más reciente") van en transacciones explícitas; el resto de
//!   las escrituras confía en la atomicidad por statement del motor.
//! - Errores transitorios (pool, serialización) se reintentan con backoff
//!   corto; las violaciones semánticas se propagan sin reintento.
//! - Escritores concurrentes sobre entidades DISTINTAS nunca chocan por el
//!   keying de las tablas; sobre la MISMA entidad resuelve el upsert
//!   last-write-wins (reemplazo completo del registro).

use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, PooledConnection};
use log::{debug, warn};
use serde_json::Value;
use std::collections::HashMap;

use vigil_core::{PipelineError, ProcessingLedger, RunRegistry, StageAttempt, StageId, StageLog, StageStatus};
use vigil_domain::{AnalysisStore, DetectionPattern, DomainError, PatternPriority, Policy, PolicyScore,
                   Prediction, Quality, ReviewStatus};

use crate::config::DbConfig;
use crate::error::PersistenceError;
use crate::migrations::run_migrations;
use crate::schema::{detection_patterns, pipeline_runs, policies, policy_scores, predictions, stage_log,
                    stage_processing_log, taxonomy};

/// Alias del pool r2d2 de conexiones Postgres. Construirlo corre el migrador
/// una sola vez sobre el primer checkout.
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones: inyecta un pool real en producción o
/// un doble en tests unitarios sin acoplar a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, PersistenceError>;
}

/// Implementación de provider respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Determina si conviene reintentar con backoff.
fn is_retryable(e: &PersistenceError) -> bool {
    match e {
        PersistenceError::SerializationConflict => true,
        PersistenceError::TransientIo(_) => true,
        PersistenceError::Unknown(msg) => {
            let m = msg.to_lowercase();
            m.contains("deadlock detected")
            || m.contains("could not serialize access due to concurrent update")
            || m.contains("connection closed")
            || m.contains("connection refused")
            || m.contains("timeout")
        }
        _ => false,
    }
}

/// Retry con backoff corto (hasta 3 intentos). No altera semántica: sólo
/// repite la unidad de trabajo provista.
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if is_retryable(&e) && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {:?} -> sleeping {}ms", attempts + 1, e, delay_ms);
                std::thread::sleep(std::time::Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

// ── Row structs ─────────────────────────────────────────────────────

#[derive(Insertable, Debug)]
#[diesel(table_name = pipeline_runs)]
struct NewRunRow<'a> {
    run_id: &'a str,
    created_at: DateTime<Utc>,
    config_snapshot: &'a Value,
    notes: &'a str,
}

#[derive(Queryable, Debug)]
struct StageLogRow {
    id: i64,
    run_id: String,
    stage: i32,
    status: String,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    metadata: Option<Value>,
    gate_token: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = stage_log)]
struct NewStageLogRow<'a> {
    run_id: &'a str,
    stage: i32,
    status: &'a str,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = stage_processing_log)]
struct NewProcessingRow<'a> {
    stage: i32,
    entity_id: &'a str,
    input_hash: &'a str,
    run_id: &'a str,
    processed_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = taxonomy)]
struct NewQualityRow {
    quality_id: String,
    run_id: String,
    name: String,
    definition: String,
    recognition_test: String,
    exploitation_logic: String,
    canonical_examples: Value,
    review_status: String,
    reviewer_notes: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct QualityRow {
    quality_id: String,
    #[allow(dead_code)]
    run_id: String,
    name: String,
    definition: String,
    recognition_test: String,
    exploitation_logic: String,
    canonical_examples: Value,
    review_status: String,
    reviewer_notes: Option<String>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = policies)]
struct NewPolicyRow {
    policy_id: String,
    run_id: String,
    name: String,
    description: Option<String>,
    source_document: Option<String>,
    structural_characterization: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct PolicyRow {
    policy_id: String,
    #[allow(dead_code)]
    run_id: String,
    name: String,
    description: Option<String>,
    source_document: Option<String>,
    structural_characterization: Option<String>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = policy_scores)]
struct NewScoreRow {
    run_id: String,
    policy_id: String,
    quality_id: String,
    present: bool,
    evidence: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = predictions)]
struct NewPredictionRow {
    prediction_id: String,
    run_id: String,
    policy_id: String,
    convergence_score: i32,
    mechanics: String,
    enabling_qualities: Value,
    actor_profile: Option<String>,
    lifecycle_stage: Option<String>,
    detection_difficulty: Option<String>,
    review_status: String,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct PredictionRow {
    prediction_id: String,
    #[allow(dead_code)]
    run_id: String,
    policy_id: String,
    convergence_score: i32,
    mechanics: String,
    enabling_qualities: Value,
    actor_profile: Option<String>,
    lifecycle_stage: Option<String>,
    detection_difficulty: Option<String>,
    review_status: String,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = detection_patterns)]
struct NewPatternRow {
    pattern_id: String,
    run_id: String,
    prediction_id: String,
    data_source: String,
    anomaly_signal: String,
    baseline: Option<String>,
    false_positive_risk: Option<String>,
    detection_latency: Option<String>,
    priority: String,
    implementation_notes: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Queryable, Debug)]
struct PatternRow {
    pattern_id: String,
    #[allow(dead_code)]
    run_id: String,
    prediction_id: String,
    data_source: String,
    anomaly_signal: String,
    baseline: Option<String>,
    false_positive_risk: Option<String>,
    detection_latency: Option<String>,
    priority: String,
    implementation_notes: Option<String>,
    #[allow(dead_code)]
    created_at: DateTime<Utc>,
}

// ── Conversiones ────────────────────────────────────────────────────

fn parse_status(raw: &str) -> Result<StageStatus, PersistenceError> {
    StageStatus::parse(raw).ok_or_else(|| PersistenceError::Unknown(format!("invalid stage status '{raw}'")))
}

fn attempt_from_row(row: StageLogRow) -> Result<StageAttempt, PersistenceError> {
    let status = parse_status(&row.status)?;
    Ok(StageAttempt { seq: row.id as u64,
                      run_id: row.run_id,
                      stage: row.stage,
                      status,
                      started_at: row.started_at,
                      completed_at: row.completed_at,
                      error_message: row.error_message,
                      metadata: row.metadata,
                      gate_token: row.gate_token })
}

fn quality_from_row(row: QualityRow) -> Result<Quality, DomainError> {
    let review_status = ReviewStatus::parse(&row.review_status)
        .ok_or_else(|| DomainError::ExternalError(format!("invalid review_status '{}'", row.review_status)))?;
    let mut quality = Quality::new(row.quality_id,
                                   row.name,
                                   row.definition,
                                   row.recognition_test,
                                   row.exploitation_logic)?;
    quality.canonical_examples = serde_json::from_value(row.canonical_examples).unwrap_or_default();
    quality.review_status = review_status;
    quality.reviewer_notes = row.reviewer_notes;
    Ok(quality)
}

fn policy_from_row(row: PolicyRow) -> Result<Policy, DomainError> {
    let mut policy = Policy::new(row.policy_id, row.name)?;
    policy.description = row.description;
    policy.source_document = row.source_document;
    policy.structural_characterization = row.structural_characterization;
    Ok(policy)
}

fn prediction_from_row(row: PredictionRow) -> Result<Prediction, DomainError> {
    let review_status = ReviewStatus::parse(&row.review_status)
        .ok_or_else(|| DomainError::ExternalError(format!("invalid review_status '{}'", row.review_status)))?;
    Ok(Prediction { prediction_id: row.prediction_id,
                    policy_id: row.policy_id,
                    convergence_score: row.convergence_score.max(0) as u32,
                    mechanics: row.mechanics,
                    enabling_qualities: serde_json::from_value(row.enabling_qualities).unwrap_or_default(),
                    actor_profile: row.actor_profile,
                    lifecycle_stage: row.lifecycle_stage,
                    detection_difficulty: row.detection_difficulty,
                    review_status })
}

fn pattern_from_row(row: PatternRow) -> Result<DetectionPattern, DomainError> {
    let priority = PatternPriority::parse(&row.priority)
        .ok_or_else(|| DomainError::ExternalError(format!("invalid priority '{}'", row.priority)))?;
    Ok(DetectionPattern { pattern_id: row.pattern_id,
                          prediction_id: row.prediction_id,
                          data_source: row.data_source,
                          anomaly_signal: row.anomaly_signal,
                          baseline: row.baseline,
                          false_positive_risk: row.false_positive_risk,
                          detection_latency: row.detection_latency,
                          priority,
                          implementation_notes: row.implementation_notes })
}

fn domain_err(e: PersistenceError) -> DomainError {
    DomainError::ExternalError(e.to_string())
}

// ── Store ───────────────────────────────────────────────────────────

/// Backend Postgres completo del pipeline: implementa los traits de
/// almacenamiento del core y el `AnalysisStore` del dominio sobre el mismo
/// pool.
pub struct PgPipelineStore<P: ConnectionProvider> {
    provider: P,
}

impl<P: ConnectionProvider> PgPipelineStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Transiciona la fila `running` más reciente del (run, stage) dentro de
    /// una transacción: el select del target y el update son atómicos.
    fn transition_latest_running(&self,
                                 run_id: &str,
                                 stage: StageId,
                                 to_status: &str,
                                 error_message: Option<&str>,
                                 metadata: Option<&Value>)
                                 -> Result<usize, PersistenceError> {
        let now = Utc::now();
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let target: Option<i64> = stage_log::table.filter(stage_log::run_id.eq(run_id))
                                                              .filter(stage_log::stage.eq(stage))
                                                              .filter(stage_log::status.eq("running"))
                                                              .order(stage_log::id.desc())
                                                              .select(stage_log::id)
                                                              .first(tx)
                                                              .optional()?;
                    let Some(row_id) = target else {
                        return Ok(0);
                    };
                    diesel::update(stage_log::table.find(row_id))
                        .set((stage_log::status.eq(to_status),
                              stage_log::completed_at.eq(Some(now)),
                              stage_log::error_message.eq(error_message),
                              stage_log::metadata.eq(metadata.cloned())))
                        .execute(tx)
                })
                .map_err(PersistenceError::from)
        })
    }
}

impl<P: ConnectionProvider> RunRegistry for PgPipelineStore<P> {
    fn create_run(&self, run_id: &str, config_snapshot: &Value, notes: &str) -> Result<(), PipelineError> {
        let result = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(pipeline_runs::table).values(NewRunRow { run_id,
                                                                         created_at: Utc::now(),
                                                                         config_snapshot,
                                                                         notes })
                                                     .execute(&mut conn)
                                                     .map_err(PersistenceError::from)
        });
        match result {
            Ok(_) => Ok(()),
            Err(PersistenceError::UniqueViolation(_)) => Err(PipelineError::DuplicateRun(run_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn latest_run(&self) -> Result<Option<String>, PipelineError> {
        let row = with_retry(|| {
            let mut conn = self.provider.connection()?;
            pipeline_runs::table.order(pipeline_runs::created_at.desc())
                                .select(pipeline_runs::run_id)
                                .first::<String>(&mut conn)
                                .optional()
                                .map_err(PersistenceError::from)
        })?;
        Ok(row)
    }
}

impl<P: ConnectionProvider> StageLog for PgPipelineStore<P> {
    fn start_stage(&self, run_id: &str, stage: StageId) -> Result<(), PipelineError> {
        debug!("start_stage run={run_id} stage={stage}");
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(stage_log::table).values(NewStageLogRow { run_id,
                                                                          stage,
                                                                          status: "running",
                                                                          started_at: Some(Utc::now()) })
                                                 .execute(&mut conn)
                                                 .map_err(PersistenceError::from)
        })?;
        Ok(())
    }

    fn complete_stage(&self, run_id: &str, stage: StageId, metadata: Option<Value>) -> Result<(), PipelineError> {
        self.transition_latest_running(run_id, stage, "completed", None, metadata.as_ref())?;
        Ok(())
    }

    fn fail_stage(&self, run_id: &str, stage: StageId, error: &str) -> Result<(), PipelineError> {
        self.transition_latest_running(run_id, stage, "failed", Some(error), None)?;
        Ok(())
    }

    fn mark_awaiting_approval(&self, run_id: &str, stage: StageId) -> Result<(), PipelineError> {
        self.transition_latest_running(run_id, stage, "awaiting_approval", None, None)?;
        Ok(())
    }

    fn approve_stage(&self, run_id: &str, stage: StageId) -> Result<bool, PipelineError> {
        let changed = with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let target: Option<i64> = stage_log::table.filter(stage_log::run_id.eq(run_id))
                                                              .filter(stage_log::stage.eq(stage))
                                                              .filter(stage_log::status.eq("awaiting_approval"))
                                                              .order(stage_log::id.desc())
                                                              .select(stage_log::id)
                                                              .first(tx)
                                                              .optional()?;
                    let Some(row_id) = target else {
                        return Ok(0);
                    };
                    diesel::update(stage_log::table.find(row_id)).set(stage_log::status.eq("approved"))
                                                                 .execute(tx)
                })
                .map_err(PersistenceError::from)
        })?;
        Ok(changed > 0)
    }

    fn current_status(&self, run_id: &str, stage: StageId) -> Result<Option<StageStatus>, PipelineError> {
        let raw = with_retry(|| {
            let mut conn = self.provider.connection()?;
            stage_log::table.filter(stage_log::run_id.eq(run_id))
                            .filter(stage_log::stage.eq(stage))
                            .order(stage_log::id.desc())
                            .select(stage_log::status)
                            .first::<String>(&mut conn)
                            .optional()
                            .map_err(PersistenceError::from)
        })?;
        match raw {
            Some(raw) => Ok(Some(parse_status(&raw).map_err(PipelineError::from)?)),
            None => Ok(None),
        }
    }

    fn stage_history(&self, run_id: &str) -> Result<Vec<StageAttempt>, PipelineError> {
        let rows: Vec<StageLogRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            stage_log::table.filter(stage_log::run_id.eq(run_id))
                            .order(stage_log::id.asc())
                            .load(&mut conn)
                            .map_err(PersistenceError::from)
        })?;
        rows.into_iter()
            .map(|row| attempt_from_row(row).map_err(PipelineError::from))
            .collect()
    }

    fn store_gate_token(&self, run_id: &str, stage: StageId, token: &str) -> Result<(), PipelineError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            conn.build_transaction()
                .read_write()
                .run(|tx| {
                    let target: Option<i64> = stage_log::table.filter(stage_log::run_id.eq(run_id))
                                                              .filter(stage_log::stage.eq(stage))
                                                              .order(stage_log::id.desc())
                                                              .select(stage_log::id)
                                                              .first(tx)
                                                              .optional()?;
                    let Some(row_id) = target else {
                        return Ok(0);
                    };
                    diesel::update(stage_log::table.find(row_id)).set(stage_log::gate_token.eq(token))
                                                                 .execute(tx)
                })
                .map_err(PersistenceError::from)
        })?;
        Ok(())
    }

    fn latest_gate_token(&self, run_id: &str, stage: StageId) -> Result<Option<String>, PipelineError> {
        let token = with_retry(|| {
            let mut conn = self.provider.connection()?;
            stage_log::table.filter(stage_log::run_id.eq(run_id))
                            .filter(stage_log::stage.eq(stage))
                            .filter(stage_log::gate_token.is_not_null())
                            .order(stage_log::id.desc())
                            .select(stage_log::gate_token)
                            .first::<Option<String>>(&mut conn)
                            .optional()
                            .map_err(PersistenceError::from)
        })?;
        Ok(token.flatten())
    }
}

impl<P: ConnectionProvider> ProcessingLedger for PgPipelineStore<P> {
    fn hashes_for_stage(&self, stage: StageId) -> Result<HashMap<String, String>, PipelineError> {
        let rows: Vec<(String, String)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            stage_processing_log::table.filter(stage_processing_log::stage.eq(stage))
                                       .select((stage_processing_log::entity_id,
                                                stage_processing_log::input_hash))
                                       .load(&mut conn)
                                       .map_err(PersistenceError::from)
        })?;
        Ok(rows.into_iter().collect())
    }

    fn record_processed(&self, stage: StageId, entity_id: &str, digest: &str, run_id: &str)
                        -> Result<(), PipelineError> {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(stage_processing_log::table)
                .values(NewProcessingRow { stage,
                                           entity_id,
                                           input_hash: digest,
                                           run_id,
                                           processed_at: Utc::now() })
                .on_conflict((stage_processing_log::stage, stage_processing_log::entity_id))
                .do_update()
                .set((stage_processing_log::input_hash.eq(digest),
                      stage_processing_log::run_id.eq(run_id),
                      stage_processing_log::processed_at.eq(Utc::now())))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        })?;
        Ok(())
    }
}

impl<P: ConnectionProvider> AnalysisStore for PgPipelineStore<P> {
    fn upsert_quality(&self, run_id: &str, quality: &Quality) -> Result<(), DomainError> {
        let row = NewQualityRow {
            quality_id: quality.quality_id.clone(),
            run_id: run_id.to_string(),
            name: quality.name.clone(),
            definition: quality.definition.clone(),
            recognition_test: quality.recognition_test.clone(),
            exploitation_logic: quality.exploitation_logic.clone(),
            canonical_examples: serde_json::to_value(&quality.canonical_examples)
                .unwrap_or_else(|_| Value::Array(Vec::new())),
            review_status: quality.review_status.as_str().to_string(),
            reviewer_notes: quality.reviewer_notes.clone(),
            created_at: Utc::now(),
        };
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(taxonomy::table)
                .values(&row)
                .on_conflict(taxonomy::quality_id)
                .do_update()
                .set((taxonomy::run_id.eq(&row.run_id),
                      taxonomy::name.eq(&row.name),
                      taxonomy::definition.eq(&row.definition),
                      taxonomy::recognition_test.eq(&row.recognition_test),
                      taxonomy::exploitation_logic.eq(&row.exploitation_logic),
                      taxonomy::canonical_examples.eq(&row.canonical_examples),
                      taxonomy::review_status.eq(&row.review_status),
                      taxonomy::reviewer_notes.eq(&row.reviewer_notes)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        Ok(())
    }

    fn taxonomy(&self) -> Result<Vec<Quality>, DomainError> {
        let rows: Vec<QualityRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            taxonomy::table.order(taxonomy::quality_id.asc())
                           .load(&mut conn)
                           .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        rows.into_iter().map(quality_from_row).collect()
    }

    fn approved_taxonomy(&self) -> Result<Vec<Quality>, DomainError> {
        let rows: Vec<QualityRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            taxonomy::table.filter(taxonomy::review_status.eq("approved"))
                           .order(taxonomy::quality_id.asc())
                           .load(&mut conn)
                           .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        rows.into_iter().map(quality_from_row).collect()
    }

    fn set_quality_review(&self, quality_id: &str, status: ReviewStatus, notes: &str) -> Result<bool, DomainError> {
        let notes = if notes.is_empty() { None } else { Some(notes.to_string()) };
        let changed = with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::update(taxonomy::table.find(quality_id))
                .set((taxonomy::review_status.eq(status.as_str()), taxonomy::reviewer_notes.eq(&notes)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        Ok(changed > 0)
    }

    fn upsert_policy(&self, run_id: &str, policy: &Policy) -> Result<(), DomainError> {
        let row = NewPolicyRow { policy_id: policy.policy_id.clone(),
                                 run_id: run_id.to_string(),
                                 name: policy.name.clone(),
                                 description: policy.description.clone(),
                                 source_document: policy.source_document.clone(),
                                 structural_characterization: policy.structural_characterization.clone(),
                                 created_at: Utc::now() };
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(policies::table)
                .values(&row)
                .on_conflict(policies::policy_id)
                .do_update()
                .set((policies::run_id.eq(&row.run_id),
                      policies::name.eq(&row.name),
                      policies::description.eq(&row.description),
                      policies::source_document.eq(&row.source_document),
                      policies::structural_characterization.eq(&row.structural_characterization)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        Ok(())
    }

    fn policies(&self) -> Result<Vec<Policy>, DomainError> {
        let rows: Vec<PolicyRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            policies::table.order(policies::policy_id.asc())
                           .load(&mut conn)
                           .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        rows.into_iter().map(policy_from_row).collect()
    }

    fn upsert_policy_score(&self, score: &PolicyScore) -> Result<(), DomainError> {
        let row = NewScoreRow { run_id: score.run_id.clone(),
                                policy_id: score.policy_id.clone(),
                                quality_id: score.quality_id.clone(),
                                present: score.present,
                                evidence: score.evidence.clone(),
                                created_at: Utc::now() };
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(policy_scores::table)
                .values(&row)
                .on_conflict((policy_scores::run_id, policy_scores::policy_id, policy_scores::quality_id))
                .do_update()
                .set((policy_scores::present.eq(row.present), policy_scores::evidence.eq(&row.evidence)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        Ok(())
    }

    fn policy_scores(&self, run_id: &str) -> Result<Vec<PolicyScore>, DomainError> {
        let rows: Vec<(String, String, bool, Option<String>)> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            policy_scores::table.filter(policy_scores::run_id.eq(run_id))
                                .order((policy_scores::policy_id.asc(), policy_scores::quality_id.asc()))
                                .select((policy_scores::policy_id,
                                         policy_scores::quality_id,
                                         policy_scores::present,
                                         policy_scores::evidence))
                                .load(&mut conn)
                                .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        Ok(rows.into_iter()
               .map(|(policy_id, quality_id, present, evidence)| PolicyScore { run_id: run_id.to_string(),
                                                                               policy_id,
                                                                               quality_id,
                                                                               present,
                                                                               evidence })
               .collect())
    }

    fn upsert_prediction(&self, run_id: &str, prediction: &Prediction) -> Result<(), DomainError> {
        let row = NewPredictionRow {
            prediction_id: prediction.prediction_id.clone(),
            run_id: run_id.to_string(),
            policy_id: prediction.policy_id.clone(),
            convergence_score: prediction.convergence_score as i32,
            mechanics: prediction.mechanics.clone(),
            enabling_qualities: serde_json::to_value(&prediction.enabling_qualities)
                .unwrap_or_else(|_| Value::Array(Vec::new())),
            actor_profile: prediction.actor_profile.clone(),
            lifecycle_stage: prediction.lifecycle_stage.clone(),
            detection_difficulty: prediction.detection_difficulty.clone(),
            review_status: prediction.review_status.as_str().to_string(),
            created_at: Utc::now(),
        };
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(predictions::table)
                .values(&row)
                .on_conflict(predictions::prediction_id)
                .do_update()
                .set((predictions::run_id.eq(&row.run_id),
                      predictions::policy_id.eq(&row.policy_id),
                      predictions::convergence_score.eq(row.convergence_score),
                      predictions::mechanics.eq(&row.mechanics),
                      predictions::enabling_qualities.eq(&row.enabling_qualities),
                      predictions::actor_profile.eq(&row.actor_profile),
                      predictions::lifecycle_stage.eq(&row.lifecycle_stage),
                      predictions::detection_difficulty.eq(&row.detection_difficulty),
                      predictions::review_status.eq(&row.review_status)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        Ok(())
    }

    fn predictions(&self, run_id: &str) -> Result<Vec<Prediction>, DomainError> {
        let rows: Vec<PredictionRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            predictions::table.filter(predictions::run_id.eq(run_id))
                              .order((predictions::convergence_score.desc(), predictions::prediction_id.asc()))
                              .load(&mut conn)
                              .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        rows.into_iter().map(prediction_from_row).collect()
    }

    fn upsert_detection_pattern(&self, run_id: &str, pattern: &DetectionPattern) -> Result<(), DomainError> {
        let row = NewPatternRow { pattern_id: pattern.pattern_id.clone(),
                                  run_id: run_id.to_string(),
                                  prediction_id: pattern.prediction_id.clone(),
                                  data_source: pattern.data_source.clone(),
                                  anomaly_signal: pattern.anomaly_signal.clone(),
                                  baseline: pattern.baseline.clone(),
                                  false_positive_risk: pattern.false_positive_risk.clone(),
                                  detection_latency: pattern.detection_latency.clone(),
                                  priority: pattern.priority.as_str().to_string(),
                                  implementation_notes: pattern.implementation_notes.clone(),
                                  created_at: Utc::now() };
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            diesel::insert_into(detection_patterns::table)
                .values(&row)
                .on_conflict(detection_patterns::pattern_id)
                .do_update()
                .set((detection_patterns::run_id.eq(&row.run_id),
                      detection_patterns::prediction_id.eq(&row.prediction_id),
                      detection_patterns::data_source.eq(&row.data_source),
                      detection_patterns::anomaly_signal.eq(&row.anomaly_signal),
                      detection_patterns::baseline.eq(&row.baseline),
                      detection_patterns::false_positive_risk.eq(&row.false_positive_risk),
                      detection_patterns::detection_latency.eq(&row.detection_latency),
                      detection_patterns::priority.eq(&row.priority),
                      detection_patterns::implementation_notes.eq(&row.implementation_notes)))
                .execute(&mut conn)
                .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        Ok(())
    }

    fn detection_patterns(&self, run_id: &str) -> Result<Vec<DetectionPattern>, DomainError> {
        let rows: Vec<PatternRow> = with_retry(|| {
            let mut conn = self.provider.connection()?;
            detection_patterns::table.filter(detection_patterns::run_id.eq(run_id))
                                     .order(detection_patterns::pattern_id.asc())
                                     .load(&mut conn)
                                     .map_err(PersistenceError::from)
        }).map_err(domain_err)?;
        rows.into_iter().map(pattern_from_row).collect()
    }
}

// ── Pool ────────────────────────────────────────────────────────────

/// Construye un pool Postgres r2d2 y corre el migrador una sola vez sobre la
/// primera conexión. Un fallo de migración es fatal (el pool no se entrega).
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        let outcome = run_migrations(&mut conn)?;
        debug!("migration outcome: {outcome:?}");
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee configuración y construye un pool
/// ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = DbConfig::from_env();
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}
