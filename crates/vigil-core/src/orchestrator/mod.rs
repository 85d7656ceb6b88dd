//! Orquestador de stages: prerequisitos, ejecución y status agregado.
//!
//! Modelo de scheduling: los stages de un mismo run corren estrictamente en
//! secuencia; la concurrencia vive DENTRO de la lógica de un stage, vía el
//! dispatcher acotado, exclusivamente para llamadas externas independientes.
//! Un intento que nunca completa (proceso muerto a mitad de stage) queda
//! `running` para siempre: es un hecho diagnosticable en `pipeline_status`,
//! no algo que el motor reintente en silencio.

use crate::client::ReasoningClient;
use crate::errors::PipelineError;
use crate::model::{stage_name, PipelineConfig, StageId, StageStatus, STAGE_ASSESSMENT, STAGE_RESEARCH,
                   STAGE_SCANNING, STAGE_TRIAGE, STAGE_ORDER};
use crate::stage::{StageContext, StageLogic, StageSet};
use crate::store::{PipelineStore, StageLog};
use chrono::{DateTime, Utc};
use log::{error, info};

/// Mapa fijo de prerequisitos: por defecto N−1; los sub-stages de
/// profundización declaran su prerequisito explícito.
pub fn prerequisite_for(stage: StageId) -> Option<StageId> {
    match stage {
        STAGE_TRIAGE => Some(STAGE_SCANNING),
        STAGE_RESEARCH => Some(STAGE_TRIAGE),
        STAGE_ASSESSMENT => Some(STAGE_RESEARCH),
        s if s > 1 => Some(s - 1),
        _ => None,
    }
}

/// Resultado observable de un intento de stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub run_id: String,
    pub stage: StageId,
    pub status: Option<StageStatus>,
    /// `true` cuando el stage quedó pausado en su gate humano.
    pub needs_approval: bool,
}

/// Fila del resumen de status: último estado conocido por stage.
#[derive(Debug, Clone)]
pub struct StageOverview {
    pub stage: StageId,
    pub name: &'static str,
    pub status: Option<StageStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

pub struct StageOrchestrator<'a> {
    store: &'a dyn PipelineStore,
    client: &'a dyn ReasoningClient,
    config: &'a PipelineConfig,
}

impl<'a> StageOrchestrator<'a> {
    pub fn new(store: &'a dyn PipelineStore, client: &'a dyn ReasoningClient, config: &'a PipelineConfig) -> Self {
        Self { store, client, config }
    }

    /// Ejecuta una lógica de stage con chequeo de prerequisito.
    ///
    /// Nunca saltea ni auto-ejecuta el prerequisito: si no está en
    /// {completed, approved} falla rápido nombrando al stage bloqueante y su
    /// estado real. Un error no capturado de la lógica se traduce a
    /// `fail_stage` antes de re-propagarse, garantizando que ningún intento
    /// quede `running` por un error no manejado.
    pub fn run_stage(&self, run_id: &str, logic: &dyn StageLogic) -> Result<StageReport, PipelineError> {
        let stage = logic.stage();
        if let Some(prereq) = prerequisite_for(stage) {
            let status = self.store.current_status(run_id, prereq)?;
            let satisfied = status.map(|s| s.satisfies_prerequisite()).unwrap_or(false);
            if !satisfied {
                return Err(PipelineError::PrerequisiteNotSatisfied {
                    requested: stage,
                    stage: prereq,
                    status: status.map(|s| s.to_string()).unwrap_or_else(|| "never run".into()),
                });
            }
        }

        info!("stage {} ({}) starting for run {}", stage, logic.name(), run_id);
        self.store.start_stage(run_id, stage)?;

        let ctx = StageContext { store: self.store,
                                 client: self.client,
                                 run_id,
                                 config: self.config };
        if let Err(e) = logic.run(&ctx) {
            let message = e.to_string();
            if let Err(log_err) = self.store.fail_stage(run_id, stage, &message) {
                error!("could not record failure of stage {stage}: {log_err}");
            }
            return Err(PipelineError::StageLogicFailure { stage, message });
        }

        let status = self.store.current_status(run_id, stage)?;
        let needs_approval = status == Some(StageStatus::AwaitingApproval) && self.config.is_human_gate(stage);
        Ok(StageReport { run_id: run_id.to_string(),
                         stage,
                         status,
                         needs_approval })
    }

    /// Ejecuta el stage registrado bajo `stage` en el set.
    pub fn run_stage_number(&self, run_id: &str, stage: StageId, set: &StageSet)
                            -> Result<StageReport, PipelineError> {
        let logic = set.get(stage).ok_or(PipelineError::UnknownStage(stage))?;
        self.run_stage(run_id, logic)
    }

    /// Corre una secuencia de stages en orden estricto para un run, frenando
    /// en el primer gate humano pendiente. Los errores (prerequisito o fallo
    /// de lógica) se propagan: el caller decide si esperar y reintentar.
    pub fn run_sequence(&self, run_id: &str, set: &StageSet, stages: &[StageId])
                        -> Result<Vec<StageReport>, PipelineError> {
        let mut reports = Vec::with_capacity(stages.len());
        for &stage in stages {
            let report = self.run_stage_number(run_id, stage, set)?;
            let paused = report.needs_approval;
            reports.push(report);
            if paused {
                info!("pipeline paused at stage {stage} human review gate for run {run_id}");
                break;
            }
        }
        Ok(reports)
    }
}

/// Reduce el stage log al último estado por stage, en orden canónico. Los
/// stages nunca intentados aparecen con estado `None`.
pub fn pipeline_status(log: &dyn StageLog, run_id: &str) -> Result<Vec<StageOverview>, PipelineError> {
    let history = log.stage_history(run_id)?;
    let mut overview = Vec::with_capacity(STAGE_ORDER.len());
    for &stage in STAGE_ORDER.iter() {
        let latest = history.iter().rev().find(|a| a.stage == stage);
        overview.push(StageOverview { stage,
                                      name: stage_name(stage),
                                      status: latest.map(|a| a.status),
                                      started_at: latest.and_then(|a| a.started_at),
                                      completed_at: latest.and_then(|a| a.completed_at),
                                      error_message: latest.and_then(|a| a.error_message.clone()) });
    }
    Ok(overview)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prerequisite_is_previous_stage() {
        assert_eq!(prerequisite_for(1), None);
        assert_eq!(prerequisite_for(2), Some(1));
        assert_eq!(prerequisite_for(4), Some(3));
        assert_eq!(prerequisite_for(5), Some(4));
    }

    #[test]
    fn sub_stages_have_explicit_prerequisites() {
        assert_eq!(prerequisite_for(30), Some(3));
        assert_eq!(prerequisite_for(31), Some(30));
        assert_eq!(prerequisite_for(32), Some(31));
    }
}
