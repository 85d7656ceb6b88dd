//! Coordinación de gates humanos de aprobación.
//!
//! Modela el protocolo de pausa/reanudación con un coordinador de workflow
//! externo: el coordinador se pausa y le pide al motor que recuerde cómo
//! despertarlo (token de continuación opaco). El motor jamás interpreta el
//! contenido del token; sólo lo devuelve intacto al aprobar.

use crate::errors::PipelineError;
use crate::model::{StageId, StageStatus};
use crate::store::StageLog;

/// Resultado explícito de un intento de aprobación: "gate no listo" es una
/// rama ordinaria, no un error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Approved,
    /// El estado actual no es `awaiting_approval`; no se tocó ninguna fila.
    NotAwaiting { status: Option<StageStatus> },
}

pub struct GateCoordinator<'a, S: StageLog + ?Sized> {
    log: &'a S,
}

impl<'a, S: StageLog + ?Sized> GateCoordinator<'a, S> {
    pub fn new(log: &'a S) -> Self {
        Self { log }
    }

    /// Registra un gate pendiente para (run, stage): inserta un intento
    /// `running`, lo pasa a `awaiting_approval` y persiste el token sobre ese
    /// registro. La secuencia de tres pasos replica al coordinador externo
    /// pausándose justo después de anunciar el stage.
    pub fn register_gate(&self, run_id: &str, stage: StageId, token: &str) -> Result<(), PipelineError> {
        self.log.start_stage(run_id, stage)?;
        self.log.mark_awaiting_approval(run_id, stage)?;
        self.log.store_gate_token(run_id, stage, token)
    }

    /// Aprueba el gate si y sólo si el estado actual es `awaiting_approval`.
    /// Llamarlo dos veces seguidas no tiene efecto la segunda vez.
    pub fn approve(&self, run_id: &str, stage: StageId) -> Result<GateDecision, PipelineError> {
        if self.log.approve_stage(run_id, stage)? {
            Ok(GateDecision::Approved)
        } else {
            let status = self.log.current_status(run_id, stage)?;
            Ok(GateDecision::NotAwaiting { status })
        }
    }

    /// Token almacenado más reciente para (run, stage), a entregar al
    /// coordinador externo tras aprobar. `None` en modo de ejecución local
    /// síncrona: no hay nada que reanudar.
    pub fn resume_on_approval(&self, run_id: &str, stage: StageId) -> Result<Option<String>, PipelineError> {
        self.log.latest_gate_token(run_id, stage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPipelineStore;

    #[test]
    fn register_then_approve_returns_token() {
        let store = InMemoryPipelineStore::new();
        let gate = GateCoordinator::new(&store);
        gate.register_gate("run_1", 2, "tok-abc").expect("register");
        assert_eq!(store.current_status("run_1", 2).unwrap(), Some(StageStatus::AwaitingApproval));

        assert_eq!(gate.approve("run_1", 2).unwrap(), GateDecision::Approved);
        assert_eq!(gate.resume_on_approval("run_1", 2).unwrap(), Some("tok-abc".to_string()));
    }

    #[test]
    fn approve_without_pending_gate_is_a_branch_not_an_error() {
        let store = InMemoryPipelineStore::new();
        let gate = GateCoordinator::new(&store);
        let decision = gate.approve("run_1", 2).expect("approve");
        assert_eq!(decision, GateDecision::NotAwaiting { status: None });
    }

    #[test]
    fn resume_without_token_is_none() {
        let store = InMemoryPipelineStore::new();
        store.start_stage("run_1", 2).unwrap();
        store.mark_awaiting_approval("run_1", 2).unwrap();
        let gate = GateCoordinator::new(&store);
        assert_eq!(gate.resume_on_approval("run_1", 2).unwrap(), None);
    }
}
