//! Contrato de lógica de stage y registro ordenado de stages.
//!
//! Cada stage de negocio implementa `StageLogic` contra el `StageContext`:
//! el contrato exige llamar exactamente una vez `complete_stage` /
//! `fail_stage` / `mark_awaiting_approval` antes de retornar Ok, o devolver
//! un error (que el orquestador convierte en `fail_stage`).

use crate::client::ReasoningClient;
use crate::errors::PipelineError;
use crate::model::{PipelineConfig, StageId};
use crate::store::PipelineStore;
use indexmap::IndexMap;

/// Contexto inyectado a la lógica de un stage: handle de almacenamiento,
/// cliente de razonamiento, run y configuración tipada.
pub struct StageContext<'a> {
    pub store: &'a dyn PipelineStore,
    pub client: &'a dyn ReasoningClient,
    pub run_id: &'a str,
    pub config: &'a PipelineConfig,
}

pub trait StageLogic: Send + Sync {
    /// Número de stage que implementa esta lógica.
    fn stage(&self) -> StageId;

    fn name(&self) -> &str;

    /// Ejecuta el stage. Camino feliz: la propia lógica registra su
    /// transición terminal o de gate; el orquestador no la toca.
    fn run(&self, ctx: &StageContext<'_>) -> Result<(), PipelineError>;
}

/// Registro de stages en orden de pipeline (orden de inserción).
#[derive(Default)]
pub struct StageSet {
    inner: IndexMap<StageId, Box<dyn StageLogic>>,
}

impl StageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra una lógica; reemplaza la previa del mismo número si existía.
    pub fn register(&mut self, logic: Box<dyn StageLogic>) {
        self.inner.insert(logic.stage(), logic);
    }

    pub fn get(&self, stage: StageId) -> Option<&dyn StageLogic> {
        self.inner.get(&stage).map(|b| b.as_ref())
    }

    /// Números de stage en orden de registro.
    pub fn stages(&self) -> Vec<StageId> {
        self.inner.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}
