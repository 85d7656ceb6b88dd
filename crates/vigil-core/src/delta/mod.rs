//! Índice de delta: decisión de skip por entidad sobre el ledger cargado en
//! bloque.
//!
//! Uso por cada stage incremental:
//! 1. `DeltaIndex::load` una vez al inicio del stage (una consulta, no N).
//! 2. Para cada entidad candidata, computar el digest sobre exactamente los
//!    campos cuyo cambio debe forzar reprocesamiento (contenido propio más
//!    fingerprints de corpus upstream, ver `hashing::corpus_fingerprint`).
//! 3. `is_unchanged` == true ⇒ skip; si no, reprocesar y llamar
//!    `record_processed` con el digest nuevo DESPUÉS de persistir el output.
//!
//! Cuando todas las candidatas están sin cambios, el stage igualmente
//! transiciona a `completed` con cero trabajo: "nada que hacer" es éxito.

use crate::errors::PipelineError;
use crate::model::StageId;
use crate::store::ProcessingLedger;
use std::collections::HashMap;

pub struct DeltaIndex {
    stage: StageId,
    known: HashMap<String, String>,
}

impl DeltaIndex {
    pub fn load<L: ProcessingLedger + ?Sized>(ledger: &L, stage: StageId) -> Result<Self, PipelineError> {
        let known = ledger.hashes_for_stage(stage)?;
        Ok(Self { stage, known })
    }

    pub fn stage(&self) -> StageId {
        self.stage
    }

    /// Cantidad de entidades con digest conocido para este stage.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// `true` si el digest computado coincide con el último registrado para
    /// la entidad: el stage puede saltearla.
    pub fn is_unchanged(&self, entity_id: &str, digest: &str) -> bool {
        self.known.get(entity_id).map(String::as_str) == Some(digest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryPipelineStore;

    #[test]
    fn unchanged_only_when_digest_matches() {
        let store = InMemoryPipelineStore::new();
        store.record_processed(3, "pol-1", "abc123", "run_1").unwrap();

        let index = DeltaIndex::load(&store, 3).expect("load");
        assert!(index.is_unchanged("pol-1", "abc123"));
        assert!(!index.is_unchanged("pol-1", "zzz999"));
        assert!(!index.is_unchanged("pol-2", "abc123"));
    }
}
