//! Constantes del motor de orquestación.
//!
//! Valores por defecto de la configuración tipada y parámetros estables del
//! mecanismo de delta. `SHORT_DIGEST_LEN` participa en la comparación de
//! digests almacenados: cambiarlo invalida todos los registros del ledger
//! (cada entidad se reprocesa una vez tras el cambio).

use crate::model::StageId;

/// Longitud en caracteres hex del digest corto usado por el ProcessingLedger.
pub const SHORT_DIGEST_LEN: usize = 12;

/// Concurrencia máxima por defecto del dispatcher de llamadas externas.
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;

/// Stages con gate humano por defecto (taxonomía y predicción).
pub const DEFAULT_HUMAN_GATES: [StageId; 2] = [2, 4];

/// Umbral de convergencia por defecto (cantidad de cualidades presentes).
pub const DEFAULT_CONVERGENCE_THRESHOLD: u32 = 3;

/// Directorio por defecto para exportes de resultados.
pub const DEFAULT_EXPORT_DIR: &str = "./results";
