//! Despacho concurrente acotado de llamadas externas independientes.
//!
//! Única abstracción de fan-out del sistema: todos los stages que abren
//! llamadas al motor de razonamiento dependen de este módulo en lugar de
//! rearmar su propio loop submit/await/collect.
//!
//! Política de fallo parcial sin rollback: el fallo de `invoke` en un job
//! registra su label como fallido y el resto del batch sigue intacto. Un
//! batch de N unidades independientes no se penaliza a cero porque fallen
//! M < N de ellas. No hay timeout de batch; cada job queda sujeto al timeout
//! que el propio `invoke` imponga.
//!
//! Orden: ninguno entre jobs. Los resultados llegan al handler en orden de
//! finalización, serializados bajo un mutex; es seguro porque el camino de
//! persistencia de cada job está acotado a una entidad independiente sin
//! invariantes cruzadas.

use crate::errors::PipelineError;
use log::{debug, error, warn};
use rayon::prelude::*;
use std::fmt::Display;
use std::sync::Mutex;

/// Un job independiente: `label` para diagnóstico, `payload` para `invoke`,
/// `context` opaco que se entrega intacto al handler de resultado.
pub struct DispatchJob<P, C> {
    pub label: String,
    pub payload: P,
    pub context: C,
}

impl<P, C> DispatchJob<P, C> {
    pub fn new(label: impl Into<String>, payload: P, context: C) -> Self {
        Self { label: label.into(),
               payload,
               context }
    }
}

/// Resultado agregado de un batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Suma de los conteos devueltos por el handler de cada job exitoso.
    pub total: usize,
    /// Labels de los jobs cuyo `invoke` falló, en orden de finalización.
    pub failed: Vec<String>,
}

pub struct ParallelDispatcher {
    max_concurrency: usize,
}

struct Sink<H> {
    on_result: H,
    total: usize,
    failed: Vec<String>,
}

impl ParallelDispatcher {
    /// Concurrencia cero degrada a pool de un worker (ejecución secuencial).
    pub fn new(max_concurrency: usize) -> Self {
        Self { max_concurrency: max_concurrency.max(1) }
    }

    /// Ejecuta todos los jobs sobre un pool de tamaño fijo y retorna recién
    /// cuando cada job terminó o falló.
    ///
    /// `invoke` hace la llamada externa; `on_result` persiste el resultado
    /// (incluido el `record_processed` de la entidad — el dispatcher no sabe
    /// nada de persistencia) y devuelve la cantidad de items almacenados.
    pub fn run<P, C, R, E, F, H>(&self, jobs: Vec<DispatchJob<P, C>>, invoke: F, on_result: H)
                                 -> Result<BatchOutcome, PipelineError>
        where P: Send,
              C: Send,
              E: Display,
              F: Fn(&P) -> Result<R, E> + Sync,
              H: FnMut(R, C) -> usize + Send
    {
        if jobs.is_empty() {
            return Ok(BatchOutcome::default());
        }
        debug!("dispatching {} jobs (concurrency={})", jobs.len(), self.max_concurrency);

        let pool = rayon::ThreadPoolBuilder::new().num_threads(self.max_concurrency)
                                                  .build()
                                                  .map_err(|e| PipelineError::Internal(format!("dispatcher pool: {e}")))?;

        let sink = Mutex::new(Sink { on_result,
                                     total: 0,
                                     failed: Vec::new() });

        pool.install(|| {
                jobs.into_par_iter().for_each(|job| match invoke(&job.payload) {
                                        Ok(result) => {
                                            let mut s = sink.lock().unwrap_or_else(|e| e.into_inner());
                                            let count = (s.on_result)(result, job.context);
                                            s.total += count;
                                            debug!("{}: {} items (total: {})", job.label, count, s.total);
                                        }
                                        Err(e) => {
                                            error!("FAILED {}: {}", job.label, e);
                                            let mut s = sink.lock().unwrap_or_else(|e| e.into_inner());
                                            s.failed.push(job.label);
                                        }
                                    });
            });

        let sink = sink.into_inner().unwrap_or_else(|e| e.into_inner());
        if !sink.failed.is_empty() {
            warn!("{} jobs failed", sink.failed.len());
        }
        Ok(BatchOutcome { total: sink.total,
                          failed: sink.failed })
    }
}
