//! Frontera con el motor de razonamiento externo.
//!
//! El motor que extrae y puntúa es un colaborador: el core sólo define el
//! contrato request/response JSON y un doble scriptable para tests y demos.
//! La política de retry/backoff de las llamadas reales pertenece al
//! adaptador concreto, no a este trait.

use crate::errors::PipelineError;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Request mínimo hacia el motor de razonamiento.
#[derive(Debug, Clone)]
pub struct ReasonRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl ReasonRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self { prompt: prompt.into(),
               system: None,
               max_tokens: 4096,
               temperature: 0.2 }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Cliente del motor de razonamiento. Una invocación = un documento JSON
/// parseado, o error del colaborador.
pub trait ReasoningClient: Send + Sync {
    fn invoke_json(&self, request: &ReasonRequest) -> Result<Value, PipelineError>;
}

/// Doble scriptable: responde en orden FIFO las respuestas encoladas y luego
/// repite el fallback. Cuenta invocaciones, que es lo que los tests de delta
/// observan para verificar skip-correctness.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Value>>,
    fallback: Value,
    fail_with: Option<String>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(fallback: Value) -> Self {
        Self { responses: Mutex::new(VecDeque::new()),
               fallback,
               fail_with: None,
               calls: AtomicUsize::new(0) }
    }

    /// Cliente que falla toda invocación con el mensaje dado.
    pub fn failing(message: impl Into<String>) -> Self {
        Self { responses: Mutex::new(VecDeque::new()),
               fallback: Value::Null,
               fail_with: Some(message.into()),
               calls: AtomicUsize::new(0) }
    }

    /// Encola una respuesta que se consume antes que el fallback.
    pub fn push_response(&self, response: Value) {
        self.responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(response);
    }

    /// Invocaciones acumuladas.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ReasoningClient for ScriptedClient {
    fn invoke_json(&self, _request: &ReasonRequest) -> Result<Value, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail_with {
            return Err(PipelineError::Client(message.clone()));
        }
        let next = self.responses
                       .lock()
                       .unwrap_or_else(|e| e.into_inner())
                       .pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn scripted_client_drains_queue_then_falls_back() {
        let client = ScriptedClient::new(json!({"kind": "fallback"}));
        client.push_response(json!({"kind": "first"}));

        let req = ReasonRequest::new("p");
        assert_eq!(client.invoke_json(&req).unwrap()["kind"], "first");
        assert_eq!(client.invoke_json(&req).unwrap()["kind"], "fallback");
        assert_eq!(client.invoke_json(&req).unwrap()["kind"], "fallback");
        assert_eq!(client.calls(), 3);
    }

    #[test]
    fn failing_client_reports_client_error() {
        let client = ScriptedClient::failing("throttled");
        let err = client.invoke_json(&ReasonRequest::new("p")).expect_err("debe fallar");
        assert_eq!(err, PipelineError::Client("throttled".into()));
    }
}
