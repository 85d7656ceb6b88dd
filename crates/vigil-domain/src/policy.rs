//! Políticas bajo análisis y sus puntajes de convergencia.

use crate::error::DomainError;
use serde::{Deserialize, Serialize};

/// Una política es una entidad del corpus global: el escaneo la evalúa
/// contra cada cualidad aprobada de la taxonomía.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub policy_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub source_document: Option<String>,
    /// Caracterización estructural: el texto que realmente se escanea.
    #[serde(default)]
    pub structural_characterization: Option<String>,
}

impl Policy {
    pub fn new(policy_id: impl Into<String>, name: impl Into<String>) -> Result<Self, DomainError> {
        let policy_id = policy_id.into();
        let name = name.into();
        if policy_id.trim().is_empty() {
            return Err(DomainError::ValidationError("policy_id must not be empty".into()));
        }
        if name.trim().is_empty() {
            return Err(DomainError::ValidationError(format!("policy '{policy_id}' has an empty name")));
        }
        Ok(Self { policy_id,
                  name,
                  description: None,
                  source_document: None,
                  structural_characterization: None })
    }

    pub fn with_characterization(mut self, characterization: impl Into<String>) -> Self {
        self.structural_characterization = Some(characterization.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Texto que alimenta el escaneo y el digest de delta: la
    /// caracterización estructural si existe, si no la descripción, si no el
    /// nombre. Cualquier cambio acá debe invalidar el resultado cacheado.
    pub fn scan_text(&self) -> &str {
        self.structural_characterization
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or(&self.name)
    }
}

/// Presencia (o ausencia) de una cualidad en una política, con evidencia.
/// Upsert completo por (run, policy, quality): cada escritura reemplaza el
/// registro entero, nunca lo actualiza parcialmente.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyScore {
    pub run_id: String,
    pub policy_id: String,
    pub quality_id: String,
    pub present: bool,
    #[serde(default)]
    pub evidence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_text_prefers_characterization() {
        let p = Policy::new("POL-1", "Telehealth billing").expect("valid")
                                                          .with_description("desc")
                                                          .with_characterization("structural text");
        assert_eq!(p.scan_text(), "structural text");

        let p = Policy::new("POL-2", "DME supplier enrollment").expect("valid");
        assert_eq!(p.scan_text(), "DME supplier enrollment");
    }

    #[test]
    fn policy_requires_id_and_name() {
        assert!(Policy::new("", "name").is_err());
        assert!(Policy::new("POL-1", "  ").is_err());
    }
}
