//! Taxonomía de cualidades estructurales de vulnerabilidad.
//!
//! Una cualidad es una propiedad estructural reconocible de una política que
//! habilita explotación. El set aprobado funciona como corpus upstream de
//! los stages de scanning y predicción: su fingerprint entra en los digests
//! de delta de toda entidad downstream.

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Estado de revisión humana de una cualidad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Draft,
    Approved,
    Rejected,
    Revised,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Draft => "draft",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
            ReviewStatus::Revised => "revised",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(ReviewStatus::Draft),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            "revised" => Some(ReviewStatus::Revised),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quality {
    pub quality_id: String,
    pub name: String,
    pub definition: String,
    /// Test de reconocimiento: cómo decidir si la cualidad está presente.
    pub recognition_test: String,
    /// Por qué la cualidad habilita explotación.
    pub exploitation_logic: String,
    #[serde(default)]
    pub canonical_examples: Vec<String>,
    #[serde(default = "default_review_status")]
    pub review_status: ReviewStatus,
    #[serde(default)]
    pub reviewer_notes: Option<String>,
}

fn default_review_status() -> ReviewStatus {
    ReviewStatus::Draft
}

impl Quality {
    pub fn new(quality_id: impl Into<String>,
               name: impl Into<String>,
               definition: impl Into<String>,
               recognition_test: impl Into<String>,
               exploitation_logic: impl Into<String>)
               -> Result<Self, DomainError> {
        let quality_id = quality_id.into();
        let name = name.into();
        let definition = definition.into();
        if quality_id.trim().is_empty() {
            return Err(DomainError::ValidationError("quality_id must not be empty".into()));
        }
        if name.trim().is_empty() {
            return Err(DomainError::ValidationError(format!("quality '{quality_id}' has an empty name")));
        }
        if definition.trim().is_empty() {
            return Err(DomainError::ValidationError(format!("quality '{quality_id}' has an empty definition")));
        }
        Ok(Self { quality_id,
                  name,
                  definition,
                  recognition_test: recognition_test.into(),
                  exploitation_logic: exploitation_logic.into(),
                  canonical_examples: Vec::new(),
                  review_status: ReviewStatus::Draft,
                  reviewer_notes: None })
    }

    pub fn with_review_status(mut self, status: ReviewStatus) -> Self {
        self.review_status = status;
        self
    }

    pub fn is_approved(&self) -> bool {
        self.review_status == ReviewStatus::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_requires_id_name_and_definition() {
        assert!(Quality::new("", "n", "d", "r", "e").is_err());
        assert!(Quality::new("Q1", " ", "d", "r", "e").is_err());
        assert!(Quality::new("Q1", "n", "", "r", "e").is_err());
        let q = Quality::new("Q1", "Discretionary pricing", "def", "test", "logic").expect("valid");
        assert_eq!(q.review_status, ReviewStatus::Draft);
        assert!(!q.is_approved());
    }

    #[test]
    fn review_status_roundtrip() {
        for s in [ReviewStatus::Draft, ReviewStatus::Approved, ReviewStatus::Rejected, ReviewStatus::Revised] {
            assert_eq!(ReviewStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ReviewStatus::parse("unknown"), None);
    }
}
