//! vigil-analysis: lógica de negocio de los stages del pipeline.
//!
//! Cada stage implementa el contrato `StageLogic` del core contra el
//! `AnalysisStore` del dominio. El core no sabe nada de políticas ni
//! taxonomías; este crate es el único que une ambos mundos.

pub mod seed;
pub mod stages;

pub use seed::SeedCorpus;
pub use stages::standard_stages;
