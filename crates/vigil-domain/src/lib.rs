// vigil-domain library entry point
pub mod error;
pub mod policy;
pub mod prediction;
pub mod store;
pub mod taxonomy;

pub use error::DomainError;
pub use policy::{Policy, PolicyScore};
pub use prediction::{DetectionPattern, PatternPriority, Prediction};
pub use store::{AnalysisStore, InMemoryAnalysisStore};
pub use taxonomy::{Quality, ReviewStatus};
