pub mod adaptive_confidence;
pub mod decision_store;
pub mod error;

pub use adaptive_confidence::AdaptiveConfidence;
pub use decision_store::{DecisionStore, RejectionPattern, Trend, MIN_DECISIONS_FOR_LEARNING};
pub use error::LearningError;
