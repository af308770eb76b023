pub mod error;
pub mod generator;
pub mod prompt;
pub mod reviewer;
pub mod sandbox;
pub mod scorer;
pub mod syntax;

pub use error::AutoFixError;
pub use generator::{BestOfNGenerator, GenerationOutcome};
pub use reviewer::{summarize, FileDiff, FixSummary};
pub use sandbox::{InProcessSandbox, Sandbox};
pub use scorer::{Candidate, ScoredCandidate};
