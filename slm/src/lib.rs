pub mod lightweight;
pub mod ner;
pub mod registry;

pub use ner::{Entity, EntityExtractor, MockEntityExtractor};
pub use registry::{ModelRegistry, RegistryError, ResolvedModel};
