pub mod bm25;
pub mod community;
pub mod crypto;
pub mod hyper_index;
pub mod index;
pub mod repo;
pub mod snapshot;
pub mod wal;

pub use bm25::Bm25Index;
pub use community::{Community, CommunityEngine, CommunityLevel, CommunitySummarizer, CommunitySummary, DeterministicSummarizer};
pub use crypto::{AtRestCipher, CryptoError, InMemoryKmsKeyProvider, KmsHookCipher, KmsKeyProvider, NoOpCipher};
pub use hyper_index::HyperIndex;
pub use index::{AdjacencyGraph, LinearAnnIndex};
pub use repo::{RepoError, Repository, SnapshotView};
pub use snapshot::{SnapshotError, SnapshotManager};
pub use wal::{Wal, WalError};
