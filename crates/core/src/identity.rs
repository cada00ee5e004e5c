use crate::error::IngestError;
use crate::models::FileHash;
use crate::traits::VectorStore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Content identity of a file: SHA-256 over the raw bytes only.
pub fn identify(bytes: &[u8]) -> FileHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    FileHash::from_digest_hex(format!("{:x}", hasher.finalize()))
}

pub fn digest_file(path: &Path) -> Result<FileHash, IngestError> {
    let bytes = fs::read(path)?;
    Ok(identify(&bytes))
}

pub fn should_reprocess(file_hash: &FileHash, known_hashes: &HashSet<FileHash>) -> bool {
    !known_hashes.contains(file_hash)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    New,
    Unchanged,
    /// Same path, different content than the last ingestion.
    Modified { previous: FileHash },
    /// Same path, now holding content already stored from another path.
    Superseded { previous: FileHash },
}

impl Freshness {
    pub fn should_reprocess(&self) -> bool {
        matches!(self, Self::New | Self::Modified { .. })
    }

    /// Hash whose records the stale policy applies to, if any.
    pub fn previous(&self) -> Option<&FileHash> {
        match self {
            Self::Modified { previous } | Self::Superseded { previous } => Some(previous),
            Self::New | Self::Unchanged => None,
        }
    }
}

pub struct DedupTracker<'a, S: VectorStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: VectorStore + ?Sized> DedupTracker<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn assess(
        &self,
        file_hash: &FileHash,
        source_path: &str,
    ) -> Result<Freshness, IngestError> {
        let known = self
            .store
            .contains_hash(file_hash)
            .await
            .map_err(|error| self.as_dependency(error))?;

        let previous = self
            .store
            .hash_for_source(source_path)
            .await
            .map_err(|error| self.as_dependency(error))?
            .filter(|previous| previous != file_hash);

        let freshness = match (known, previous) {
            (true, Some(previous)) => Freshness::Superseded { previous },
            (true, None) => Freshness::Unchanged,
            (false, Some(previous)) => Freshness::Modified { previous },
            (false, None) => Freshness::New,
        };
        debug!(file_hash = %file_hash.short(), source_path, ?freshness, "assessed file");
        Ok(freshness)
    }

    fn as_dependency(&self, error: IngestError) -> IngestError {
        match error {
            IngestError::Dependency(_) => error,
            other => IngestError::dependency(self.store.name(), other),
        }
    }
}
