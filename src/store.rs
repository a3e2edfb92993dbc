//! Versioned view over a flat entry namespace.
//!
//! Entries named `<prefix><N>` with a monotonically increasing integer `N`
//! form a versioned family. The store is a typed window onto either the
//! secret or the config side of the orchestrator; nothing is cached, every
//! call reflects current cluster state.

use crate::error::Result;
use crate::orchestrator::{Orchestrator, StoreEntry};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Which orchestrator store a [`VersionedStore`] operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Secret,
    Config,
}

/// Typed view over one versioned entry family.
#[derive(Clone)]
pub struct VersionedStore {
    orchestrator: Arc<dyn Orchestrator>,
    kind: StoreKind,
    prefix: String,
}

impl VersionedStore {
    /// Create a view for `prefix`; a trailing `.` is appended if missing.
    pub fn new(orchestrator: Arc<dyn Orchestrator>, kind: StoreKind, prefix: impl Into<String>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('.') {
            prefix.push('.');
        }
        Self {
            orchestrator,
            kind,
            prefix,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// All entries whose name starts with the prefix.
    pub async fn list(&self) -> Result<Vec<StoreEntry>> {
        match self.kind {
            StoreKind::Secret => self.orchestrator.list_secrets(Some(&self.prefix)).await,
            StoreKind::Config => self.orchestrator.list_configs(Some(&self.prefix)).await,
        }
    }

    /// Entries keyed by version. The version is the integer suffix after the
    /// last `.` in the entry name; entries without a non-negative integer
    /// suffix are ignored.
    pub async fn versions(&self) -> Result<BTreeMap<u64, StoreEntry>> {
        let mut versions = BTreeMap::new();
        for entry in self.list().await? {
            if let Some(version) = Self::version_suffix(&entry.name) {
                versions.insert(version, entry);
            }
        }
        Ok(versions)
    }

    /// The entry at the highest version, with its version.
    pub async fn latest_version(&self) -> Result<Option<(u64, StoreEntry)>> {
        Ok(self.versions().await?.into_iter().next_back())
    }

    /// The entry at the highest version.
    pub async fn latest(&self) -> Result<Option<StoreEntry>> {
        Ok(self.latest_version().await?.map(|(_, entry)| entry))
    }

    /// The version a new entry should be written at: `max(existing) + 1`,
    /// or 0 for an empty family.
    pub async fn next_version(&self) -> Result<u64> {
        Ok(self
            .latest_version()
            .await?
            .map_or(0, |(version, _)| version + 1))
    }

    /// Versions present in both families, with the entry pair at each.
    pub async fn common_versions(
        &self,
        other: &VersionedStore,
    ) -> Result<BTreeMap<u64, (StoreEntry, StoreEntry)>> {
        let mine = self.versions().await?;
        let mut theirs = other.versions().await?;

        Ok(mine
            .into_iter()
            .filter_map(|(version, entry)| {
                theirs
                    .remove(&version)
                    .map(|other_entry| (version, (entry, other_entry)))
            })
            .collect())
    }

    /// The entry name at a given version.
    pub fn name_at(&self, version: u64) -> String {
        format!("{}{}", self.prefix, version)
    }

    fn version_suffix(name: &str) -> Option<u64> {
        name.rsplit('.').next()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MemoryOrchestrator;
    use std::collections::HashMap;

    fn store(orchestrator: &Arc<MemoryOrchestrator>, prefix: &str) -> VersionedStore {
        VersionedStore::new(orchestrator.clone(), StoreKind::Secret, prefix)
    }

    #[tokio::test]
    async fn test_prefix_normalised() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        assert_eq!(store(&orchestrator, "ndi.dhparam").prefix(), "ndi.dhparam.");
        assert_eq!(store(&orchestrator, "ndi.dhparam.").prefix(), "ndi.dhparam.");
    }

    #[tokio::test]
    async fn test_empty_family() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        let vs = store(&orchestrator, "ndi.dhparam.");
        assert!(vs.latest().await.unwrap().is_none());
        assert_eq!(vs.next_version().await.unwrap(), 0);
        assert_eq!(vs.name_at(0), "ndi.dhparam.0");
    }

    #[tokio::test]
    async fn test_versions_skip_non_integer_suffix() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        for name in ["ndi.x.0", "ndi.x.3", "ndi.x.latest", "ndi.x.-1"] {
            orchestrator
                .create_secret(name, b"d", HashMap::new())
                .await
                .unwrap();
        }

        let vs = store(&orchestrator, "ndi.x.");
        let versions = vs.versions().await.unwrap();
        assert_eq!(versions.keys().copied().collect::<Vec<_>>(), vec![0, 3]);
        assert_eq!(vs.next_version().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_common_versions() {
        let orchestrator = Arc::new(MemoryOrchestrator::new());
        for name in ["s.key.0", "s.key.1", "s.key.2", "s.crt.1", "s.crt.2", "s.crt.4"] {
            orchestrator
                .create_secret(name, b"d", HashMap::new())
                .await
                .unwrap();
        }

        let keys = store(&orchestrator, "s.key.");
        let certs = store(&orchestrator, "s.crt.");
        let common = keys.common_versions(&certs).await.unwrap();
        assert_eq!(common.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(common[&2].0.name, "s.key.2");
        assert_eq!(common[&2].1.name, "s.crt.2");
    }
}
