use anyhow::Result;
use tokio::sync::broadcast;

use crate::error::ProfileError;
use crate::profile::types::FileRecord;
use crate::storage::{set_json, KvStore};

const PROGRESS_CAPACITY: usize = 128;

/// Multi-consumer progress channel for pack operations.
///
/// The producer fires percentage events and never waits: a send with no
/// subscribers is dropped, and a subscriber that falls behind loses the
/// oldest events rather than stalling the pack loop.
#[derive(Debug)]
pub struct PackProgress {
    tx: broadcast::Sender<u8>,
}

impl Default for PackProgress {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(PROGRESS_CAPACITY);
        Self { tx }
    }
}

impl PackProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<u8> {
        self.tx.subscribe()
    }

    pub(crate) fn emit(&self, percent: u8) {
        // No receivers is fine; progress is fire-and-forget.
        let _ = self.tx.send(percent);
    }
}

/// Upload every manifest record into the content store under its hash key,
/// reporting integer percentage progress after each file.
///
/// An empty manifest completes immediately with zero events. The first store
/// failure aborts the whole pack; records stored before it stay in place, no
/// compensating delete is attempted.
pub(crate) async fn pack_files(
    store: &dyn KvStore,
    progress: &PackProgress,
    files: &[FileRecord],
) -> Result<()> {
    let total = files.len();
    if total == 0 {
        log::debug!("Nothing to pack");
        return Ok(());
    }

    for (processed, file) in files.iter().enumerate() {
        set_json(store, &file.hash, file).await.map_err(|e| {
            e.context(ProfileError::PackFailed {
                hash: file.hash.clone(),
            })
        })?;

        let percent = ((processed + 1) * 100 / total) as u8;
        progress.emit(percent);
    }

    log::info!("Packed {} files", total);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    fn records(count: usize) -> Vec<FileRecord> {
        (0..count)
            .map(|i| FileRecord {
                relative_path: format!("file-{}.dat", i),
                size: i as u64,
                hash: format!("{:064x}", i),
            })
            .collect()
    }

    /// Store that fails on a chosen key.
    struct FailingStore {
        inner: MemoryStore,
        poison: String,
    }

    #[async_trait]
    impl KvStore for FailingStore {
        async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get_raw(key).await
        }

        async fn set_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
            if key == self.poison {
                anyhow::bail!("disk full");
            }
            self.inner.set_raw(key, value).await
        }
    }

    fn drain(rx: &mut broadcast::Receiver<u8>) -> Vec<u8> {
        let mut seen = Vec::new();
        while let Ok(p) = rx.try_recv() {
            seen.push(p);
        }
        seen
    }

    #[tokio::test]
    async fn progress_is_monotone_and_ends_at_100() {
        let store = MemoryStore::new();
        let progress = PackProgress::new();
        let mut rx = progress.subscribe();
        let files = records(7);

        pack_files(&store, &progress, &files).await.unwrap();

        let seen = drain(&mut rx);
        assert_eq!(seen.len(), 7);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 100);
        assert_eq!(store.len().await, 7);
    }

    #[tokio::test]
    async fn empty_manifest_emits_no_events() {
        let store = MemoryStore::new();
        let progress = PackProgress::new();
        let mut rx = progress.subscribe();

        pack_files(&store, &progress, &[]).await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn store_failure_aborts_and_keeps_prior_entries() {
        let files = records(5);
        let store = FailingStore {
            inner: MemoryStore::new(),
            poison: files[2].hash.clone(),
        };
        let progress = PackProgress::new();

        let err = pack_files(&store, &progress, &files).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<ProfileError>(),
            Some(ProfileError::PackFailed { hash }) if *hash == files[2].hash
        ));
        // The two entries uploaded before the failure are still there.
        assert!(store.inner.contains(&files[0].hash).await);
        assert!(store.inner.contains(&files[1].hash).await);
        assert!(!store.inner.contains(&files[2].hash).await);
    }

    #[tokio::test]
    async fn packing_without_subscribers_does_not_fail() {
        let store = MemoryStore::new();
        let progress = PackProgress::new();

        pack_files(&store, &progress, &records(3)).await.unwrap();
        assert_eq!(store.len().await, 3);
    }
}
