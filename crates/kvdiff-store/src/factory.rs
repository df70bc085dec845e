use std::sync::Arc;

use async_trait::async_trait;
use kvdiff_index::{Index, IndexFactory, IndexResult};
use kvdiff_types::Side;
use redb::Database;
use tracing::warn;

use crate::config::PersistentIndexConfig;
use crate::error::StoreResult;
use crate::persistent::PersistentIndex;

/// Creates persistent indexes in `<prefix>.reference` and `<prefix>.current`.
///
/// Every created index starts from an empty baseline: whatever a previous
/// diff left in the partition is reset.
#[derive(Clone)]
pub struct PersistentIndexFactory {
    db: Arc<Database>,
    prefix: String,
    config: PersistentIndexConfig,
}

impl PersistentIndexFactory {
    /// Create a factory with the default index configuration.
    pub fn new(db: Arc<Database>, prefix: impl Into<String>) -> Self {
        Self {
            db,
            prefix: prefix.into(),
            config: PersistentIndexConfig::default(),
        }
    }

    /// Use `config` for every created index.
    pub fn with_config(mut self, config: PersistentIndexConfig) -> Self {
        self.config = config;
        self
    }

    /// The partition name used for `side`.
    pub fn partition_for(&self, side: Side) -> String {
        format!("{}.{}", self.prefix, side)
    }
}

impl std::fmt::Debug for PersistentIndexFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentIndexFactory")
            .field("prefix", &self.prefix)
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl IndexFactory for PersistentIndexFactory {
    async fn create(&self, side: Side, records_values: bool) -> IndexResult<Arc<dyn Index>> {
        let index = PersistentIndex::open_with_config(
            Arc::clone(&self.db),
            &self.partition_for(side),
            records_values,
            self.config.clone(),
        )
        .await?;
        let reset = index.reset().await;
        close_on_error(&index, reset).await?;
        Ok(Arc::new(index))
    }
}

/// Close `index` before handing back a failed preparation step, so its
/// seen writer does not outlive the error.
async fn close_on_error<T>(index: &PersistentIndex, result: StoreResult<T>) -> IndexResult<T> {
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            if let Err(close_err) = index.close().await {
                warn!(partition = %index.partition(), error = %close_err, "failed to close index");
            }
            Err(err.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::persistent::SessionState;
    use kvdiff_index::{Feed, IndexError};
    use kvdiff_types::KeyValue;

    #[tokio::test]
    async fn created_indexes_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("factory.redb")).unwrap());
        let factory = PersistentIndexFactory::new(Arc::clone(&db), "diff");
        assert_eq!(factory.partition_for(Side::Current), "diff.current");

        let first = factory.create(Side::Reference, true).await.unwrap();
        first
            .index(Feed::buffered(vec![KeyValue::new("a", "1")]), None)
            .await
            .unwrap();
        first.close().await.unwrap();

        let second = factory.create(Side::Reference, true).await.unwrap();
        let pairs = second.key_values().await.unwrap().collect().await.unwrap();
        assert!(pairs.is_empty());
        assert!(second.records_values());
        second.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_preparation_closes_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("prepare.redb")).unwrap());
        let index = PersistentIndex::open(db, "prepare", true).await.unwrap();

        let failed: StoreResult<()> = Err(StoreError::InvalidPartition {
            name: "prepare".to_string(),
            reason: "simulated",
        });
        let err = close_on_error(&index, failed).await.unwrap_err();

        assert!(matches!(err, IndexError::Backend(_)));
        assert_eq!(index.state(), SessionState::Closed);
        assert!(!index.writer_running());
    }

    #[tokio::test]
    async fn successful_preparation_keeps_the_index_open() {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::create(dir.path().join("prepare.redb")).unwrap());
        let index = PersistentIndex::open(db, "prepare", true).await.unwrap();

        close_on_error(&index, Ok(())).await.unwrap();
        assert_eq!(index.state(), SessionState::Open);
        index.close().await.unwrap();
    }
}
