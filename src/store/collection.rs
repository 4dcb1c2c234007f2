use super::StoreResult;
use serde::{Serialize, de::DeserializeOwned};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// A record that can be stored in a [`Collection`]
///
/// The key accessors default to `None`; a record only exposes the keys it
/// actually carries, and a [`Filter`] on a key the record lacks never matches.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Collection name, also used as the file stem on disk
    const COLLECTION: &'static str;

    fn id(&self) -> Option<u64> {
        None
    }

    fn guild_id(&self) -> Option<u64> {
        None
    }

    fn user_id(&self) -> Option<u64> {
        None
    }
}

/// Query filter, every populated field must match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Filter {
    pub id: Option<u64>,
    pub guild_id: Option<u64>,
    pub user_id: Option<u64>,
}

impl Filter {
    /// Matches every record
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(id: u64) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn guild(guild_id: u64) -> Self {
        Self {
            guild_id: Some(guild_id),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn user(user_id: u64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    /// Matches a single user within a single guild
    #[must_use]
    pub fn member(guild_id: u64, user_id: u64) -> Self {
        Self {
            guild_id: Some(guild_id),
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    /// Check whether a record satisfies this filter
    #[must_use]
    pub fn matches<R: Record>(&self, record: &R) -> bool {
        fn field(wanted: Option<u64>, actual: Option<u64>) -> bool {
            wanted.is_none_or(|wanted| actual == Some(wanted))
        }

        field(self.id, record.id())
            && field(self.guild_id, record.guild_id())
            && field(self.user_id, record.user_id())
    }
}

/// A persisted collection of records of one kind
///
/// Mutations rewrite the backing YAML file while holding the collection lock,
/// so the file always reflects a consistent snapshot. A collection created with
/// [`Collection::in_memory`] never touches the disk.
pub struct Collection<R> {
    path: Option<PathBuf>,
    records: Mutex<Vec<R>>,
}

impl<R: Record> Collection<R> {
    /// Create a collection that lives only in memory
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            records: Mutex::new(Vec::new()),
        }
    }

    /// Open the collection stored in `dir`, starting empty if no file exists yet
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = dir.as_ref().join(format!("{}.yaml", R::COLLECTION));

        let records = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_yaml::from_str(&content)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };

        debug!(
            collection = R::COLLECTION,
            count = records.len(),
            "Loaded collection"
        );

        Ok(Self {
            path: Some(path),
            records: Mutex::new(records),
        })
    }

    /// All records matching the filter
    pub async fn find(&self, filter: &Filter) -> Vec<R> {
        self.records
            .lock()
            .await
            .iter()
            .filter(|record| filter.matches(*record))
            .cloned()
            .collect()
    }

    /// The first record matching the filter
    pub async fn find_one(&self, filter: &Filter) -> Option<R> {
        self.records
            .lock()
            .await
            .iter()
            .find(|record| filter.matches(*record))
            .cloned()
    }

    /// Append a record
    ///
    /// # Errors
    /// Returns an error if the collection cannot be written back to disk.
    pub async fn insert(&self, record: R) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        records.push(record);
        self.flush(&records).await
    }

    /// Apply `update` to the first record matching the filter
    ///
    /// Returns whether a record was found.
    ///
    /// # Errors
    /// Returns an error if the collection cannot be written back to disk.
    pub async fn update_one(
        &self,
        filter: &Filter,
        update: impl FnOnce(&mut R) + Send,
    ) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        let Some(record) = records.iter_mut().find(|record| filter.matches(&**record)) else {
            return Ok(false);
        };
        update(record);
        self.flush(&records).await?;
        Ok(true)
    }

    /// Delete the first record matching the filter, returning whether one was removed
    ///
    /// # Errors
    /// Returns an error if the collection cannot be written back to disk.
    pub async fn delete_one(&self, filter: &Filter) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        let Some(index) = records.iter().position(|record| filter.matches(record)) else {
            return Ok(false);
        };
        records.remove(index);
        self.flush(&records).await?;
        Ok(true)
    }

    /// Delete every record matching the filter, returning how many were removed
    ///
    /// # Errors
    /// Returns an error if the collection cannot be written back to disk.
    pub async fn delete_many(&self, filter: &Filter) -> StoreResult<usize> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|record| !filter.matches(record));
        let removed = before - records.len();
        if removed > 0 {
            self.flush(&records).await?;
        }
        Ok(removed)
    }

    /// Number of stored records
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    async fn flush(&self, records: &[R]) -> StoreResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        let yaml = serde_yaml::to_string(records)?;
        tokio::fs::write(path, yaml).await?;
        Ok(())
    }
}
