//! Deployment record storage

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::DeckhandError;
use crate::filesys::file::File;
use crate::models::deployment::{
    DeploymentRecord, DeploymentStatus, NewDeployment, OwnerRef, OwnerStatus, StatusKey,
};
use crate::utils::generate_uuid;

/// Persistence of deployment records and owner status
#[async_trait]
pub trait DeploymentRepository: Send + Sync {
    /// Insert a record, assigning its id and creation time
    async fn insert(&self, new: NewDeployment) -> Result<DeploymentRecord, DeckhandError>;

    /// Get a record by id
    async fn find(&self, id: &str) -> Result<DeploymentRecord, DeckhandError>;

    /// Records of an owner, newest first
    async fn list_by_owner(&self, owner: &OwnerRef) -> Result<Vec<DeploymentRecord>, DeckhandError>;

    /// Set the status of a record; finished states stamp `finished_at`
    async fn update_status(&self, id: &str, status: DeploymentStatus) -> Result<(), DeckhandError>;

    /// Overwrite title and description of a record
    async fn update_details(
        &self,
        id: &str,
        title: &str,
        description: &str,
    ) -> Result<(), DeckhandError>;

    /// Delete a record
    async fn remove(&self, id: &str) -> Result<(), DeckhandError>;

    /// Delete all records of an owner, returning how many were removed
    async fn remove_by_owner(&self, owner: &OwnerRef) -> Result<usize, DeckhandError>;

    /// Aggregate status; owners never seen are idle
    async fn owner_status(&self, key: &StatusKey) -> Result<OwnerStatus, DeckhandError>;

    async fn set_owner_status(&self, key: &StatusKey, status: OwnerStatus) -> Result<(), DeckhandError>;
}

/// Records and owner statuses, as held in memory and written to disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Ledger {
    /// Records in insertion order
    #[serde(default)]
    records: Vec<DeploymentRecord>,

    /// Keyed by the display form of the [`StatusKey`]
    #[serde(default)]
    statuses: BTreeMap<String, OwnerStatus>,
}

impl Ledger {
    fn insert(&mut self, new: NewDeployment) -> DeploymentRecord {
        let record = DeploymentRecord {
            id: generate_uuid(),
            owner: new.owner,
            title: new.title,
            description: new.description,
            status: new.status,
            log_path: new.log_path,
            error_message: new.error_message,
            created_at: Utc::now(),
            finished_at: None,
        };
        self.records.push(record.clone());
        record
    }

    fn find(&self, id: &str) -> Result<&DeploymentRecord, DeckhandError> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| DeckhandError::NotFound(format!("deployment {}", id)))
    }

    fn find_mut(&mut self, id: &str) -> Result<&mut DeploymentRecord, DeckhandError> {
        self.records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DeckhandError::NotFound(format!("deployment {}", id)))
    }

    fn list_by_owner(&self, owner: &OwnerRef) -> Vec<DeploymentRecord> {
        // Reverse insertion order first so that equal timestamps keep the newest on top
        let mut records: Vec<DeploymentRecord> = self
            .records
            .iter()
            .rev()
            .filter(|r| &r.owner == owner)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    fn update_status(&mut self, id: &str, status: DeploymentStatus) -> Result<(), DeckhandError> {
        let record = self.find_mut(id)?;
        record.status = status;
        if status.is_finished() {
            record.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    fn update_details(&mut self, id: &str, title: &str, description: &str) -> Result<(), DeckhandError> {
        let record = self.find_mut(id)?;
        record.title = title.to_string();
        record.description = description.to_string();
        Ok(())
    }

    fn remove(&mut self, id: &str) {
        self.records.retain(|r| r.id != id);
    }

    fn remove_by_owner(&mut self, owner: &OwnerRef) -> usize {
        let before = self.records.len();
        self.records.retain(|r| &r.owner != owner);
        before - self.records.len()
    }

    fn owner_status(&self, key: &StatusKey) -> OwnerStatus {
        self.statuses.get(&key.to_string()).copied().unwrap_or_default()
    }

    fn set_owner_status(&mut self, key: &StatusKey, status: OwnerStatus) {
        self.statuses.insert(key.to_string(), status);
    }
}

/// In-memory repository
#[derive(Default)]
pub struct MemoryRepository {
    inner: RwLock<Ledger>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, Ledger> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Ledger> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeploymentRepository for MemoryRepository {
    async fn insert(&self, new: NewDeployment) -> Result<DeploymentRecord, DeckhandError> {
        Ok(self.write().insert(new))
    }

    async fn find(&self, id: &str) -> Result<DeploymentRecord, DeckhandError> {
        self.read().find(id).cloned()
    }

    async fn list_by_owner(&self, owner: &OwnerRef) -> Result<Vec<DeploymentRecord>, DeckhandError> {
        Ok(self.read().list_by_owner(owner))
    }

    async fn update_status(&self, id: &str, status: DeploymentStatus) -> Result<(), DeckhandError> {
        self.write().update_status(id, status)
    }

    async fn update_details(
        &self,
        id: &str,
        title: &str,
        description: &str,
    ) -> Result<(), DeckhandError> {
        self.write().update_details(id, title, description)
    }

    async fn remove(&self, id: &str) -> Result<(), DeckhandError> {
        self.write().remove(id);
        Ok(())
    }

    async fn remove_by_owner(&self, owner: &OwnerRef) -> Result<usize, DeckhandError> {
        Ok(self.write().remove_by_owner(owner))
    }

    async fn owner_status(&self, key: &StatusKey) -> Result<OwnerStatus, DeckhandError> {
        Ok(self.read().owner_status(key))
    }

    async fn set_owner_status(&self, key: &StatusKey, status: OwnerStatus) -> Result<(), DeckhandError> {
        self.write().set_owner_status(key, status);
        Ok(())
    }
}

/// Repository kept in a JSON file, so history and retention span process runs
///
/// Every change rewrites the file atomically; a change whose write fails is not
/// applied in memory either.
pub struct JsonFileRepository {
    file: File,
    ledger: Mutex<Ledger>,
}

impl JsonFileRepository {
    /// Open the repository stored in `file`, empty if the file does not exist yet
    pub async fn open(file: File) -> Result<Self, DeckhandError> {
        let ledger = if file.exists().await {
            file.read_json::<Ledger>().await?
        } else {
            Ledger::default()
        };
        debug!(
            "Opened deployment repository {} with {} records",
            file.path().display(),
            ledger.records.len()
        );
        Ok(Self {
            file,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    async fn change<T>(
        &self,
        apply: impl FnOnce(&mut Ledger) -> Result<T, DeckhandError>,
    ) -> Result<T, DeckhandError> {
        let mut ledger = self.ledger.lock().await;
        let mut next = ledger.clone();
        let result = apply(&mut next)?;
        self.file.write_json(&next).await?;
        *ledger = next;
        Ok(result)
    }
}

#[async_trait]
impl DeploymentRepository for JsonFileRepository {
    async fn insert(&self, new: NewDeployment) -> Result<DeploymentRecord, DeckhandError> {
        self.change(|ledger| Ok(ledger.insert(new))).await
    }

    async fn find(&self, id: &str) -> Result<DeploymentRecord, DeckhandError> {
        self.ledger.lock().await.find(id).cloned()
    }

    async fn list_by_owner(&self, owner: &OwnerRef) -> Result<Vec<DeploymentRecord>, DeckhandError> {
        Ok(self.ledger.lock().await.list_by_owner(owner))
    }

    async fn update_status(&self, id: &str, status: DeploymentStatus) -> Result<(), DeckhandError> {
        self.change(|ledger| ledger.update_status(id, status)).await
    }

    async fn update_details(
        &self,
        id: &str,
        title: &str,
        description: &str,
    ) -> Result<(), DeckhandError> {
        self.change(|ledger| ledger.update_details(id, title, description))
            .await
    }

    async fn remove(&self, id: &str) -> Result<(), DeckhandError> {
        self.change(|ledger| {
            ledger.remove(id);
            Ok(())
        })
        .await
    }

    async fn remove_by_owner(&self, owner: &OwnerRef) -> Result<usize, DeckhandError> {
        self.change(|ledger| Ok(ledger.remove_by_owner(owner))).await
    }

    async fn owner_status(&self, key: &StatusKey) -> Result<OwnerStatus, DeckhandError> {
        Ok(self.ledger.lock().await.owner_status(key))
    }

    async fn set_owner_status(&self, key: &StatusKey, status: OwnerStatus) -> Result<(), DeckhandError> {
        self.change(|ledger| {
            ledger.set_owner_status(key, status);
            Ok(())
        })
        .await
    }
}
