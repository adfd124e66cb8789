//! In-memory contact store
//!
//! Records live behind a `RwLock` and are handed out as snapshots. A separate
//! per-contact async lock serializes multi-step operations (approve, recheck,
//! enrichment, stage transitions) on the same contact while leaving other
//! contacts free to proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;
use uuid::Uuid;

use super::types::{normalize_phone, ContactId, ContactRecord, LuciStatus, NewContact};
use crate::clock::SharedClock;

/// Error type for contact store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Contact not found: {0}")]
    NotFound(String),

    #[error("Contact already exists: {0}")]
    Duplicate(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type for contact store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared reference to ContactStore
pub type SharedContactStore = Arc<ContactStore>;

/// Held for the duration of a serialized per-contact operation.
pub(crate) type ContactLease = OwnedMutexGuard<()>;

/// Contact store keyed by contact id.
#[derive(Debug)]
pub struct ContactStore {
    records: RwLock<HashMap<ContactId, ContactRecord>>,
    locks: Mutex<HashMap<ContactId, Arc<tokio::sync::Mutex<()>>>>,
    clock: SharedClock,
}

impl ContactStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedContactStore {
        Arc::new(self)
    }

    /// Create a `RAW` record from ingested data.
    ///
    /// Phones are normalized; any phone that cannot be normalized rejects the
    /// whole contact.
    pub fn ingest(&self, new: NewContact) -> StoreResult<ContactRecord> {
        let phones = new
            .phones
            .iter()
            .map(|p| normalize_phone(p).ok_or_else(|| StoreError::InvalidPhone(p.clone())))
            .collect::<StoreResult<Vec<_>>>()?;
        let emails = new
            .emails
            .iter()
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        let id = new.id.unwrap_or_else(|| Uuid::new_v4().to_string());

        let record = ContactRecord::new(
            id.clone(),
            new.team_id,
            phones,
            emails,
            new.utc_offset_minutes,
            self.clock.now(),
        );

        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        if records.contains_key(&id) {
            return Err(StoreError::Duplicate(id));
        }
        records.insert(id.clone(), record.clone());
        debug!(contact_id = %id, team_id = %record.team_id, "contact ingested");
        Ok(record)
    }

    /// Snapshot of a record.
    pub fn get(&self, contact_id: &str) -> StoreResult<ContactRecord> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        records
            .get(contact_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(contact_id.to_string()))
    }

    /// Snapshot of a record that must belong to `team_id`.
    ///
    /// A record owned by another team is reported as not found.
    pub fn get_for_team(&self, contact_id: &str, team_id: &str) -> StoreResult<ContactRecord> {
        let record = self.get(contact_id)?;
        if record.team_id != team_id {
            return Err(StoreError::NotFound(contact_id.to_string()));
        }
        Ok(record)
    }

    /// Snapshots of a team's records, optionally filtered by status, ordered by id.
    pub fn list_team(
        &self,
        team_id: &str,
        status: Option<LuciStatus>,
    ) -> StoreResult<Vec<ContactRecord>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut out: Vec<ContactRecord> = records
            .values()
            .filter(|r| r.team_id == team_id)
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Ids of records still waiting on trace batch `queue_id`.
    pub fn pending_on_queue(&self, queue_id: &str) -> StoreResult<Vec<ContactId>> {
        let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut out: Vec<ContactId> = records
            .values()
            .filter(|r| r.status == LuciStatus::PendingTrace)
            .filter(|r| {
                r.trace
                    .as_ref()
                    .is_some_and(|t| t.queue_id == queue_id && !t.is_complete())
            })
            .map(|r| r.id.clone())
            .collect();
        out.sort();
        Ok(out)
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to a record in place and bump `updated_at`.
    pub(crate) fn update<R>(
        &self,
        contact_id: &str,
        f: impl FnOnce(&mut ContactRecord) -> R,
    ) -> StoreResult<R> {
        let now = self.clock.now();
        let mut records = self.records.write().map_err(|_| StoreError::LockPoisoned)?;
        let record = records
            .get_mut(contact_id)
            .ok_or_else(|| StoreError::NotFound(contact_id.to_string()))?;
        let out = f(record);
        record.updated_at = now;
        Ok(out)
    }

    /// Acquire the per-contact operation lock.
    ///
    /// Unknown ids are rejected before a lock is created, so the lock table
    /// never outgrows the record table.
    pub(crate) async fn lock_contact(&self, contact_id: &str) -> StoreResult<ContactLease> {
        {
            let records = self.records.read().map_err(|_| StoreError::LockPoisoned)?;
            if !records.contains_key(contact_id) {
                return Err(StoreError::NotFound(contact_id.to_string()));
            }
        }
        let lock = {
            let mut locks = self.locks.lock().map_err(|_| StoreError::LockPoisoned)?;
            locks
                .entry(contact_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        Ok(lock.lock_owned().await)
    }

    #[cfg(test)]
    pub(crate) fn lock_table_len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    fn store() -> ContactStore {
        ContactStore::new(SystemClock::shared())
    }

    fn new_contact(id: &str, team: &str) -> NewContact {
        NewContact {
            id: Some(id.into()),
            team_id: team.into(),
            phones: vec!["415-555-0123".into()],
            emails: vec![" Owner@Example.com ".into()],
            utc_offset_minutes: None,
        }
    }

    #[test]
    fn test_ingest_starts_raw_and_normalizes() {
        let store = store();
        let record = store.ingest(new_contact("c-1", "team-a")).unwrap();
        assert_eq!(record.status, LuciStatus::Raw);
        assert_eq!(record.phones, vec!["+14155550123".to_string()]);
        assert_eq!(record.emails, vec!["owner@example.com".to_string()]);
        assert!(record.score.is_none());
        assert!(record.cartridge.is_none());
    }

    #[test]
    fn test_ingest_assigns_uuid_when_missing() {
        let store = store();
        let mut contact = new_contact("ignored", "team-a");
        contact.id = None;
        let record = store.ingest(contact).unwrap();
        assert!(Uuid::parse_str(&record.id).is_ok());
    }

    #[test]
    fn test_duplicate_and_invalid_phone_rejected() {
        let store = store();
        store.ingest(new_contact("c-1", "team-a")).unwrap();
        assert!(matches!(
            store.ingest(new_contact("c-1", "team-a")),
            Err(StoreError::Duplicate(_))
        ));

        let mut bad = new_contact("c-2", "team-a");
        bad.phones = vec!["12".into()];
        assert!(matches!(store.ingest(bad), Err(StoreError::InvalidPhone(_))));
    }

    #[test]
    fn test_team_scoping() {
        let store = store();
        store.ingest(new_contact("c-1", "team-a")).unwrap();
        assert!(store.get_for_team("c-1", "team-a").is_ok());
        assert!(matches!(
            store.get_for_team("c-1", "team-b"),
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.list_team("team-a", None).unwrap().len(), 1);
        assert!(store.list_team("team-b", None).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_contact_gets_no_lock() {
        let store = store();
        store.ingest(new_contact("c-1", "team-a")).unwrap();

        for i in 0..50 {
            let err = store.lock_contact(&format!("missing-{i}")).await.unwrap_err();
            assert!(matches!(err, StoreError::NotFound(_)));
        }
        assert_eq!(store.lock_table_len(), 0);

        drop(store.lock_contact("c-1").await.unwrap());
        assert_eq!(store.lock_table_len(), 1);
    }

    #[tokio::test]
    async fn test_contact_lock_serializes_same_contact() {
        let store = Arc::new(store());
        store.ingest(new_contact("c-1", "team-a")).unwrap();

        let lease = store.lock_contact("c-1").await.unwrap();
        let contender = {
            let store = store.clone();
            tokio::spawn(async move { store.lock_contact("c-1").await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        assert!(!contender.is_finished());

        // Another contact is unaffected
        let _other = store.lock_contact("c-2").await.unwrap();

        drop(lease);
        contender.await.unwrap().unwrap();
    }
}
