//! The relational store contract and its in-memory reference
//! implementation.
//!
//! The relational store is an external collaborator: this subsystem only
//! reads rows, the change feed, and the joined view through this trait.
//! The in-memory implementation backs tests and local mode; production
//! deployments implement the trait against their database.

use crate::models::{Company, Prospect};
use crate::sync::error::SyncResult;
use crate::sync::events::{ChangeEvent, ChangeOp, SourceTable};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// Read-only view of the relational source of truth
#[async_trait]
pub trait RelationalStore: Send + Sync {
    /// Fetch a company row
    async fn company(&self, id: u64) -> SyncResult<Option<Company>>;

    /// Fetch a prospect row
    async fn prospect(&self, id: u64) -> SyncResult<Option<Prospect>>;

    /// Every prospect referencing a company
    async fn prospects_for_company(&self, company_id: u64) -> SyncResult<Vec<Prospect>>;

    /// Ordered change feed: events strictly after `position`, up to `limit`
    async fn changes_since(&self, position: u64, limit: usize) -> SyncResult<Vec<ChangeEvent>>;

    /// Highest `updated_at` across both tables, None when empty
    async fn max_updated_at(&self) -> SyncResult<Option<DateTime<Utc>>>;

    /// The full joined view: every prospect paired with its company.
    /// Prospects whose company row is missing are omitted, so a rebuild
    /// treats them as deleted.
    async fn denormalized_view(&self) -> SyncResult<Vec<(Prospect, Company)>>;
}

/// In-memory relational store (for local mode and testing). Mutations
/// append to an ordered change log with monotonically increasing
/// positions, emulating a logical replication slot.
#[derive(Clone)]
pub struct InMemoryRelationalStore {
    companies: Arc<DashMap<u64, Company>>,
    prospects: Arc<DashMap<u64, Prospect>>,
    log: Arc<RwLock<ChangeLog>>,
}

struct ChangeLog {
    events: Vec<ChangeEvent>,
    next_position: u64,
}

impl InMemoryRelationalStore {
    pub fn new() -> Self {
        Self {
            companies: Arc::new(DashMap::new()),
            prospects: Arc::new(DashMap::new()),
            log: Arc::new(RwLock::new(ChangeLog {
                events: Vec::new(),
                next_position: 1,
            })),
        }
    }

    fn record(&self, table: SourceTable, op: ChangeOp, row_key: u64, occurred_at: DateTime<Utc>) {
        let mut log = self.log.write();
        let position = log.next_position;
        log.next_position += 1;
        log.events.push(ChangeEvent {
            table,
            op,
            row_key,
            position,
            occurred_at,
        });
    }

    /// Insert or update a company row, appending to the change log
    pub fn upsert_company(&self, company: Company) {
        let op = if self.companies.contains_key(&company.id) {
            ChangeOp::Update
        } else {
            ChangeOp::Insert
        };
        self.record(SourceTable::Company, op, company.id, company.updated_at);
        self.companies.insert(company.id, company);
    }

    /// Insert or update a prospect row, appending to the change log
    pub fn upsert_prospect(&self, prospect: Prospect) {
        let op = if self.prospects.contains_key(&prospect.id) {
            ChangeOp::Update
        } else {
            ChangeOp::Insert
        };
        self.record(SourceTable::Prospect, op, prospect.id, prospect.updated_at);
        self.prospects.insert(prospect.id, prospect);
    }

    /// Delete a company row
    pub fn delete_company(&self, id: u64, at: DateTime<Utc>) {
        self.companies.remove(&id);
        self.record(SourceTable::Company, ChangeOp::Delete, id, at);
    }

    /// Delete a prospect row
    pub fn delete_prospect(&self, id: u64, at: DateTime<Utc>) {
        self.prospects.remove(&id);
        self.record(SourceTable::Prospect, ChangeOp::Delete, id, at);
    }

    /// Current head of the change log
    pub fn head_position(&self) -> u64 {
        self.log.read().next_position - 1
    }
}

impl Default for InMemoryRelationalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn company(&self, id: u64) -> SyncResult<Option<Company>> {
        Ok(self.companies.get(&id).map(|entry| entry.clone()))
    }

    async fn prospect(&self, id: u64) -> SyncResult<Option<Prospect>> {
        Ok(self.prospects.get(&id).map(|entry| entry.clone()))
    }

    async fn prospects_for_company(&self, company_id: u64) -> SyncResult<Vec<Prospect>> {
        let mut prospects: Vec<Prospect> = self
            .prospects
            .iter()
            .filter(|entry| entry.value().company_id == company_id)
            .map(|entry| entry.value().clone())
            .collect();
        prospects.sort_by_key(|p| p.id);
        Ok(prospects)
    }

    async fn changes_since(&self, position: u64, limit: usize) -> SyncResult<Vec<ChangeEvent>> {
        let log = self.log.read();
        Ok(log
            .events
            .iter()
            .filter(|event| event.position > position)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn max_updated_at(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let company_max = self.companies.iter().map(|e| e.value().updated_at).max();
        let prospect_max = self.prospects.iter().map(|e| e.value().updated_at).max();
        Ok(company_max.max(prospect_max))
    }

    async fn denormalized_view(&self) -> SyncResult<Vec<(Prospect, Company)>> {
        let mut rows = Vec::with_capacity(self.prospects.len());
        for entry in self.prospects.iter() {
            let prospect = entry.value().clone();
            if let Some(company) = self.companies.get(&prospect.company_id) {
                rows.push((prospect, company.clone()));
            }
        }
        rows.sort_by_key(|(p, _)| p.id);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, secs).unwrap()
    }

    #[tokio::test]
    async fn test_change_log_positions_are_monotonic() {
        let store = InMemoryRelationalStore::new();

        store.upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        store.upsert_prospect(Prospect::new(1, 1, "Jo", "Doe").with_updated_at(at(2)));
        store.delete_prospect(1, at(3));

        let events = store.changes_since(0, 10).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(events.windows(2).all(|w| w[0].position < w[1].position));

        let tail = store.changes_since(events[1].position, 10).await.unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].op, ChangeOp::Delete);
    }

    #[tokio::test]
    async fn test_denormalized_view_omits_dangling_prospects() {
        let store = InMemoryRelationalStore::new();

        store.upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        store.upsert_prospect(Prospect::new(10, 1, "Jo", "Doe").with_updated_at(at(2)));
        store.upsert_prospect(Prospect::new(11, 99, "No", "Company").with_updated_at(at(3)));

        let view = store.denormalized_view().await.unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].0.id, 10);
    }

    #[tokio::test]
    async fn test_max_updated_at_spans_both_tables() {
        let store = InMemoryRelationalStore::new();
        assert_eq!(store.max_updated_at().await.unwrap(), None);

        store.upsert_company(Company::new(1, "Acme").with_updated_at(at(1)));
        store.upsert_prospect(Prospect::new(1, 1, "Jo", "Doe").with_updated_at(at(5)));

        assert_eq!(store.max_updated_at().await.unwrap(), Some(at(5)));
    }
}
