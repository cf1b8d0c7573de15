//! Append-only history of full save payloads, one entry per flow version.

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::models::{FlowId, HistoryQuery, NewSnapshot, Paged, SnapshotId, VersionSnapshot};
use crate::store::FlowStore;

/// Ledger view over a [`FlowStore`]. Entries are never updated or removed here.
pub struct VersionLedger<'a, S> {
    store: &'a S,
}

impl<'a, S: FlowStore> VersionLedger<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn append(&self, snapshot: &NewSnapshot) -> Result<SnapshotId> {
        if snapshot.version_number < 1 {
            return Err(LibError::invalid(
                "Version numbers start at 1",
                anyhow!("invalid version number {}", snapshot.version_number),
            ));
        }
        self.store.append_snapshot(snapshot).await
    }

    pub async fn latest(&self, flow_id: FlowId) -> Result<VersionSnapshot> {
        self.store.latest_snapshot(flow_id).await?.ok_or_else(|| {
            LibError::not_found(
                "Flow has no saved versions",
                anyhow!("flow {} has no snapshots", flow_id),
            )
        })
    }

    /// One page of history, newest version first.
    pub async fn history(
        &self,
        flow_id: FlowId,
        query: &HistoryQuery,
    ) -> Result<Paged<VersionSnapshot>> {
        let (page, limit) = query.pagination();
        let offset = u64::from(page - 1) * u64::from(limit);
        let items = self.store.list_snapshots(flow_id, offset, limit).await?;
        Ok(Paged { page, limit, items })
    }
}
