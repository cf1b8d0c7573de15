use std::fmt;
use std::future::Future;

use serde_json::Value;

use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::identity::UserId;
use crate::models::{
    FlowChart, FlowDefinition, FlowId, FlowSummary, NewSnapshot, SnapshotId, VersionSnapshot,
};
use crate::projection::{EdgeRow, NodeRow};

/// Everything one save writes, staged up front and applied as a single unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplacePlan {
    pub flow_id: FlowId,
    /// Version the plan was computed against. A mismatch at apply time is a conflict.
    pub expected_version: i64,
    pub viewport: Value,
    pub flow_settings: Value,
    pub nodes: Vec<NodeRow>,
    pub edges: Vec<EdgeRow>,
    pub snapshot: NewSnapshot,
}

impl ReplacePlan {
    pub fn new_version(&self) -> i64 {
        self.expected_version + 1
    }

    /// The ledger entry must describe exactly the version this plan commits.
    pub fn check_consistency(&self) -> Result<()> {
        if self.snapshot.flow_id != self.flow_id
            || self.snapshot.version_number != self.new_version()
        {
            return Err(LibError::unknown(
                "Flow save could not be recorded",
                anyhow!(
                    "replace plan for flow {} at version {} carries snapshot {} for flow {}",
                    self.flow_id,
                    self.new_version(),
                    self.snapshot.version_number,
                    self.snapshot.flow_id
                ),
            ));
        }
        Ok(())
    }
}

/// The ordered steps of a replace unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplaceStep {
    UpdateFlow,
    DeleteNodes,
    DeleteEdges,
    InsertNodes,
    InsertEdges,
    AppendSnapshot,
}

impl ReplaceStep {
    pub const ORDER: [ReplaceStep; 6] = [
        ReplaceStep::UpdateFlow,
        ReplaceStep::DeleteNodes,
        ReplaceStep::DeleteEdges,
        ReplaceStep::InsertNodes,
        ReplaceStep::InsertEdges,
        ReplaceStep::AppendSnapshot,
    ];

    pub const fn public_message(self) -> &'static str {
        match self {
            ReplaceStep::UpdateFlow => "Failed to update flow",
            ReplaceStep::DeleteNodes => "Failed to replace flow nodes",
            ReplaceStep::DeleteEdges => "Failed to replace flow edges",
            ReplaceStep::InsertNodes => "Failed to write flow nodes",
            ReplaceStep::InsertEdges => "Failed to write flow edges",
            ReplaceStep::AppendSnapshot => "Failed to record flow version",
        }
    }
}

impl fmt::Display for ReplaceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplaceStep::UpdateFlow => "update_flow",
            ReplaceStep::DeleteNodes => "delete_nodes",
            ReplaceStep::DeleteEdges => "delete_edges",
            ReplaceStep::InsertNodes => "insert_nodes",
            ReplaceStep::InsertEdges => "insert_edges",
            ReplaceStep::AppendSnapshot => "append_snapshot",
        };
        f.write_str(name)
    }
}

/// Persistence for flows, their node/edge rows and the version ledger.
pub trait FlowStore: Send + Sync {
    fn create_flow(
        &self,
        owner: UserId,
        definition: &FlowDefinition,
    ) -> impl Future<Output = Result<FlowChart>> + Send;

    fn get_flow(&self, flow_id: FlowId) -> impl Future<Output = Result<Option<FlowChart>>> + Send;

    /// Flows owned by `owner`, most recently updated first.
    fn list_flows(
        &self,
        owner: UserId,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<FlowSummary>>> + Send;

    /// Updates name, description and visibility. Content and version are untouched.
    fn update_flow(
        &self,
        flow_id: FlowId,
        definition: &FlowDefinition,
    ) -> impl Future<Output = Result<FlowChart>> + Send;

    /// Removes the flow with its rows and ledger. Returns false if it did not exist.
    fn delete_flow(&self, flow_id: FlowId) -> impl Future<Output = Result<bool>> + Send;

    /// Current node and edge rows of a flow, in creation order.
    fn load_rows(
        &self,
        flow_id: FlowId,
    ) -> impl Future<Output = Result<(Vec<NodeRow>, Vec<EdgeRow>)>> + Send;

    /// Applies every [`ReplaceStep`] of the plan atomically and returns the new version.
    /// On any error nothing is written.
    fn apply_replace(&self, plan: &ReplacePlan) -> impl Future<Output = Result<i64>> + Send;

    /// Appends a ledger entry. Fails with `DuplicateVersion` if the version is taken.
    fn append_snapshot(
        &self,
        snapshot: &NewSnapshot,
    ) -> impl Future<Output = Result<SnapshotId>> + Send;

    fn latest_snapshot(
        &self,
        flow_id: FlowId,
    ) -> impl Future<Output = Result<Option<VersionSnapshot>>> + Send;

    /// Ledger entries, highest version first.
    fn list_snapshots(
        &self,
        flow_id: FlowId,
        offset: u64,
        limit: u32,
    ) -> impl Future<Output = Result<Vec<VersionSnapshot>>> + Send;
}
