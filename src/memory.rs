//! Process-local [`FlowStore`] used by tests and by the demo server when no
//! database is configured. Nothing is durable.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use anyhow::anyhow;
use chrono::Utc;
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::identity::UserId;
use crate::models::{
    FlowChart, FlowDefinition, FlowId, FlowSummary, NewSnapshot, SnapshotId, VersionSnapshot,
    empty_document,
};
use crate::projection::{EdgeRow, NodeRow};
use crate::store::{FlowStore, ReplacePlan, ReplaceStep};

#[derive(Debug, Clone)]
struct FlowEntry {
    flow: FlowChart,
    nodes: Vec<NodeRow>,
    edges: Vec<EdgeRow>,
    snapshots: BTreeMap<i64, VersionSnapshot>,
}

#[derive(Debug, Default)]
pub struct MemoryFlowStore {
    flows: Mutex<HashMap<FlowId, FlowEntry>>,
    injected_failure: Mutex<Option<ReplaceStep>>,
}

impl MemoryFlowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next replace unit fail when it reaches `step`, after the
    /// earlier steps have been applied to the staged copy.
    pub fn fail_next_replace_at(&self, step: ReplaceStep) {
        *self
            .injected_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(step);
    }

    fn flows(&self) -> MutexGuard<'_, HashMap<FlowId, FlowEntry>> {
        self.flows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn take_injected_failure(&self) -> Option<ReplaceStep> {
        self.injected_failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}

fn flow_not_found(flow_id: FlowId) -> LibError {
    LibError::not_found("Flow not found", anyhow!("flow {} not found", flow_id))
}

fn push_snapshot(
    snapshots: &mut BTreeMap<i64, VersionSnapshot>,
    snapshot: &NewSnapshot,
) -> Result<SnapshotId> {
    if snapshots.contains_key(&snapshot.version_number) {
        return Err(LibError::duplicate_version(anyhow!(
            "flow {} already has version {}",
            snapshot.flow_id,
            snapshot.version_number
        )));
    }

    let id = SnapshotId(Uuid::new_v4());
    snapshots.insert(
        snapshot.version_number,
        VersionSnapshot {
            id,
            flow_id: snapshot.flow_id,
            version_number: snapshot.version_number,
            snapshot_data: snapshot.snapshot_data.clone(),
            created_by: snapshot.created_by,
            change_description: snapshot.change_description.clone(),
            created_at: Utc::now().naive_utc(),
        },
    );
    Ok(id)
}

fn ensure_unique<'a>(
    kind: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<()> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(LibError::invalid(
                "Identifiers must be unique within a flow",
                anyhow!("duplicate {} id {}", kind, id),
            ));
        }
    }
    Ok(())
}

fn apply_step(
    entry: &mut FlowEntry,
    plan: &ReplacePlan,
    step: ReplaceStep,
) -> Result<()> {
    match step {
        ReplaceStep::UpdateFlow => {
            if entry.flow.version != plan.expected_version {
                return Err(LibError::conflict(
                    plan.expected_version,
                    anyhow!(
                        "flow {} is at version {}, save expected {}",
                        plan.flow_id,
                        entry.flow.version,
                        plan.expected_version
                    ),
                ));
            }
            entry.flow.viewport = plan.viewport.clone();
            entry.flow.flow_settings = plan.flow_settings.clone();
            entry.flow.version = plan.new_version();
            entry.flow.updated_at = Utc::now().naive_utc();
        }
        ReplaceStep::DeleteNodes => entry.nodes.clear(),
        ReplaceStep::DeleteEdges => entry.edges.clear(),
        ReplaceStep::InsertNodes => {
            ensure_unique("node", plan.nodes.iter().map(|row| row.node_id.as_str()))?;
            entry.nodes.extend(plan.nodes.iter().cloned());
        }
        ReplaceStep::InsertEdges => {
            ensure_unique("edge", plan.edges.iter().map(|row| row.edge_id.as_str()))?;
            entry.edges.extend(plan.edges.iter().cloned());
        }
        ReplaceStep::AppendSnapshot => {
            push_snapshot(&mut entry.snapshots, &plan.snapshot)?;
        }
    }
    Ok(())
}

impl FlowStore for MemoryFlowStore {
    async fn create_flow(&self, owner: UserId, definition: &FlowDefinition) -> Result<FlowChart> {
        let now = Utc::now().naive_utc();
        let flow = FlowChart {
            id: FlowId(Uuid::new_v4()),
            owner_user_id: owner,
            name: definition.name.clone(),
            description: definition.description.clone(),
            viewport: empty_document(),
            flow_settings: empty_document(),
            is_public: definition.is_public,
            version: 1,
            created_at: now,
            updated_at: now,
        };
        self.flows().insert(
            flow.id,
            FlowEntry {
                flow: flow.clone(),
                nodes: Vec::new(),
                edges: Vec::new(),
                snapshots: BTreeMap::new(),
            },
        );
        Ok(flow)
    }

    async fn get_flow(&self, flow_id: FlowId) -> Result<Option<FlowChart>> {
        Ok(self.flows().get(&flow_id).map(|entry| entry.flow.clone()))
    }

    async fn list_flows(&self, owner: UserId, page: u32, limit: u32) -> Result<Vec<FlowSummary>> {
        let flows = self.flows();
        let mut owned = flows
            .values()
            .filter(|entry| entry.flow.owner_user_id == owner)
            .collect::<Vec<_>>();
        owned.sort_by(|a, b| {
            b.flow
                .updated_at
                .cmp(&a.flow.updated_at)
                .then_with(|| b.flow.id.0.cmp(&a.flow.id.0))
        });

        let offset = (page.saturating_sub(1) as usize).saturating_mul(limit as usize);
        Ok(owned
            .into_iter()
            .skip(offset)
            .take(limit as usize)
            .map(|entry| FlowSummary {
                id: entry.flow.id,
                owner_user_id: entry.flow.owner_user_id,
                name: entry.flow.name.clone(),
                description: entry.flow.description.clone(),
                is_public: entry.flow.is_public,
                version: entry.flow.version,
                created_at: entry.flow.created_at,
                updated_at: entry.flow.updated_at,
                node_count: entry.nodes.len() as i64,
                edge_count: entry.edges.len() as i64,
            })
            .collect())
    }

    async fn update_flow(&self, flow_id: FlowId, definition: &FlowDefinition) -> Result<FlowChart> {
        let mut flows = self.flows();
        let entry = flows.get_mut(&flow_id).ok_or_else(|| flow_not_found(flow_id))?;
        entry.flow.name = definition.name.clone();
        entry.flow.description = definition.description.clone();
        entry.flow.is_public = definition.is_public;
        entry.flow.updated_at = Utc::now().naive_utc();
        Ok(entry.flow.clone())
    }

    async fn delete_flow(&self, flow_id: FlowId) -> Result<bool> {
        Ok(self.flows().remove(&flow_id).is_some())
    }

    async fn load_rows(&self, flow_id: FlowId) -> Result<(Vec<NodeRow>, Vec<EdgeRow>)> {
        let flows = self.flows();
        let entry = flows.get(&flow_id).ok_or_else(|| flow_not_found(flow_id))?;
        Ok((entry.nodes.clone(), entry.edges.clone()))
    }

    async fn apply_replace(&self, plan: &ReplacePlan) -> Result<i64> {
        plan.check_consistency()?;
        let injected = self.take_injected_failure();
        let mut flows = self.flows();
        let mut staged = flows
            .get(&plan.flow_id)
            .cloned()
            .ok_or_else(|| flow_not_found(plan.flow_id))?;

        for step in ReplaceStep::ORDER {
            if injected == Some(step) {
                return Err(LibError::database(
                    step.public_message(),
                    anyhow!("injected failure at {}", step),
                ));
            }
            apply_step(&mut staged, plan, step)?;
            tracing::debug!(flow_id = %plan.flow_id, %step, "staged replace step");
        }

        flows.insert(plan.flow_id, staged);
        Ok(plan.new_version())
    }

    async fn append_snapshot(&self, snapshot: &NewSnapshot) -> Result<SnapshotId> {
        let mut flows = self.flows();
        let entry = flows
            .get_mut(&snapshot.flow_id)
            .ok_or_else(|| flow_not_found(snapshot.flow_id))?;
        push_snapshot(&mut entry.snapshots, snapshot)
    }

    async fn latest_snapshot(&self, flow_id: FlowId) -> Result<Option<VersionSnapshot>> {
        let flows = self.flows();
        let entry = flows.get(&flow_id).ok_or_else(|| flow_not_found(flow_id))?;
        Ok(entry.snapshots.values().next_back().cloned())
    }

    async fn list_snapshots(
        &self,
        flow_id: FlowId,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<VersionSnapshot>> {
        let flows = self.flows();
        let entry = flows.get(&flow_id).ok_or_else(|| flow_not_found(flow_id))?;
        Ok(entry
            .snapshots
            .values()
            .rev()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
