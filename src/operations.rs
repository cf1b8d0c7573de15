use std::sync::Arc;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document;
use crate::error::{LibError, Result};
use crate::export::{self, ExportOrder, ExportedFlow, FlowChartDetail};
use crate::identity::UserId;
use crate::ledger::VersionLedger;
use crate::models::{
    CreateFlowPayload, ExportQuery, FlowChart, FlowDocument, FlowId, FlowSummary, HistoryQuery,
    ListFlowsQuery, NewSnapshot, Paged, SaveFlowResponse, UpdateFlowPayload, VersionSnapshot,
};
use crate::permissions::{self, FlowAccess};
use crate::projection;
use crate::store::{FlowStore, ReplacePlan};

/// MCP-friendly high-level flow actions.
///
/// Callers must provide a trusted `actor` sourced from validated auth/session state,
/// not from model/tool arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FlowOperation {
    Create {
        payload: CreateFlowPayload,
    },
    Get {
        flow_id: FlowId,
    },
    List {
        #[serde(default)]
        query: ListFlowsQuery,
    },
    Update {
        flow_id: FlowId,
        payload: UpdateFlowPayload,
    },
    Delete {
        flow_id: FlowId,
    },
    Save {
        flow_id: FlowId,
        payload: Value,
    },
    Export {
        flow_id: FlowId,
        #[serde(default)]
        query: ExportQuery,
    },
    History {
        flow_id: FlowId,
        #[serde(default)]
        query: HistoryQuery,
    },
    LatestVersion {
        flow_id: FlowId,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum FlowOperationResult {
    Flow {
        flow: FlowChart,
    },
    FlowDetail {
        flow: FlowChartDetail,
    },
    FlowsPage {
        page: u32,
        limit: u32,
        items: Vec<FlowSummary>,
    },
    Saved {
        version: i64,
    },
    Exported {
        flow: ExportedFlow,
    },
    History {
        page: u32,
        limit: u32,
        items: Vec<VersionSnapshot>,
    },
    Version {
        snapshot: VersionSnapshot,
    },
    Deleted,
}

/// Entry point for every flow read and write. Holds no state beyond the store.
pub struct FlowOperations<S> {
    store: Arc<S>,
}

impl<S> Clone for FlowOperations<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: FlowStore> FlowOperations<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub async fn execute(
        &self,
        actor: UserId,
        operation: FlowOperation,
    ) -> Result<FlowOperationResult> {
        match operation {
            FlowOperation::Create { payload } => {
                let flow = self.create_flow(actor, payload).await?;
                Ok(FlowOperationResult::Flow { flow })
            }
            FlowOperation::Get { flow_id } => {
                let flow = self.get_flow(actor, flow_id).await?;
                Ok(FlowOperationResult::FlowDetail { flow })
            }
            FlowOperation::List { query } => {
                let page = self.list_flows(actor, query).await?;
                Ok(FlowOperationResult::FlowsPage {
                    page: page.page,
                    limit: page.limit,
                    items: page.items,
                })
            }
            FlowOperation::Update { flow_id, payload } => {
                let flow = self.update_flow(actor, flow_id, payload).await?;
                Ok(FlowOperationResult::Flow { flow })
            }
            FlowOperation::Delete { flow_id } => {
                self.delete_flow(actor, flow_id).await?;
                Ok(FlowOperationResult::Deleted)
            }
            FlowOperation::Save { flow_id, payload } => {
                let saved = self.save_flow(actor, flow_id, payload).await?;
                Ok(FlowOperationResult::Saved {
                    version: saved.version,
                })
            }
            FlowOperation::Export { flow_id, query } => {
                let flow = self.export_flow(actor, flow_id, query).await?;
                Ok(FlowOperationResult::Exported { flow })
            }
            FlowOperation::History { flow_id, query } => {
                let page = self.history(actor, flow_id, query).await?;
                Ok(FlowOperationResult::History {
                    page: page.page,
                    limit: page.limit,
                    items: page.items,
                })
            }
            FlowOperation::LatestVersion { flow_id } => {
                let snapshot = self.latest_version(actor, flow_id).await?;
                Ok(FlowOperationResult::Version { snapshot })
            }
        }
    }

    pub async fn create_flow(&self, actor: UserId, payload: CreateFlowPayload) -> Result<FlowChart> {
        let definition = payload.normalize()?;
        let flow = self.store.create_flow(actor, &definition).await?;
        tracing::info!(flow_id = %flow.id, owner = %actor, "created flow");
        Ok(flow)
    }

    pub async fn get_flow(&self, actor: UserId, flow_id: FlowId) -> Result<FlowChartDetail> {
        let flow = self.load_flow(actor, flow_id, FlowAccess::Read).await?;
        let document = self.current_document(&flow).await?;
        Ok(export::flow_detail(flow, document))
    }

    pub async fn list_flows(
        &self,
        actor: UserId,
        query: ListFlowsQuery,
    ) -> Result<Paged<FlowSummary>> {
        let (page, limit) = query.pagination();
        let items = self.store.list_flows(actor, page, limit).await?;
        Ok(Paged { page, limit, items })
    }

    pub async fn update_flow(
        &self,
        actor: UserId,
        flow_id: FlowId,
        payload: UpdateFlowPayload,
    ) -> Result<FlowChart> {
        self.load_flow(actor, flow_id, FlowAccess::Write).await?;
        let definition = payload.normalize()?;
        self.store.update_flow(flow_id, &definition).await
    }

    pub async fn delete_flow(&self, actor: UserId, flow_id: FlowId) -> Result<()> {
        self.load_flow(actor, flow_id, FlowAccess::Write).await?;
        if !self.store.delete_flow(flow_id).await? {
            return Err(LibError::not_found(
                "Flow not found",
                anyhow!("flow {} disappeared before delete", flow_id),
            ));
        }
        tracing::info!(flow_id = %flow_id, "deleted flow");
        Ok(())
    }

    /// Replaces the whole content of a flow with `payload` and records it as a new version.
    ///
    /// Existence, ownership and document shape are all checked before the store is
    /// touched. The write itself is one unit: either the flow row, nodes, edges and
    /// ledger entry all change, or none do.
    pub async fn save_flow(
        &self,
        actor: UserId,
        flow_id: FlowId,
        payload: Value,
    ) -> Result<SaveFlowResponse> {
        let flow = self.load_flow(actor, flow_id, FlowAccess::Write).await?;
        let document = document::validate_document(&payload)?;
        let rows = projection::project(flow_id, &document);
        let (node_count, edge_count) = (rows.nodes.len(), rows.edges.len());

        let plan = ReplacePlan {
            flow_id,
            expected_version: flow.version,
            viewport: document.viewport,
            flow_settings: document.flow_settings,
            nodes: rows.nodes,
            edges: rows.edges,
            snapshot: NewSnapshot {
                flow_id,
                version_number: flow.version + 1,
                change_description: document.change_description,
                snapshot_data: payload,
                created_by: actor,
            },
        };

        let version = self.store.apply_replace(&plan).await.inspect_err(|err| {
            tracing::warn!(
                flow_id = %flow_id,
                expected_version = flow.version,
                code = err.code,
                "flow save rolled back"
            );
        })?;
        tracing::info!(
            flow_id = %flow_id,
            version,
            nodes = node_count,
            edges = edge_count,
            "flow saved"
        );

        Ok(SaveFlowResponse {
            message: "Flow saved successfully".to_string(),
            version,
        })
    }

    /// Current content in the editor's shape. Never consults the ledger.
    pub async fn export_flow(
        &self,
        actor: UserId,
        flow_id: FlowId,
        query: ExportQuery,
    ) -> Result<ExportedFlow> {
        let flow = self.load_flow(actor, flow_id, FlowAccess::Read).await?;
        let document = self.current_document(&flow).await?;
        Ok(export::export_document(
            document,
            ExportOrder::from_sorted_flag(query.sorted),
        ))
    }

    pub async fn history(
        &self,
        actor: UserId,
        flow_id: FlowId,
        query: HistoryQuery,
    ) -> Result<Paged<VersionSnapshot>> {
        self.load_flow(actor, flow_id, FlowAccess::Read).await?;
        VersionLedger::new(self.store.as_ref())
            .history(flow_id, &query)
            .await
    }

    pub async fn latest_version(&self, actor: UserId, flow_id: FlowId) -> Result<VersionSnapshot> {
        self.load_flow(actor, flow_id, FlowAccess::Read).await?;
        VersionLedger::new(self.store.as_ref()).latest(flow_id).await
    }

    async fn current_document(&self, flow: &FlowChart) -> Result<FlowDocument> {
        let (nodes, edges) = self.store.load_rows(flow.id).await?;
        Ok(projection::reconstruct_document(flow, nodes, edges))
    }

    async fn load_flow(
        &self,
        actor: UserId,
        flow_id: FlowId,
        access: FlowAccess,
    ) -> Result<FlowChart> {
        let flow = self.store.get_flow(flow_id).await?.ok_or_else(|| {
            LibError::not_found("Flow not found", anyhow!("flow {} not found", flow_id))
        })?;
        permissions::ensure_access(&flow, actor, access)?;
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{Value, json};
    use uuid::Uuid;

    use super::*;
    use crate::error::ErrorKind;
    use crate::memory::MemoryFlowStore;
    use crate::store::ReplaceStep;

    fn setup() -> (FlowOperations<MemoryFlowStore>, Arc<MemoryFlowStore>, UserId) {
        let store = Arc::new(MemoryFlowStore::new());
        (
            FlowOperations::new(Arc::clone(&store)),
            store,
            UserId(Uuid::new_v4()),
        )
    }

    async fn create(ops: &FlowOperations<MemoryFlowStore>, owner: UserId) -> FlowChart {
        ops.create_flow(
            owner,
            CreateFlowPayload {
                name: "Checkout".to_string(),
                description: Some("payment steps".to_string()),
                is_public: None,
            },
        )
        .await
        .expect("create flow")
    }

    fn two_node_payload() -> Value {
        json!({
            "viewport": {"x": 10, "y": 20, "zoom": 1.25},
            "flowSettings": {"snapToGrid": true},
            "nodes": [
                {"id": "n1", "type": "input", "position": {"x": 0.0, "y": 0.0}, "data": {"label": "Cart"}},
                {"id": "n2", "position": {"x": 200.0, "y": 50.0}, "data": {"label": "Pay"}}
            ],
            "edges": [{"id": "e1-2", "source": "n1", "target": "n2"}],
            "changeDescription": "initial layout",
            "clientMeta": {"editor": "v11"}
        })
    }

    async fn versions(ops: &FlowOperations<MemoryFlowStore>, owner: UserId, flow_id: FlowId) -> Vec<i64> {
        ops.history(
            owner,
            flow_id,
            HistoryQuery {
                page: Some(1),
                limit: Some(200),
            },
        )
        .await
        .expect("history")
        .items
        .iter()
        .map(|snapshot| snapshot.version_number)
        .collect()
    }

    #[tokio::test]
    async fn save_then_clear_scenario() {
        let (ops, _, owner) = setup();
        let flow = create(&ops, owner).await;
        assert_eq!(flow.version, 1);

        let saved = ops
            .save_flow(owner, flow.id, two_node_payload())
            .await
            .expect("save flow");
        assert_eq!(saved.version, 2);
        assert_eq!(saved.message, "Flow saved successfully");

        let exported = ops
            .export_flow(owner, flow.id, ExportQuery::default())
            .await
            .expect("export");
        assert_eq!(exported.nodes.len(), 2);
        assert_eq!(exported.edges.len(), 1);
        assert_eq!(exported.edges[0].source, "n1");
        assert_eq!(exported.edges[0].target, "n2");
        assert_eq!(exported.viewport, json!({"x": 10, "y": 20, "zoom": 1.25}));
        assert_eq!(versions(&ops, owner, flow.id).await, vec![2]);

        let cleared = ops
            .save_flow(owner, flow.id, json!({"nodes": [], "edges": []}))
            .await
            .expect("clear flow");
        assert_eq!(cleared.version, 3);

        let exported = ops
            .export_flow(owner, flow.id, ExportQuery::default())
            .await
            .expect("export");
        assert!(exported.nodes.is_empty());
        assert!(exported.edges.is_empty());
        assert_eq!(exported.viewport, json!({}));
        assert_eq!(versions(&ops, owner, flow.id).await, vec![3, 2]);
    }

    #[tokio::test]
    async fn export_round_trips_a_fully_specified_document() {
        let (ops, _, owner) = setup();
        let flow = create(&ops, owner).await;
        let document = json!({
            "nodes": [{
                "id": "a",
                "type": "custom",
                "position": {"x": 12.5, "y": -4.0},
                "data": {"label": "A", "tags": ["x"]},
                "style": {"border": "1px solid"},
                "draggable": false,
                "selectable": true,
                "deletable": false,
                "width": 180.0,
                "height": 40.0
            }],
            "edges": [{
                "id": "e",
                "type": "smoothstep",
                "source": "a",
                "target": "missing",
                "sourceHandle": "right",
                "targetHandle": "left",
                "data": {},
                "style": {"stroke": "#333"},
                "label": "maybe",
                "labelStyle": {"fontSize": 12},
                "animated": true,
                "deletable": true
            }],
            "viewport": {"x": 0, "y": 0, "zoom": 0.5},
            "flowSettings": {"minZoom": 0.1}
        });

        ops.save_flow(owner, flow.id, document.clone())
            .await
            .expect("save flow");
        let exported = ops
            .export_flow(owner, flow.id, ExportQuery::default())
            .await
            .expect("export");

        assert_eq!(
            serde_json::to_value(exported).expect("serialize export"),
            document
        );
    }

    #[tokio::test]
    async fn versions_increase_by_one_per_save_and_ledger_keeps_payloads() {
        let (ops, store, owner) = setup();
        let flow = create(&ops, owner).await;

        let mut submitted = Vec::new();
        for round in 0..5 {
            let payload = json!({
                "nodes": (0..round)
                    .map(|i| json!({"id": format!("n{i}"), "position": {"x": i, "y": 0}}))
                    .collect::<Vec<_>>(),
                "round": round
            });
            let saved = ops
                .save_flow(owner, flow.id, payload.clone())
                .await
                .expect("save flow");
            assert_eq!(saved.version, round + 2);
            submitted.push(payload);
        }

        let current = store
            .get_flow(flow.id)
            .await
            .expect("get flow")
            .expect("flow exists");
        assert_eq!(current.version, 6);

        let history = ops
            .history(owner, flow.id, HistoryQuery::default())
            .await
            .expect("history");
        assert_eq!(
            history
                .items
                .iter()
                .map(|snapshot| snapshot.version_number)
                .collect::<Vec<_>>(),
            vec![6, 5, 4, 3, 2]
        );
        for snapshot in &history.items {
            let index = (snapshot.version_number - 2) as usize;
            assert_eq!(snapshot.snapshot_data, submitted[index]);
            assert_eq!(snapshot.created_by, owner);
        }

        let latest = ops
            .latest_version(owner, flow.id)
            .await
            .expect("latest version");
        assert_eq!(latest.version_number, 6);
    }

    #[tokio::test]
    async fn snapshot_keeps_unprojected_fields_and_change_description() {
        let (ops, _, owner) = setup();
        let flow = create(&ops, owner).await;
        ops.save_flow(owner, flow.id, two_node_payload())
            .await
            .expect("save flow");

        let latest = ops
            .latest_version(owner, flow.id)
            .await
            .expect("latest version");
        assert_eq!(latest.snapshot_data["clientMeta"], json!({"editor": "v11"}));
        assert_eq!(latest.change_description.as_deref(), Some("initial layout"));
    }

    #[tokio::test]
    async fn non_owner_save_is_forbidden_without_side_effects() {
        let (ops, store, owner) = setup();
        let flow = create(&ops, owner).await;
        ops.save_flow(owner, flow.id, two_node_payload())
            .await
            .expect("save flow");

        let intruder = UserId(Uuid::new_v4());
        let err = ops
            .save_flow(intruder, flow.id, json!({"nodes": []}))
            .await
            .expect_err("non-owner save should fail");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let current = store
            .get_flow(flow.id)
            .await
            .expect("get flow")
            .expect("flow exists");
        assert_eq!(current.version, 2);
        assert_eq!(versions(&ops, owner, flow.id).await, vec![2]);
        let (nodes, _) = store.load_rows(flow.id).await.expect("rows");
        assert_eq!(nodes.len(), 2);
    }

    #[tokio::test]
    async fn checks_run_in_order_not_found_forbidden_invalid() {
        let (ops, _, owner) = setup();
        let bad_payload = json!({"nodes": [{"id": ""}]});

        let err = ops
            .save_flow(owner, FlowId(Uuid::new_v4()), bad_payload.clone())
            .await
            .expect_err("missing flow");
        assert_eq!(err.kind, ErrorKind::NotFound);

        let flow = create(&ops, owner).await;
        let err = ops
            .save_flow(UserId(Uuid::new_v4()), flow.id, bad_payload.clone())
            .await
            .expect_err("non-owner");
        assert_eq!(err.kind, ErrorKind::Forbidden);

        let err = ops
            .save_flow(owner, flow.id, bad_payload)
            .await
            .expect_err("invalid payload");
        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(err.code, "invalid_flow_document");
        assert!(versions(&ops, owner, flow.id).await.is_empty());
    }

    #[tokio::test]
    async fn failed_save_leaves_previous_state_intact() {
        let (ops, store, owner) = setup();
        let flow = create(&ops, owner).await;
        ops.save_flow(owner, flow.id, two_node_payload())
            .await
            .expect("save flow");
        let before = ops
            .export_flow(owner, flow.id, ExportQuery::default())
            .await
            .expect("export");

        store.fail_next_replace_at(ReplaceStep::InsertNodes);
        let err = ops
            .save_flow(owner, flow.id, json!({"nodes": [], "viewport": {"zoom": 3}}))
            .await
            .expect_err("injected failure");
        assert_eq!(err.kind, ErrorKind::Database);

        let after = ops
            .export_flow(owner, flow.id, ExportQuery::default())
            .await
            .expect("export");
        assert_eq!(after, before);
        assert_eq!(versions(&ops, owner, flow.id).await, vec![2]);

        let retried = ops
            .save_flow(owner, flow.id, json!({"nodes": []}))
            .await
            .expect("retry succeeds");
        assert_eq!(retried.version, 3);
    }

    #[tokio::test]
    async fn public_flows_are_readable_by_others() {
        let (ops, _, owner) = setup();
        let flow = ops
            .create_flow(
                owner,
                CreateFlowPayload {
                    name: "Shared".to_string(),
                    description: None,
                    is_public: Some(true),
                },
            )
            .await
            .expect("create flow");
        ops.save_flow(owner, flow.id, two_node_payload())
            .await
            .expect("save flow");

        let reader = UserId(Uuid::new_v4());
        let detail = ops.get_flow(reader, flow.id).await.expect("public read");
        assert_eq!(detail.nodes.len(), 2);
        assert_eq!(detail.flow.version, 2);

        let err = ops
            .update_flow(
                reader,
                flow.id,
                UpdateFlowPayload {
                    name: "Hijacked".to_string(),
                    description: None,
                    is_public: Some(false),
                },
            )
            .await
            .expect_err("update denied");
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }

    #[tokio::test]
    async fn update_and_delete_manage_flow_metadata() {
        let (ops, _, owner) = setup();
        let flow = create(&ops, owner).await;
        ops.save_flow(owner, flow.id, two_node_payload())
            .await
            .expect("save flow");

        let updated = ops
            .update_flow(
                owner,
                flow.id,
                UpdateFlowPayload {
                    name: "Checkout v2".to_string(),
                    description: None,
                    is_public: Some(true),
                },
            )
            .await
            .expect("update flow");
        assert_eq!(updated.name, "Checkout v2");
        assert!(updated.is_public);
        assert_eq!(updated.version, 2);
        assert_eq!(updated.viewport, json!({"x": 10, "y": 20, "zoom": 1.25}));

        let page = ops
            .list_flows(owner, ListFlowsQuery::default())
            .await
            .expect("list flows");
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].node_count, 2);
        assert_eq!(page.items[0].edge_count, 1);

        ops.delete_flow(owner, flow.id).await.expect("delete flow");
        let err = ops
            .export_flow(owner, flow.id, ExportQuery::default())
            .await
            .expect_err("deleted flow");
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn execute_dispatches_tagged_operations() {
        let (ops, _, owner) = setup();
        let created = ops
            .execute(
                owner,
                serde_json::from_value(json!({
                    "operation": "create",
                    "payload": {"name": "Tagged"}
                }))
                .expect("operation should deserialize"),
            )
            .await
            .expect("create");
        let FlowOperationResult::Flow { flow } = created else {
            panic!("expected flow result");
        };

        let saved = ops
            .execute(
                owner,
                serde_json::from_value(json!({
                    "operation": "save",
                    "flow_id": flow.id,
                    "payload": {"nodes": [{"id": "n1", "position": {"x": 1, "y": 1}}]}
                }))
                .expect("operation should deserialize"),
            )
            .await
            .expect("save");
        assert!(matches!(saved, FlowOperationResult::Saved { version: 2 }));

        let exported = ops
            .execute(
                owner,
                serde_json::from_value(json!({
                    "operation": "export",
                    "flow_id": flow.id
                }))
                .expect("operation should deserialize"),
            )
            .await
            .expect("export");
        let FlowOperationResult::Exported { flow: exported } = exported else {
            panic!("expected export result");
        };
        assert_eq!(exported.nodes[0].id, "n1");
    }
}
