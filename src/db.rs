use std::sync::Arc;

use anyhow::anyhow;
use once_cell::sync::Lazy;
use serde_json::Value;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::identity::UserId;
use crate::models::{
    FlowChart, FlowDefinition, FlowId, FlowSummary, NewSnapshot, SnapshotId, VersionSnapshot,
};
use crate::projection::{EdgeRow, NodeRow};
use crate::store::{FlowStore, ReplacePlan, ReplaceStep};

pub static MIGRATOR: Lazy<Migrator> = Lazy::new(|| {
    let mut migrator = sqlx::migrate!("./migrations");
    migrator.set_ignore_missing(true);
    migrator
});

pub async fn create_flow_tables(pool: &PgPool) -> std::result::Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[derive(Debug, Clone, FromRow)]
struct FlowRow {
    id: Uuid,
    owner_user_id: Uuid,
    name: String,
    description: Option<String>,
    viewport: Value,
    flow_settings: Value,
    is_public: bool,
    version: i64,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
}

#[derive(Debug, Clone, FromRow)]
struct FlowSummaryRow {
    id: Uuid,
    owner_user_id: Uuid,
    name: String,
    description: Option<String>,
    is_public: bool,
    version: i64,
    created_at: chrono::NaiveDateTime,
    updated_at: chrono::NaiveDateTime,
    node_count: i64,
    edge_count: i64,
}

#[derive(Debug, Clone, FromRow)]
struct SnapshotRow {
    id: Uuid,
    flow_id: Uuid,
    version_number: i64,
    snapshot_data: Value,
    created_by: Uuid,
    change_description: Option<String>,
    created_at: chrono::NaiveDateTime,
}

impl From<FlowRow> for FlowChart {
    fn from(value: FlowRow) -> Self {
        Self {
            id: FlowId(value.id),
            owner_user_id: UserId(value.owner_user_id),
            name: value.name,
            description: value.description,
            viewport: value.viewport,
            flow_settings: value.flow_settings,
            is_public: value.is_public,
            version: value.version,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl From<FlowSummaryRow> for FlowSummary {
    fn from(value: FlowSummaryRow) -> Self {
        Self {
            id: FlowId(value.id),
            owner_user_id: UserId(value.owner_user_id),
            name: value.name,
            description: value.description,
            is_public: value.is_public,
            version: value.version,
            created_at: value.created_at,
            updated_at: value.updated_at,
            node_count: value.node_count,
            edge_count: value.edge_count,
        }
    }
}

impl From<SnapshotRow> for VersionSnapshot {
    fn from(value: SnapshotRow) -> Self {
        Self {
            id: SnapshotId(value.id),
            flow_id: FlowId(value.flow_id),
            version_number: value.version_number,
            snapshot_data: value.snapshot_data,
            created_by: UserId(value.created_by),
            change_description: value.change_description,
            created_at: value.created_at,
        }
    }
}

const FLOW_COLUMNS: &str = r#"
    id,
    owner_user_id,
    name,
    description,
    viewport,
    flow_settings,
    is_public,
    version,
    created_at,
    updated_at
"#;

fn db_err(public: &'static str, err: sqlx::Error) -> LibError {
    LibError::database(public, anyhow!(err))
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Maps a failure inside the replace transaction to the error surfaced to callers.
fn replace_err(step: ReplaceStep, expected_version: i64, err: sqlx::Error) -> LibError {
    let code = sqlstate(&err);
    replace_err_for_code(step, expected_version, code.as_deref(), anyhow!(err))
}

fn replace_err_for_code(
    step: ReplaceStep,
    expected_version: i64,
    code: Option<&str>,
    source: anyhow::Error,
) -> LibError {
    match code {
        // serialization_failure, deadlock_detected
        Some("40001") | Some("40P01") => LibError::conflict(expected_version, source),
        Some("23505") if step == ReplaceStep::AppendSnapshot => {
            LibError::duplicate_version(source)
        }
        Some("23505") => LibError::invalid("Identifiers must be unique within a flow", source),
        // untranslatable_character: jsonb cannot hold \u0000
        Some("22P05") => LibError::invalid(
            "Flow document contains characters that cannot be stored",
            source,
        ),
        _ => LibError::database(step.public_message(), source),
    }
}

/// Error for a version-guarded update that matched no row. `current_version`
/// is the flow's version as seen inside the same transaction.
fn stale_update_err(
    flow_id: FlowId,
    expected_version: i64,
    current_version: Option<i64>,
) -> LibError {
    match current_version {
        None => LibError::not_found(
            "Flow not found",
            anyhow!("flow {} was deleted before the save committed", flow_id),
        ),
        Some(current) => LibError::conflict(
            expected_version,
            anyhow!(
                "flow {} is at version {}, save expected {}",
                flow_id,
                current,
                expected_version
            ),
        ),
    }
}

/// Postgres-backed store. Saves run in one `REPEATABLE READ` transaction guarded
/// by the flow's version column.
#[derive(Clone)]
pub struct PgFlowStore {
    pool: Arc<PgPool>,
}

impl PgFlowStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub fn from_pool(pool: &PgPool) -> Self {
        Self {
            pool: Arc::new(pool.clone()),
        }
    }

    pub fn pool(&self) -> Arc<PgPool> {
        Arc::clone(&self.pool)
    }
}

async fn update_flow_content(
    tx: &mut Transaction<'_, Postgres>,
    plan: &ReplacePlan,
) -> std::result::Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE flow.flowcharts
        SET viewport = $1,
            flow_settings = $2,
            version = $3,
            updated_at = CURRENT_TIMESTAMP
        WHERE id = $4
          AND version = $5
        "#,
    )
    .bind(&plan.viewport)
    .bind(&plan.flow_settings)
    .bind(plan.new_version())
    .bind(plan.flow_id.0)
    .bind(plan.expected_version)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected())
}

async fn insert_nodes(
    tx: &mut Transaction<'_, Postgres>,
    nodes: &[NodeRow],
) -> std::result::Result<u64, sqlx::Error> {
    let mut written = 0;
    for node in nodes {
        let result = sqlx::query(
            r#"
            INSERT INTO flow.nodes (
                flow_id,
                node_id,
                node_type,
                ordinal,
                position_x,
                position_y,
                width,
                height,
                data,
                style,
                draggable,
                selectable,
                deletable
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(node.flow_id.0)
        .bind(&node.node_id)
        .bind(node.node_type.as_str())
        .bind(node.ordinal)
        .bind(node.position_x)
        .bind(node.position_y)
        .bind(node.width)
        .bind(node.height)
        .bind(&node.data)
        .bind(&node.style)
        .bind(node.draggable)
        .bind(node.selectable)
        .bind(node.deletable)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }

    Ok(written)
}

async fn insert_edges(
    tx: &mut Transaction<'_, Postgres>,
    edges: &[EdgeRow],
) -> std::result::Result<u64, sqlx::Error> {
    let mut written = 0;
    for edge in edges {
        let result = sqlx::query(
            r#"
            INSERT INTO flow.edges (
                flow_id,
                edge_id,
                edge_type,
                ordinal,
                source_node_id,
                target_node_id,
                source_handle,
                target_handle,
                data,
                style,
                label,
                label_style,
                animated,
                deletable
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(edge.flow_id.0)
        .bind(&edge.edge_id)
        .bind(edge.edge_type.as_str())
        .bind(edge.ordinal)
        .bind(&edge.source_node_id)
        .bind(&edge.target_node_id)
        .bind(&edge.source_handle)
        .bind(&edge.target_handle)
        .bind(&edge.data)
        .bind(&edge.style)
        .bind(&edge.label)
        .bind(&edge.label_style)
        .bind(edge.animated)
        .bind(edge.deletable)
        .execute(&mut **tx)
        .await?;
        written += result.rows_affected();
    }

    Ok(written)
}

async fn insert_snapshot<'e, E>(
    executor: E,
    snapshot_id: SnapshotId,
    snapshot: &NewSnapshot,
) -> std::result::Result<u64, sqlx::Error>
where
    E: PgExecutor<'e>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO flow.versions (
            id,
            flow_id,
            version_number,
            snapshot_data,
            created_by,
            change_description
        )
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(snapshot_id.0)
    .bind(snapshot.flow_id.0)
    .bind(snapshot.version_number)
    .bind(&snapshot.snapshot_data)
    .bind(snapshot.created_by.0)
    .bind(&snapshot.change_description)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}

async fn run_step(
    tx: &mut Transaction<'_, Postgres>,
    plan: &ReplacePlan,
    step: ReplaceStep,
) -> std::result::Result<u64, sqlx::Error> {
    match step {
        ReplaceStep::UpdateFlow => update_flow_content(tx, plan).await,
        ReplaceStep::DeleteNodes => sqlx::query(
            r#"
            DELETE FROM flow.nodes
            WHERE flow_id = $1
            "#,
        )
        .bind(plan.flow_id.0)
        .execute(&mut **tx)
        .await
        .map(|result| result.rows_affected()),
        ReplaceStep::DeleteEdges => sqlx::query(
            r#"
            DELETE FROM flow.edges
            WHERE flow_id = $1
            "#,
        )
        .bind(plan.flow_id.0)
        .execute(&mut **tx)
        .await
        .map(|result| result.rows_affected()),
        ReplaceStep::InsertNodes => insert_nodes(tx, &plan.nodes).await,
        ReplaceStep::InsertEdges => insert_edges(tx, &plan.edges).await,
        ReplaceStep::AppendSnapshot => {
            insert_snapshot(&mut **tx, SnapshotId(Uuid::new_v4()), &plan.snapshot).await
        }
    }
}

impl FlowStore for PgFlowStore {
    async fn create_flow(&self, owner: UserId, definition: &FlowDefinition) -> Result<FlowChart> {
        let query = format!(
            r#"
            INSERT INTO flow.flowcharts (
                id,
                owner_user_id,
                name,
                description,
                is_public
            )
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {FLOW_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FlowRow>(&query)
            .bind(Uuid::new_v4())
            .bind(owner.0)
            .bind(&definition.name)
            .bind(&definition.description)
            .bind(definition.is_public)
            .fetch_one(self.pool.as_ref())
            .await
            .map_err(|err| db_err("Failed to create flow", err))?;

        Ok(row.into())
    }

    async fn get_flow(&self, flow_id: FlowId) -> Result<Option<FlowChart>> {
        let query = format!(
            r#"
            SELECT {FLOW_COLUMNS}
            FROM flow.flowcharts
            WHERE id = $1
            "#
        );
        let row = sqlx::query_as::<_, FlowRow>(&query)
            .bind(flow_id.0)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|err| db_err("Failed to query flow", err))?;

        Ok(row.map(FlowChart::from))
    }

    async fn list_flows(&self, owner: UserId, page: u32, limit: u32) -> Result<Vec<FlowSummary>> {
        let offset = (page.saturating_sub(1) as i64).saturating_mul(limit as i64);

        let rows = sqlx::query_as::<_, FlowSummaryRow>(
            r#"
            SELECT
                f.id,
                f.owner_user_id,
                f.name,
                f.description,
                f.is_public,
                f.version,
                f.created_at,
                f.updated_at,
                COALESCE(n.node_count, 0) AS node_count,
                COALESCE(e.edge_count, 0) AS edge_count
            FROM flow.flowcharts f
            LEFT JOIN (
                SELECT flow_id, COUNT(*)::bigint AS node_count
                FROM flow.nodes
                GROUP BY flow_id
            ) n
            ON n.flow_id = f.id
            LEFT JOIN (
                SELECT flow_id, COUNT(*)::bigint AS edge_count
                FROM flow.edges
                GROUP BY flow_id
            ) e
            ON e.flow_id = f.id
            WHERE f.owner_user_id = $1
            ORDER BY f.updated_at DESC, f.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(owner.0)
        .bind(limit as i64)
        .bind(offset)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to list flows", err))?;

        Ok(rows.into_iter().map(FlowSummary::from).collect())
    }

    async fn update_flow(&self, flow_id: FlowId, definition: &FlowDefinition) -> Result<FlowChart> {
        let query = format!(
            r#"
            UPDATE flow.flowcharts
            SET name = $1,
                description = $2,
                is_public = $3,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $4
            RETURNING {FLOW_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FlowRow>(&query)
            .bind(&definition.name)
            .bind(&definition.description)
            .bind(definition.is_public)
            .bind(flow_id.0)
            .fetch_optional(self.pool.as_ref())
            .await
            .map_err(|err| db_err("Failed to update flow", err))?;

        row.map(FlowChart::from).ok_or_else(|| {
            LibError::not_found("Flow not found", anyhow!("flow {} not found", flow_id))
        })
    }

    async fn delete_flow(&self, flow_id: FlowId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM flow.flowcharts
            WHERE id = $1
            "#,
        )
        .bind(flow_id.0)
        .execute(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to delete flow", err))?;

        Ok(result.rows_affected() > 0)
    }

    async fn load_rows(&self, flow_id: FlowId) -> Result<(Vec<NodeRow>, Vec<EdgeRow>)> {
        let nodes = sqlx::query_as::<_, NodeRow>(
            r#"
            SELECT
                flow_id,
                node_id,
                node_type,
                ordinal,
                position_x,
                position_y,
                width,
                height,
                data,
                style,
                draggable,
                selectable,
                deletable
            FROM flow.nodes
            WHERE flow_id = $1
            ORDER BY ordinal ASC, node_id ASC
            "#,
        )
        .bind(flow_id.0)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to query flow nodes", err))?;

        let edges = sqlx::query_as::<_, EdgeRow>(
            r#"
            SELECT
                flow_id,
                edge_id,
                edge_type,
                ordinal,
                source_node_id,
                target_node_id,
                source_handle,
                target_handle,
                data,
                style,
                label,
                label_style,
                animated,
                deletable
            FROM flow.edges
            WHERE flow_id = $1
            ORDER BY ordinal ASC, edge_id ASC
            "#,
        )
        .bind(flow_id.0)
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to query flow edges", err))?;

        Ok((nodes, edges))
    }

    async fn apply_replace(&self, plan: &ReplacePlan) -> Result<i64> {
        plan.check_consistency()?;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(|err| db_err("Failed to start transaction", err))?;

        for step in ReplaceStep::ORDER {
            let affected = run_step(&mut tx, plan, step)
                .await
                .map_err(|err| replace_err(step, plan.expected_version, err))?;

            if step == ReplaceStep::UpdateFlow && affected == 0 {
                let current_version = sqlx::query_scalar::<_, i64>(
                    r#"
                    SELECT version
                    FROM flow.flowcharts
                    WHERE id = $1
                    "#,
                )
                .bind(plan.flow_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|err| replace_err(step, plan.expected_version, err))?;

                return Err(stale_update_err(
                    plan.flow_id,
                    plan.expected_version,
                    current_version,
                ));
            }
            tracing::debug!(flow_id = %plan.flow_id, %step, affected, "applied replace step");
        }

        tx.commit().await.map_err(|err| match sqlstate(&err).as_deref() {
            Some("40001") | Some("40P01") => LibError::conflict(plan.expected_version, anyhow!(err)),
            _ => db_err("Failed to commit transaction", err),
        })?;

        Ok(plan.new_version())
    }

    async fn append_snapshot(&self, snapshot: &NewSnapshot) -> Result<SnapshotId> {
        let snapshot_id = SnapshotId(Uuid::new_v4());
        insert_snapshot(self.pool.as_ref(), snapshot_id, snapshot)
            .await
            .map_err(|err| match sqlstate(&err).as_deref() {
                Some("23505") => LibError::duplicate_version(anyhow!(err)),
                Some("23503") => LibError::not_found(
                    "Flow not found",
                    anyhow!("flow {} not found: {}", snapshot.flow_id, err),
                ),
                _ => db_err("Failed to record flow version", err),
            })?;

        Ok(snapshot_id)
    }

    async fn latest_snapshot(&self, flow_id: FlowId) -> Result<Option<VersionSnapshot>> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT
                id,
                flow_id,
                version_number,
                snapshot_data,
                created_by,
                change_description,
                created_at
            FROM flow.versions
            WHERE flow_id = $1
            ORDER BY version_number DESC
            LIMIT 1
            "#,
        )
        .bind(flow_id.0)
        .fetch_optional(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to query flow versions", err))?;

        Ok(row.map(VersionSnapshot::from))
    }

    async fn list_snapshots(
        &self,
        flow_id: FlowId,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<VersionSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT
                id,
                flow_id,
                version_number,
                snapshot_data,
                created_by,
                change_description,
                created_at
            FROM flow.versions
            WHERE flow_id = $1
            ORDER BY version_number DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(flow_id.0)
        .bind(limit as i64)
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(self.pool.as_ref())
        .await
        .map_err(|err| db_err("Failed to query flow versions", err))?;

        Ok(rows.into_iter().map(VersionSnapshot::from).collect())
    }
}
