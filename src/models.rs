use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::{LibError, Result};
use crate::identity::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct FlowId(pub Uuid);

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FlowId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Uuid::from_str(s).map(Self)
    }
}

impl From<Uuid> for FlowId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SnapshotId(pub Uuid);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node type tag. Values outside the known set are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    #[default]
    Default,
    Input,
    Output,
    Custom,
    Other(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Default => "default",
            NodeType::Input => "input",
            NodeType::Output => "output",
            NodeType::Custom => "custom",
            NodeType::Other(value) => value,
        }
    }
}

impl From<String> for NodeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "default" => NodeType::Default,
            "input" => NodeType::Input,
            "output" => NodeType::Output,
            "custom" => NodeType::Custom,
            _ => NodeType::Other(value),
        }
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        match value {
            NodeType::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

/// Edge type tag. Values outside the known set are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeType {
    #[default]
    Default,
    Straight,
    Step,
    SmoothStep,
    Bezier,
    Custom,
    Other(String),
}

impl EdgeType {
    pub fn as_str(&self) -> &str {
        match self {
            EdgeType::Default => "default",
            EdgeType::Straight => "straight",
            EdgeType::Step => "step",
            EdgeType::SmoothStep => "smoothstep",
            EdgeType::Bezier => "bezier",
            EdgeType::Custom => "custom",
            EdgeType::Other(value) => value,
        }
    }
}

impl From<String> for EdgeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "default" => EdgeType::Default,
            "straight" => EdgeType::Straight,
            "step" => EdgeType::Step,
            "smoothstep" => EdgeType::SmoothStep,
            "bezier" => EdgeType::Bezier,
            "custom" => EdgeType::Custom,
            _ => EdgeType::Other(value),
        }
    }
}

impl From<EdgeType> for String {
    fn from(value: EdgeType) -> Self {
        match value {
            EdgeType::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node after validation, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowNode {
    pub id: String,
    pub node_type: NodeType,
    pub position: Position,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub data: Value,
    pub style: Value,
    pub draggable: bool,
    pub selectable: bool,
    pub deletable: bool,
}

/// An edge after validation, with defaults applied. `source`/`target` are not
/// required to name nodes of the same document.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowEdge {
    pub id: String,
    pub edge_type: EdgeType,
    pub source: String,
    pub target: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
    pub data: Value,
    pub style: Value,
    pub label: Option<String>,
    pub label_style: Value,
    pub animated: bool,
    pub deletable: bool,
}

/// The validated content of one save request.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDocument {
    pub viewport: Value,
    pub flow_settings: Value,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub change_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowChart {
    pub id: FlowId,
    pub owner_user_id: UserId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub viewport: Value,
    pub flow_settings: Value,
    pub is_public: bool,
    pub version: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    pub id: FlowId,
    pub owner_user_id: UserId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_public: bool,
    pub version: i64,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub node_count: i64,
    pub edge_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub page: u32,
    pub limit: u32,
    pub items: Vec<T>,
}

/// Immutable ledger entry holding the full payload submitted for one save.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSnapshot {
    pub id: SnapshotId,
    pub flow_id: FlowId,
    pub version_number: i64,
    pub snapshot_data: Value,
    pub created_by: UserId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_description: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSnapshot {
    pub flow_id: FlowId,
    pub version_number: i64,
    pub snapshot_data: Value,
    pub created_by: UserId,
    pub change_description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFlowResponse {
    pub message: String,
    pub version: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowPayload {
    pub name: String,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlowPayload {
    pub name: String,
    pub description: Option<String>,
    pub is_public: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFlowsQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub sorted: Option<bool>,
}

/// Flow metadata accepted by create and update. Content is only written by saves.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub is_public: bool,
}

fn clamp_pagination(page: Option<u32>, limit: Option<u32>) -> (u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(25).clamp(1, 200);
    (page, limit)
}

impl ListFlowsQuery {
    pub fn pagination(&self) -> (u32, u32) {
        clamp_pagination(self.page, self.limit)
    }
}

impl HistoryQuery {
    pub fn pagination(&self) -> (u32, u32) {
        clamp_pagination(self.page, self.limit)
    }
}

impl CreateFlowPayload {
    pub fn normalize(self) -> Result<FlowDefinition> {
        normalize_flow_definition(self.name, self.description, self.is_public)
    }
}

impl UpdateFlowPayload {
    pub fn normalize(self) -> Result<FlowDefinition> {
        normalize_flow_definition(self.name, self.description, self.is_public)
    }
}

fn normalize_flow_definition(
    name: String,
    description: Option<String>,
    is_public: Option<bool>,
) -> Result<FlowDefinition> {
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(LibError::invalid(
            "Flow name is required",
            anyhow!("empty flow name"),
        ));
    }
    if name.chars().count() > 200 {
        return Err(LibError::invalid(
            "Flow name must be at most 200 characters",
            anyhow!("flow name too long"),
        ));
    }

    Ok(FlowDefinition {
        name,
        description: description.filter(|text| !text.trim().is_empty()),
        is_public: is_public.unwrap_or(false),
    })
}

pub(crate) fn empty_document() -> Value {
    json!({})
}
