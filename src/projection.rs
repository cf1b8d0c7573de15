//! Mapping between validated flow documents and the relational node/edge rows.
//!
//! Everything here is pure: the store decides when rows are written.

use serde_json::Value;

use crate::models::{
    EdgeType, FlowChart, FlowDocument, FlowEdge, FlowId, FlowNode, NodeType, Position,
};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct NodeRow {
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "uuid::Uuid"))]
    pub flow_id: FlowId,
    pub node_id: String,
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub node_type: NodeType,
    pub ordinal: i32,
    pub position_x: f64,
    pub position_y: f64,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub data: Value,
    pub style: Value,
    pub draggable: bool,
    pub selectable: bool,
    pub deletable: bool,
}

/// Handles and label are stored as empty strings when absent.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct EdgeRow {
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "uuid::Uuid"))]
    pub flow_id: FlowId,
    pub edge_id: String,
    #[cfg_attr(feature = "sqlx", sqlx(try_from = "String"))]
    pub edge_type: EdgeType,
    pub ordinal: i32,
    pub source_node_id: String,
    pub target_node_id: String,
    pub source_handle: String,
    pub target_handle: String,
    pub data: Value,
    pub style: Value,
    pub label: String,
    pub label_style: Value,
    pub animated: bool,
    pub deletable: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectedRows {
    pub nodes: Vec<NodeRow>,
    pub edges: Vec<EdgeRow>,
}

/// Computes the full row set that replaces a flow's current content.
pub fn project(flow_id: FlowId, document: &FlowDocument) -> ProjectedRows {
    let nodes = document
        .nodes
        .iter()
        .enumerate()
        .map(|(ordinal, node)| node_row(flow_id, ordinal, node))
        .collect();
    let edges = document
        .edges
        .iter()
        .enumerate()
        .map(|(ordinal, edge)| edge_row(flow_id, ordinal, edge))
        .collect();

    ProjectedRows { nodes, edges }
}

fn node_row(flow_id: FlowId, ordinal: usize, node: &FlowNode) -> NodeRow {
    NodeRow {
        flow_id,
        node_id: node.id.clone(),
        node_type: node.node_type.clone(),
        ordinal: ordinal_value(ordinal),
        position_x: node.position.x,
        position_y: node.position.y,
        width: node.width,
        height: node.height,
        data: node.data.clone(),
        style: node.style.clone(),
        draggable: node.draggable,
        selectable: node.selectable,
        deletable: node.deletable,
    }
}

fn edge_row(flow_id: FlowId, ordinal: usize, edge: &FlowEdge) -> EdgeRow {
    EdgeRow {
        flow_id,
        edge_id: edge.id.clone(),
        edge_type: edge.edge_type.clone(),
        ordinal: ordinal_value(ordinal),
        source_node_id: edge.source.clone(),
        target_node_id: edge.target.clone(),
        source_handle: edge.source_handle.clone().unwrap_or_default(),
        target_handle: edge.target_handle.clone().unwrap_or_default(),
        data: edge.data.clone(),
        style: edge.style.clone(),
        label: edge.label.clone().unwrap_or_default(),
        label_style: edge.label_style.clone(),
        animated: edge.animated,
        deletable: edge.deletable,
    }
}

fn ordinal_value(ordinal: usize) -> i32 {
    i32::try_from(ordinal).unwrap_or(i32::MAX)
}

/// Reassembles nodes and edges from stored rows, in creation order.
pub fn reconstruct(mut nodes: Vec<NodeRow>, mut edges: Vec<EdgeRow>) -> (Vec<FlowNode>, Vec<FlowEdge>) {
    nodes.sort_by_key(|row| row.ordinal);
    edges.sort_by_key(|row| row.ordinal);

    let nodes = nodes
        .into_iter()
        .map(|row| FlowNode {
            id: row.node_id,
            node_type: row.node_type,
            position: Position {
                x: row.position_x,
                y: row.position_y,
            },
            width: row.width,
            height: row.height,
            data: row.data,
            style: row.style,
            draggable: row.draggable,
            selectable: row.selectable,
            deletable: row.deletable,
        })
        .collect();

    let edges = edges
        .into_iter()
        .map(|row| FlowEdge {
            id: row.edge_id,
            edge_type: row.edge_type,
            source: row.source_node_id,
            target: row.target_node_id,
            source_handle: non_empty(row.source_handle),
            target_handle: non_empty(row.target_handle),
            data: row.data,
            style: row.style,
            label: non_empty(row.label),
            label_style: row.label_style,
            animated: row.animated,
            deletable: row.deletable,
        })
        .collect();

    (nodes, edges)
}

/// Rebuilds the current document of a flow from its row and its node/edge rows.
pub fn reconstruct_document(
    flow: &FlowChart,
    nodes: Vec<NodeRow>,
    edges: Vec<EdgeRow>,
) -> FlowDocument {
    let (nodes, edges) = reconstruct(nodes, edges);
    FlowDocument {
        viewport: flow.viewport.clone(),
        flow_settings: flow.flow_settings.clone(),
        nodes,
        edges,
        change_description: None,
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}
