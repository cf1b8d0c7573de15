//! Client-facing shape of a stored flow, as consumed by the graph editor.

use serde::Serialize;
use serde_json::Value;

use crate::models::{FlowChart, FlowDocument, FlowEdge, FlowNode, Position};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub position: Position,
    pub data: Value,
    pub style: Value,
    pub draggable: bool,
    pub selectable: bool,
    pub deletable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedEdge {
    pub id: String,
    #[serde(rename = "type")]
    pub edge_type: String,
    pub source: String,
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    pub data: Value,
    pub style: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label_style: Option<Value>,
    pub animated: bool,
    pub deletable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedFlow {
    pub nodes: Vec<ExportedNode>,
    pub edges: Vec<ExportedEdge>,
    pub viewport: Value,
    pub flow_settings: Value,
}

/// Flow metadata together with its current content, used by the detail read.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowChartDetail {
    #[serde(flatten)]
    pub flow: FlowChart,
    pub nodes: Vec<ExportedNode>,
    pub edges: Vec<ExportedEdge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportOrder {
    /// Order in which nodes and edges were submitted by the last save.
    #[default]
    Stored,
    /// Sorted by identifier.
    ById,
}

impl ExportOrder {
    pub fn from_sorted_flag(sorted: Option<bool>) -> Self {
        if sorted.unwrap_or(false) {
            ExportOrder::ById
        } else {
            ExportOrder::Stored
        }
    }
}

pub fn export_node(node: FlowNode) -> ExportedNode {
    ExportedNode {
        id: node.id,
        node_type: node.node_type.into(),
        position: node.position,
        data: node.data,
        style: node.style,
        draggable: node.draggable,
        selectable: node.selectable,
        deletable: node.deletable,
        width: node.width,
        height: node.height,
    }
}

pub fn export_edge(edge: FlowEdge) -> ExportedEdge {
    let (label, label_style) = match edge.label.filter(|label| !label.is_empty()) {
        Some(label) => (Some(label), Some(edge.label_style)),
        None => (None, None),
    };

    ExportedEdge {
        id: edge.id,
        edge_type: edge.edge_type.into(),
        source: edge.source,
        target: edge.target,
        source_handle: edge.source_handle.filter(|handle| !handle.is_empty()),
        target_handle: edge.target_handle.filter(|handle| !handle.is_empty()),
        data: edge.data,
        style: edge.style,
        label,
        label_style,
        animated: edge.animated,
        deletable: edge.deletable,
    }
}

/// Renames a reconstructed document into the editor's shape.
pub fn export_document(document: FlowDocument, order: ExportOrder) -> ExportedFlow {
    let mut nodes = document.nodes.into_iter().map(export_node).collect::<Vec<_>>();
    let mut edges = document.edges.into_iter().map(export_edge).collect::<Vec<_>>();
    if order == ExportOrder::ById {
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        edges.sort_by(|a, b| a.id.cmp(&b.id));
    }

    ExportedFlow {
        nodes,
        edges,
        viewport: document.viewport,
        flow_settings: document.flow_settings,
    }
}

pub fn flow_detail(flow: FlowChart, document: FlowDocument) -> FlowChartDetail {
    let exported = export_document(document, ExportOrder::Stored);
    FlowChartDetail {
        flow,
        nodes: exported.nodes,
        edges: exported.edges,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ExportOrder, export_document};
    use crate::document::validate_document;

    #[test]
    fn export_uses_editor_field_names() {
        let document = validate_document(&json!({
            "viewport": {"x": 0, "y": 0, "zoom": 1},
            "flowSettings": {"fitView": true},
            "nodes": [{"id": "n1", "type": "input", "position": {"x": 1, "y": 2}, "width": 150}],
            "edges": [{
                "id": "e1", "source": "n1", "target": "n2",
                "sourceHandle": "a", "label": "go", "labelStyle": {"fontWeight": 700}
            }]
        }))
        .expect("document should validate");

        let exported = serde_json::to_value(export_document(document, ExportOrder::Stored))
            .expect("export should serialize");

        assert_eq!(
            exported,
            json!({
                "nodes": [{
                    "id": "n1",
                    "type": "input",
                    "position": {"x": 1.0, "y": 2.0},
                    "data": {},
                    "style": {},
                    "draggable": true,
                    "selectable": true,
                    "deletable": true,
                    "width": 150.0
                }],
                "edges": [{
                    "id": "e1",
                    "type": "default",
                    "source": "n1",
                    "target": "n2",
                    "sourceHandle": "a",
                    "data": {},
                    "style": {},
                    "label": "go",
                    "labelStyle": {"fontWeight": 700},
                    "animated": false,
                    "deletable": true
                }],
                "viewport": {"x": 0, "y": 0, "zoom": 1},
                "flowSettings": {"fitView": true}
            })
        );
    }

    #[test]
    fn empty_label_drops_label_style() {
        let document = validate_document(&json!({
            "edges": [{
                "id": "e1", "source": "a", "target": "b",
                "label": "", "labelStyle": {"fill": "red"}, "targetHandle": ""
            }]
        }))
        .expect("document should validate");

        let exported = serde_json::to_value(export_document(document, ExportOrder::Stored))
            .expect("export should serialize");
        let edge = &exported["edges"][0];
        assert!(edge.get("label").is_none());
        assert!(edge.get("labelStyle").is_none());
        assert!(edge.get("targetHandle").is_none());
    }

    #[test]
    fn sorted_export_orders_by_id() {
        let document = validate_document(&json!({
            "nodes": [
                {"id": "c", "position": {"x": 0, "y": 0}},
                {"id": "a", "position": {"x": 0, "y": 0}},
                {"id": "b", "position": {"x": 0, "y": 0}}
            ]
        }))
        .expect("document should validate");

        let stored = export_document(document.clone(), ExportOrder::Stored);
        let sorted = export_document(document, ExportOrder::ById);
        let ids = |nodes: &[super::ExportedNode]| {
            nodes.iter().map(|node| node.id.clone()).collect::<Vec<_>>()
        };
        assert_eq!(ids(&stored.nodes), vec!["c", "a", "b"]);
        assert_eq!(ids(&sorted.nodes), vec!["a", "b", "c"]);
    }
}
