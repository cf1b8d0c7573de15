//! Structural validation of the flow-state document submitted by the graph editor.
//!
//! Only shape is checked: identifiers, positions and the types of the optional
//! flags. Opaque sub-documents (`data`, `style`, `labelStyle`, `viewport`,
//! `flowSettings`) are accepted as-is. Unknown keys are ignored here; they survive
//! only through the raw payload stored in the version ledger.

use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{LibError, Result};
use crate::models::{
    EdgeType, FlowDocument, FlowEdge, FlowNode, NodeType, Position, empty_document,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Nodes,
    Edges,
}

impl Collection {
    pub const fn key(self) -> &'static str {
        match self {
            Collection::Nodes => "nodes",
            Collection::Edges => "edges",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocumentViolation {
    RootNotObject,
    InvalidField {
        field: String,
        expected: &'static str,
    },
    CollectionNotArray {
        collection: Collection,
    },
    EntryNotObject {
        collection: Collection,
        index: usize,
    },
    MissingField {
        collection: Collection,
        index: usize,
        field: String,
    },
    InvalidEntryField {
        collection: Collection,
        index: usize,
        field: String,
        expected: &'static str,
    },
    DuplicateId {
        collection: Collection,
        index: usize,
        id: String,
    },
}

impl DocumentViolation {
    /// Location of the offending value, e.g. `nodes[2].position.x`.
    pub fn path(&self) -> String {
        match self {
            DocumentViolation::RootNotObject => "$".to_string(),
            DocumentViolation::InvalidField { field, .. } => field.clone(),
            DocumentViolation::CollectionNotArray { collection } => collection.key().to_string(),
            DocumentViolation::EntryNotObject { collection, index } => {
                format!("{}[{}]", collection.key(), index)
            }
            DocumentViolation::MissingField {
                collection,
                index,
                field,
            }
            | DocumentViolation::InvalidEntryField {
                collection,
                index,
                field,
                ..
            } => format!("{}[{}].{}", collection.key(), index, field),
            DocumentViolation::DuplicateId {
                collection, index, ..
            } => format!("{}[{}].id", collection.key(), index),
        }
    }

    pub const fn public_message(&self) -> &'static str {
        match self {
            DocumentViolation::RootNotObject => "Flow document must be a JSON object",
            DocumentViolation::InvalidField { .. } => "Flow document field has the wrong type",
            DocumentViolation::CollectionNotArray { .. } => "Nodes and edges must be arrays",
            DocumentViolation::EntryNotObject { .. } => "Each node and edge must be an object",
            DocumentViolation::MissingField { .. } => "A required field is missing",
            DocumentViolation::InvalidEntryField { .. } => "A field has the wrong type",
            DocumentViolation::DuplicateId { .. } => "Identifiers must be unique within a flow",
        }
    }
}

/// Validates a raw save payload. Any violation rejects the whole document.
pub fn validate_document(payload: &Value) -> Result<FlowDocument> {
    parse_document(payload).map_err(LibError::invalid_document)
}

/// Parses a raw save payload, collecting every violation instead of stopping at the first.
pub fn parse_document(payload: &Value) -> std::result::Result<FlowDocument, Vec<DocumentViolation>> {
    let Some(root) = payload.as_object() else {
        return Err(vec![DocumentViolation::RootNotObject]);
    };

    let mut violations = Vec::new();
    let viewport = top_level_object(root, "viewport", &mut violations);
    let flow_settings = top_level_object(root, "flowSettings", &mut violations);
    let change_description = match root.get("changeDescription") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.clone()),
        Some(_) => {
            violations.push(DocumentViolation::InvalidField {
                field: "changeDescription".to_string(),
                expected: "string",
            });
            None
        }
    };

    let nodes = collection_entries(root, Collection::Nodes, &mut violations)
        .into_iter()
        .filter_map(|(index, entry)| {
            let mut reader = EntryReader::new(Collection::Nodes, index, entry, &mut violations);
            read_node(&mut reader).map(|node| (index, node))
        })
        .collect::<Vec<_>>();

    let edges = collection_entries(root, Collection::Edges, &mut violations)
        .into_iter()
        .filter_map(|(index, entry)| {
            let mut reader = EntryReader::new(Collection::Edges, index, entry, &mut violations);
            read_edge(&mut reader).map(|edge| (index, edge))
        })
        .collect::<Vec<_>>();

    flag_duplicates(
        Collection::Nodes,
        nodes.iter().map(|(index, node)| (*index, node.id.as_str())),
        &mut violations,
    );
    flag_duplicates(
        Collection::Edges,
        edges.iter().map(|(index, edge)| (*index, edge.id.as_str())),
        &mut violations,
    );

    if !violations.is_empty() {
        return Err(violations);
    }

    Ok(FlowDocument {
        viewport,
        flow_settings,
        nodes: nodes.into_iter().map(|(_, node)| node).collect(),
        edges: edges.into_iter().map(|(_, edge)| edge).collect(),
        change_description,
    })
}

fn top_level_object(
    root: &Map<String, Value>,
    field: &str,
    violations: &mut Vec<DocumentViolation>,
) -> Value {
    match root.get(field) {
        None | Some(Value::Null) => empty_document(),
        Some(value @ Value::Object(_)) => value.clone(),
        Some(_) => {
            violations.push(DocumentViolation::InvalidField {
                field: field.to_string(),
                expected: "object",
            });
            empty_document()
        }
    }
}

fn collection_entries<'a>(
    root: &'a Map<String, Value>,
    collection: Collection,
    violations: &mut Vec<DocumentViolation>,
) -> Vec<(usize, &'a Map<String, Value>)> {
    let entries = match root.get(collection.key()) {
        None | Some(Value::Null) => return Vec::new(),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            violations.push(DocumentViolation::CollectionNotArray { collection });
            return Vec::new();
        }
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry.as_object() {
            Some(entry) => Some((index, entry)),
            None => {
                violations.push(DocumentViolation::EntryNotObject { collection, index });
                None
            }
        })
        .collect()
}

fn flag_duplicates<'a>(
    collection: Collection,
    ids: impl Iterator<Item = (usize, &'a str)>,
    violations: &mut Vec<DocumentViolation>,
) {
    let mut seen = HashSet::new();
    for (index, id) in ids {
        if !seen.insert(id) {
            violations.push(DocumentViolation::DuplicateId {
                collection,
                index,
                id: id.to_string(),
            });
        }
    }
}

fn read_node(reader: &mut EntryReader<'_>) -> Option<FlowNode> {
    let id = reader.required_id("id");
    let position = reader.position();
    let node_type = reader
        .optional_string("type")
        .map(NodeType::from)
        .unwrap_or_default();
    let width = reader.optional_number("width");
    let height = reader.optional_number("height");
    let draggable = reader.flag("draggable", true);
    let selectable = reader.flag("selectable", true);
    let deletable = reader.flag("deletable", true);

    if reader.failed {
        return None;
    }

    Some(FlowNode {
        id: id?,
        node_type,
        position: position?,
        width,
        height,
        data: reader.document("data"),
        style: reader.document("style"),
        draggable,
        selectable,
        deletable,
    })
}

fn read_edge(reader: &mut EntryReader<'_>) -> Option<FlowEdge> {
    let id = reader.required_id("id");
    let source = reader.required_id("source");
    let target = reader.required_id("target");
    let edge_type = reader
        .optional_string("type")
        .map(EdgeType::from)
        .unwrap_or_default();
    let source_handle = reader.optional_string("sourceHandle");
    let target_handle = reader.optional_string("targetHandle");
    let label = reader.optional_string("label");
    let animated = reader.flag("animated", false);
    let deletable = reader.flag("deletable", true);

    if reader.failed {
        return None;
    }

    Some(FlowEdge {
        id: id?,
        edge_type,
        source: source?,
        target: target?,
        source_handle,
        target_handle,
        data: reader.document("data"),
        style: reader.document("style"),
        label,
        label_style: reader.document("labelStyle"),
        animated,
        deletable,
    })
}

struct EntryReader<'a> {
    collection: Collection,
    index: usize,
    entry: &'a Map<String, Value>,
    violations: &'a mut Vec<DocumentViolation>,
    failed: bool,
}

impl<'a> EntryReader<'a> {
    fn new(
        collection: Collection,
        index: usize,
        entry: &'a Map<String, Value>,
        violations: &'a mut Vec<DocumentViolation>,
    ) -> Self {
        Self {
            collection,
            index,
            entry,
            violations,
            failed: false,
        }
    }

    fn missing(&mut self, field: &str) {
        self.failed = true;
        self.violations.push(DocumentViolation::MissingField {
            collection: self.collection,
            index: self.index,
            field: field.to_string(),
        });
    }

    fn invalid(&mut self, field: &str, expected: &'static str) {
        self.failed = true;
        self.violations.push(DocumentViolation::InvalidEntryField {
            collection: self.collection,
            index: self.index,
            field: field.to_string(),
            expected,
        });
    }

    fn required_id(&mut self, field: &str) -> Option<String> {
        match self.entry.get(field) {
            None | Some(Value::Null) => {
                self.missing(field);
                None
            }
            Some(Value::String(value)) if !value.is_empty() => Some(value.clone()),
            Some(_) => {
                self.invalid(field, "non-empty string");
                None
            }
        }
    }

    fn optional_string(&mut self, field: &str) -> Option<String> {
        match self.entry.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::String(value)) => Some(value.clone()),
            Some(_) => {
                self.invalid(field, "string");
                None
            }
        }
    }

    fn optional_number(&mut self, field: &str) -> Option<f64> {
        match self.entry.get(field) {
            None | Some(Value::Null) => None,
            Some(Value::Number(value)) => value.as_f64(),
            Some(_) => {
                self.invalid(field, "number");
                None
            }
        }
    }

    fn flag(&mut self, field: &str, default: bool) -> bool {
        match self.entry.get(field) {
            None | Some(Value::Null) => default,
            Some(Value::Bool(value)) => *value,
            Some(_) => {
                self.invalid(field, "boolean");
                default
            }
        }
    }

    fn document(&self, field: &str) -> Value {
        match self.entry.get(field) {
            None | Some(Value::Null) => empty_document(),
            Some(value) => value.clone(),
        }
    }

    fn position(&mut self) -> Option<Position> {
        let position = match self.entry.get("position") {
            None | Some(Value::Null) => {
                self.missing("position");
                return None;
            }
            Some(Value::Object(position)) => position,
            Some(_) => {
                self.invalid("position", "object");
                return None;
            }
        };

        let x = self.coordinate(position, "x");
        let y = self.coordinate(position, "y");
        Some(Position { x: x?, y: y? })
    }

    fn coordinate(&mut self, position: &Map<String, Value>, axis: &str) -> Option<f64> {
        let field = format!("position.{axis}");
        match position.get(axis) {
            None | Some(Value::Null) => {
                self.missing(&field);
                None
            }
            Some(Value::Number(value)) => value.as_f64(),
            Some(_) => {
                self.invalid(&field, "number");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Collection, DocumentViolation, parse_document, validate_document};
    use crate::error::{ErrorDetails, ErrorKind};
    use crate::models::{EdgeType, NodeType};

    #[test]
    fn missing_collections_are_empty() {
        let document = validate_document(&json!({})).expect("empty document is valid");
        assert!(document.nodes.is_empty());
        assert!(document.edges.is_empty());
        assert_eq!(document.viewport, json!({}));
        assert_eq!(document.flow_settings, json!({}));
        assert_eq!(document.change_description, None);
    }

    #[test]
    fn node_defaults_are_applied() {
        let document = validate_document(&json!({
            "nodes": [{"id": "n1", "position": {"x": 10, "y": -2.5}}]
        }))
        .expect("document should validate");

        let node = &document.nodes[0];
        assert_eq!(node.id, "n1");
        assert_eq!(node.node_type, NodeType::Default);
        assert_eq!(node.position.x, 10.0);
        assert_eq!(node.position.y, -2.5);
        assert!(node.draggable && node.selectable && node.deletable);
        assert_eq!(node.width, None);
        assert_eq!(node.data, json!({}));
    }

    #[test]
    fn edge_defaults_are_applied_and_references_are_not_checked() {
        let document = validate_document(&json!({
            "nodes": [],
            "edges": [{"id": "e1", "source": "ghost", "target": "n2", "type": "wavy"}]
        }))
        .expect("dangling edges are tolerated");

        let edge = &document.edges[0];
        assert_eq!(edge.edge_type, EdgeType::Other("wavy".to_string()));
        assert!(!edge.animated);
        assert!(edge.deletable);
        assert_eq!(edge.source_handle, None);
        assert_eq!(edge.label_style, json!({}));
    }

    #[test]
    fn reports_every_violation_with_its_location() {
        let violations = parse_document(&json!({
            "nodes": [
                {"id": "n1", "position": {"x": 1, "y": 2}},
                {"position": {"x": "left", "y": 2}},
                "not-a-node"
            ],
            "edges": [{"id": "e1", "source": "", "target": "n1", "animated": "yes"}]
        }))
        .expect_err("document should be rejected");

        let paths = violations
            .iter()
            .map(DocumentViolation::path)
            .collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                "nodes[2]",
                "nodes[1].id",
                "nodes[1].position.x",
                "edges[0].source",
                "edges[0].animated",
            ]
        );
    }

    #[test]
    fn rejects_non_object_root_and_sections() {
        assert_eq!(
            parse_document(&json!([])).expect_err("array root"),
            vec![DocumentViolation::RootNotObject]
        );

        let violations = parse_document(&json!({
            "viewport": 3,
            "nodes": {"id": "n1"},
            "changeDescription": false
        }))
        .expect_err("wrong section types");
        assert!(violations.contains(&DocumentViolation::CollectionNotArray {
            collection: Collection::Nodes
        }));
        assert!(violations.contains(&DocumentViolation::InvalidField {
            field: "viewport".to_string(),
            expected: "object",
        }));
        assert!(violations.contains(&DocumentViolation::InvalidField {
            field: "changeDescription".to_string(),
            expected: "string",
        }));
    }

    #[test]
    fn rejects_duplicate_node_ids() {
        let err = validate_document(&json!({
            "nodes": [
                {"id": "n1", "position": {"x": 0, "y": 0}},
                {"id": "n2", "position": {"x": 0, "y": 0}},
                {"id": "n1", "position": {"x": 5, "y": 5}}
            ]
        }))
        .expect_err("duplicate ids should fail");

        assert_eq!(err.kind, ErrorKind::InvalidInput);
        assert_eq!(
            err.details,
            Some(ErrorDetails::DocumentViolations {
                violations: vec![DocumentViolation::DuplicateId {
                    collection: Collection::Nodes,
                    index: 2,
                    id: "n1".to_string(),
                }]
            })
        );
    }

    #[test]
    fn whitespace_ids_are_kept_verbatim() {
        let document = validate_document(&json!({
            "nodes": [{"id": " ", "position": {"x": 0, "y": 0}}],
            "edges": [{"id": "e 1", "source": " ", "target": "\t"}]
        }))
        .expect("any non-empty string is an id");
        assert_eq!(document.nodes[0].id, " ");
        assert_eq!(document.edges[0].source, " ");
        assert_eq!(document.edges[0].target, "\t");

        let violations = parse_document(&json!({
            "edges": [{"id": "e1", "source": "", "target": "n1"}]
        }))
        .expect_err("empty source");
        assert_eq!(
            violations,
            vec![DocumentViolation::InvalidEntryField {
                collection: Collection::Edges,
                index: 0,
                field: "source".to_string(),
                expected: "non-empty string",
            }]
        );
    }

    #[test]
    fn same_id_may_appear_as_node_and_edge() {
        let document = validate_document(&json!({
            "nodes": [{"id": "x", "position": {"x": 0, "y": 0}}],
            "edges": [{"id": "x", "source": "x", "target": "x"}]
        }))
        .expect("namespaces are separate");
        assert_eq!(document.nodes.len(), 1);
        assert_eq!(document.edges.len(), 1);
    }

    #[test]
    fn opaque_documents_are_kept_verbatim() {
        let document = validate_document(&json!({
            "viewport": {"x": 1, "y": 2, "zoom": 1.5},
            "flowSettings": {"snapToGrid": true},
            "nodes": [{
                "id": "n1",
                "position": {"x": 0, "y": 0},
                "data": {"label": "Start", "nested": [1, 2, {"a": null}]},
                "style": {"background": "#fff"},
                "selected": true
            }]
        }))
        .expect("document should validate");

        assert_eq!(document.viewport, json!({"x": 1, "y": 2, "zoom": 1.5}));
        assert_eq!(document.flow_settings, json!({"snapToGrid": true}));
        assert_eq!(
            document.nodes[0].data,
            json!({"label": "Start", "nested": [1, 2, {"a": null}]})
        );
        assert_eq!(document.nodes[0].style, json!({"background": "#fff"}));
    }
}
