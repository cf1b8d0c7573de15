#[cfg(feature = "api")]
pub mod api;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod document;
pub mod error;
pub mod export;
pub mod identity;
pub mod ledger;
pub mod memory;
pub mod models;
pub mod operations;
pub mod permissions;
pub mod projection;
pub mod store;

pub mod prelude {
    #[cfg(feature = "api")]
    pub use crate::api::{AppError, FlowApp, HasFlowStore};
    #[cfg(feature = "sqlx")]
    pub use crate::db::{PgFlowStore, create_flow_tables};
    pub use crate::document::{DocumentViolation, validate_document};
    pub use crate::error::{ErrorKind, LibError, Result};
    pub use crate::export::{ExportOrder, ExportedFlow, FlowChartDetail, export_document};
    #[cfg(feature = "api")]
    pub use crate::identity::AuthenticatedCaller;
    pub use crate::identity::UserId;
    pub use crate::ledger::VersionLedger;
    pub use crate::memory::MemoryFlowStore;
    pub use crate::models::{
        CreateFlowPayload, EdgeType, ExportQuery, FlowChart, FlowDocument, FlowEdge, FlowId,
        FlowNode, FlowSummary, HistoryQuery, ListFlowsQuery, NodeType, Paged, Position,
        SaveFlowResponse, SnapshotId, UpdateFlowPayload, VersionSnapshot,
    };
    pub use crate::operations::{FlowOperation, FlowOperationResult, FlowOperations};
    pub use crate::permissions::{FlowAccess, ensure_access};
    pub use crate::projection::{project, reconstruct_document};
    pub use crate::store::{FlowStore, ReplacePlan, ReplaceStep};
}
