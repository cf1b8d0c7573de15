use anyhow::anyhow;

use crate::error::{LibError, Result};
use crate::identity::UserId;
use crate::models::FlowChart;

/// What a caller is trying to do with a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAccess {
    /// Read metadata, content, export or history. Allowed for the owner and for public flows.
    Read,
    /// Any mutation. Only the owner may write.
    Write,
}

pub fn is_owner(flow: &FlowChart, actor: UserId) -> bool {
    flow.owner_user_id == actor
}

pub fn can_access(flow: &FlowChart, actor: UserId, access: FlowAccess) -> bool {
    match access {
        FlowAccess::Read => is_owner(flow, actor) || flow.is_public,
        FlowAccess::Write => is_owner(flow, actor),
    }
}

pub fn ensure_access(flow: &FlowChart, actor: UserId, access: FlowAccess) -> Result<()> {
    if can_access(flow, actor, access) {
        return Ok(());
    }

    let public = match access {
        FlowAccess::Read => "You do not have access to this flow",
        FlowAccess::Write => "Only the flow owner can modify this flow",
    };
    Err(LibError::forbidden(
        public,
        anyhow!("{:?} access to flow {} denied for user {}", access, flow.id, actor),
    ))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use serde_json::json;
    use uuid::Uuid;

    use super::{FlowAccess, can_access, ensure_access};
    use crate::error::ErrorKind;
    use crate::identity::UserId;
    use crate::models::{FlowChart, FlowId};

    fn flow(owner: UserId, is_public: bool) -> FlowChart {
        let now = NaiveDate::from_ymd_opt(2026, 1, 1)
            .expect("valid date")
            .and_hms_opt(0, 0, 0)
            .expect("valid datetime");
        FlowChart {
            id: FlowId(Uuid::new_v4()),
            owner_user_id: owner,
            name: "Flow".to_string(),
            description: None,
            viewport: json!({}),
            flow_settings: json!({}),
            is_public,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn public_flows_are_readable_but_not_writable_by_others() {
        let owner = UserId(Uuid::new_v4());
        let other = UserId(Uuid::new_v4());
        let public = flow(owner, true);
        let private = flow(owner, false);

        assert!(can_access(&public, other, FlowAccess::Read));
        assert!(!can_access(&public, other, FlowAccess::Write));
        assert!(!can_access(&private, other, FlowAccess::Read));
        assert!(can_access(&private, owner, FlowAccess::Write));

        let err = ensure_access(&public, other, FlowAccess::Write).expect_err("write denied");
        assert_eq!(err.kind, ErrorKind::Forbidden);
    }
}
