//! Join request schema
//!
//! A user asks to join an organization; the organization owner approves or
//! rejects. Only pending requests can change status.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

pub const REQUEST_COLLECTION: &str = "requests";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl RequestStatus {
    /// Value as stored in the `status` field
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RequestDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    pub organization_id: ObjectId,

    pub requester_id: ObjectId,

    #[serde(default)]
    pub status: RequestStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RequestDoc {
    pub fn new(organization_id: ObjectId, requester_id: ObjectId, message: Option<String>) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            organization_id,
            requester_id,
            status: RequestStatus::Pending,
            message,
        }
    }
}

impl IntoIndexes for RequestDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "organization_id": 1, "status": 1 },
            Some(
                IndexOptions::builder()
                    .name("organization_status_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for RequestDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(
            bson::to_bson(&RequestStatus::Approved).unwrap(),
            bson::Bson::String("approved".into())
        );
        assert_eq!(RequestStatus::Pending.to_string(), "pending");
    }

    #[test]
    fn test_new_request_is_pending() {
        let request = RequestDoc::new(ObjectId::new(), ObjectId::new(), None);
        assert_eq!(request.status, RequestStatus::Pending);
    }
}
